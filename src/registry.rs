//! Stream registry
//!
//! The process-wide map from stream path to stream. Lookups and listings
//! take the read lock; creation takes the write lock, seeds the new
//! stream's timer and spawns its owning task. Removal happens only from
//! inside the owning task as it enters Closed, through a weak
//! back-reference (the registry never keeps a closed stream alive).
//!
//! There is no global instance: construct one per engine (or per test)
//! and drop it to tear down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::stream::{self, EventBus, StreamCore, StreamEvent, StreamHandle, StreamSummary};

pub(crate) struct RegistryInner {
    streams: RwLock<HashMap<String, Arc<StreamHandle>>>,
    bus: EventBus,
    engine: EngineConfig,
    next_ssrc: AtomicU32,
}

impl RegistryInner {
    /// Called by a stream's owning task as it enters Closed
    pub(crate) fn remove(&self, path: &str) {
        if self.streams.write().unwrap().remove(path).is_some() {
            tracing::info!(stream = %path, "Stream removed from registry");
        }
    }
}

/// Central registry for all active streams.
///
/// Cloning shares the same map.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<RegistryInner>,
}

impl StreamRegistry {
    pub fn new(engine: EngineConfig) -> Self {
        let bus = EventBus::new(engine.event_bus_capacity);
        Self {
            inner: Arc::new(RegistryInner {
                streams: RwLock::new(HashMap::new()),
                bus,
                engine,
                next_ssrc: AtomicU32::new(1),
            }),
        }
    }

    /// Observe every stream's state events
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.bus.subscribe()
    }

    /// Look up a stream, creating (and starting) it if absent.
    ///
    /// `wait_timeout` seeds the new stream's timer: how long it waits in
    /// WaitPublish before giving up. Returns the handle and whether the
    /// stream was created by this call.
    pub fn find_or_create(
        &self,
        path: &str,
        wait_timeout: Duration,
    ) -> Result<(Arc<StreamHandle>, bool)> {
        let mut parts = path.split('/');
        let app = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            tracing::warn!(path = %path, "Stream path format error");
            return Err(Error::BadPath(path.to_string()));
        }

        if let Some(existing) = self.inner.streams.read().unwrap().get(path) {
            tracing::debug!(stream = %path, "Stream found");
            return Ok((existing.clone(), false));
        }

        let mut streams = self.inner.streams.write().unwrap();
        // Raced creators resolve to whoever inserted first
        if let Some(existing) = streams.get(path) {
            return Ok((existing.clone(), false));
        }

        let ssrc = self.inner.next_ssrc.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        let handle = Arc::new(StreamHandle::new(
            Arc::from(path),
            app.to_string(),
            rest.join("/"),
            ssrc,
            self.inner.engine.clone(),
            tx,
        ));
        let core = StreamCore::new(
            handle.clone(),
            Arc::downgrade(&self.inner),
            self.inner.bus.clone(),
            wait_timeout,
        );
        streams.insert(path.to_string(), handle.clone());
        tracing::info!(stream = %path, ssrc, "Stream created");
        let _ = tokio::spawn(stream::run(core, rx));
        Ok((handle, true))
    }

    /// Look up an existing stream
    pub fn get(&self, path: &str) -> Option<Arc<StreamHandle>> {
        self.inner.streams.read().unwrap().get(path).cloned()
    }

    /// Number of live streams
    pub fn stream_count(&self) -> usize {
        self.inner.streams.read().unwrap().len()
    }

    /// All streams, sorted by path
    pub fn list(&self) -> Vec<Arc<StreamHandle>> {
        let mut streams: Vec<_> = self
            .inner
            .streams
            .read()
            .unwrap()
            .values()
            .cloned()
            .collect();
        streams.sort_by(|a, b| a.path().cmp(b.path()));
        streams
    }

    /// Point-in-time summaries of every stream, sorted by path
    pub fn summaries(&self) -> Vec<StreamSummary> {
        self.list().iter().map(|s| s.summary()).collect()
    }

    /// Ask every stream to close. Streams unregister themselves as their
    /// owning tasks wind down.
    pub fn shutdown(&self) {
        for stream in self.list() {
            stream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamState;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_bad_path_rejected() {
        let registry = StreamRegistry::new(EngineConfig::default());
        for path in ["nopath", ""] {
            let err = registry
                .find_or_create(path, Duration::from_secs(1))
                .unwrap_err();
            assert!(matches!(err, Error::BadPath(_)), "path {:?}", path);
        }
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_find_or_create() {
        let registry = StreamRegistry::new(EngineConfig::default());

        let (a, created) = registry
            .find_or_create("live/cam1", Duration::from_secs(30))
            .unwrap();
        assert!(created);
        assert_eq!(a.path(), "live/cam1");
        assert_eq!(a.app_name(), "live");
        assert_eq!(a.stream_name(), "cam1");
        assert_eq!(a.state(), StreamState::WaitPublish);

        let (b, created) = registry
            .find_or_create("live/cam1", Duration::from_secs(30))
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stream_count(), 1);
    }

    #[tokio::test]
    async fn test_nested_stream_name() {
        let registry = StreamRegistry::new(EngineConfig::default());
        let (s, _) = registry
            .find_or_create("live/room/cam1", Duration::from_secs(30))
            .unwrap();
        assert_eq!(s.app_name(), "live");
        assert_eq!(s.stream_name(), "room/cam1");
    }

    #[tokio::test]
    async fn test_ssrc_unique_and_stable() {
        let registry = StreamRegistry::new(EngineConfig::default());
        let (a, _) = registry
            .find_or_create("live/a", Duration::from_secs(30))
            .unwrap();
        let (b, _) = registry
            .find_or_create("live/b", Duration::from_secs(30))
            .unwrap();
        assert_ne!(a.ssrc(), b.ssrc());
        assert_eq!(a.ssrc(), a.ssrc());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let registry = StreamRegistry::new(EngineConfig::default());
        for path in ["live/b", "live/a", "app/z"] {
            registry.find_or_create(path, Duration::from_secs(30)).unwrap();
        }
        let paths: Vec<_> = registry.list().iter().map(|s| s.path().to_string()).collect();
        assert_eq!(paths, vec!["app/z", "live/a", "live/b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_removes_stream() {
        let registry = StreamRegistry::new(EngineConfig::default());
        let (stream, _) = registry
            .find_or_create("live/cam1", Duration::from_millis(10))
            .unwrap();

        // Nobody publishes or subscribes; the timer closes the stream
        sleep(Duration::from_millis(20)).await;
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.is_closed());
        // Timing out while waiting for a publisher is a failure path
        assert!(!stream.is_shutdown());
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_all() {
        let registry = StreamRegistry::new(EngineConfig::default());
        let (a, _) = registry
            .find_or_create("live/a", Duration::from_secs(300))
            .unwrap();
        let (b, _) = registry
            .find_or_create("live/b", Duration::from_secs(300))
            .unwrap();

        registry.shutdown();
        sleep(Duration::from_millis(50)).await;
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(registry.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_summaries() {
        let registry = StreamRegistry::new(EngineConfig::default());
        registry
            .find_or_create("live/cam1", Duration::from_secs(30))
            .unwrap();
        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].path, "live/cam1");
        assert_eq!(summaries[0].subscribers, 0);
        assert!(summaries[0].tracks.is_empty());
    }
}
