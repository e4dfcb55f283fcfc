//! Publisher and subscriber contracts
//!
//! Protocol adapters (RTMP/RTSP/WebRTC sessions, file pullers, …) attach to
//! a stream through these traits. The stream task invokes them from its
//! serial loop, so implementations must not block: `on_event` should hand
//! the event off (e.g. onto an mpsc queue) and return.

use std::collections::HashMap;

use crate::config::{PublishConfig, SubscribeConfig};
use crate::stream::StreamEvent;

/// Identity and configuration of a publisher.
#[derive(Debug, Clone)]
pub struct PublisherInfo {
    /// Protocol kind, e.g. "rtsp", "rtmp", "webrtc"
    pub kind: String,

    /// Publisher configuration; the stream adopts the timeout fields
    pub config: PublishConfig,
}

impl PublisherInfo {
    /// Create publisher info for a protocol kind with default config
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            config: PublishConfig::default(),
        }
    }

    /// Attach a configuration
    pub fn with_config(mut self, config: PublishConfig) -> Self {
        self.config = config;
        self
    }
}

/// Identity, configuration and request arguments of a subscriber.
#[derive(Debug, Clone, Default)]
pub struct SubscriberInfo {
    /// Subscriber configuration
    pub config: SubscribeConfig,

    /// Request arguments (query-string style), consulted for per-request
    /// track selection before the config lists
    pub args: HashMap<String, String>,

    /// Engine-internal pullers live in a separate set and skip track waits
    pub internal: bool,
}

impl SubscriberInfo {
    /// Create subscriber info with the given config
    pub fn new(config: SubscribeConfig) -> Self {
        Self {
            config,
            args: HashMap::new(),
            internal: false,
        }
    }

    /// Set a request argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Get a request argument
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

/// A publisher attached to a stream.
///
/// At most one publisher is active per stream. The `id` is the identity
/// used for republish detection: the same session publishing again is a
/// republish, a different session replaces the previous publisher.
pub trait Publisher: Send + Sync + 'static {
    /// Stable identity of this publisher session
    fn id(&self) -> u64;

    /// Publisher identity and configuration
    fn info(&self) -> &PublisherInfo;

    /// Whether the underlying session has gone away
    fn is_closed(&self) -> bool;

    /// State events, subscriber arrivals/departures and lifecycle
    /// notifications from the stream task
    fn on_event(&self, event: StreamEvent);
}

/// A subscriber attached to a stream.
pub trait Subscriber: Send + Sync + 'static {
    /// Stable identity of this subscriber session
    fn id(&self) -> u64;

    /// Subscriber configuration and request arguments
    fn info(&self) -> &SubscriberInfo;

    /// Whether the underlying session has gone away
    fn is_closed(&self) -> bool;

    /// Track arrivals, state events and pulses from the stream task
    fn on_event(&self, event: StreamEvent);
}
