//! Stream lifecycle and dispatch core
//!
//! Each stream is owned by exactly one tokio task running [`run`]. The
//! task selects over three event sources — the pulse ticker, the state
//! timer, and a capacity-1 action queue — and is the only place the
//! stream's mutable state is touched. Everyone else holds an
//! [`StreamHandle`]: immutable identity plus the queue's sender.
//!
//! ```text
//!   adapters ──ActionMessage──► [queue cap 1] ─┐
//!   timer ──────────────────────────────────────┼──► serial loop ──► FSM
//!   pulse ──────────────────────────────────────┘        │
//!                                         bus / publisher / subscribers
//! ```

pub mod events;
pub mod state;
pub(crate) mod subscribers;

pub use events::{EventBus, StreamEvent};
pub use state::{is_shutdown, next_state, StateEvent, StreamAction, StreamState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{Instant as TokioInstant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::peer::{Publisher, Subscriber};
use crate::promise::Promise;
use crate::registry::RegistryInner;
use crate::track::{TrackHandle, TrackKind, TrackState};
use subscribers::{Subscribers, TrackWaits};

/// Heartbeat window while publishing: reap dead subscribers, check track
/// liveness, release stale waits
const HEARTBEAT: Duration = Duration::from_secs(5);

/// Loop iterations slower than this are reported
const SLOW_ITERATION: Duration = Duration::from_millis(100);

/// Wait for a publisher when nobody configured anything better
const DEFAULT_WAIT: Duration = Duration::from_millis(10);

/// Items travelling the per-stream action queue.
pub(crate) enum ActionMessage {
    Publish(Promise<Arc<dyn Publisher>>),
    Subscribe(Promise<Arc<dyn Subscriber>>),
    Unsubscribe(u64),
    AddTrack(Promise<TrackHandle>),
    TrackRemoved(String),
    NoMoreTrack,
    SubPulse(Arc<dyn Subscriber>),
    Bare(StreamAction),
}

/// Timeout configuration a stream adopts from its publisher.
#[derive(Debug, Clone)]
pub(crate) struct StreamTimeouts {
    pub publish: Duration,
    pub delay_close: Duration,
    pub idle: Duration,
}

/// Point-in-time description of a stream for listings.
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub path: String,
    pub state: StreamState,
    pub subscribers: usize,
    pub tracks: Vec<String>,
    pub start_time: Instant,
    pub bps: u64,
    /// Publisher protocol kind, when one is attached
    pub kind: Option<String>,
}

/// Shared identity of a stream plus the way in: the action queue.
///
/// Cheap to clone behind its `Arc`; safe to hold after the stream closed
/// (operations then fail with [`Error::StreamClosed`]).
pub struct StreamHandle {
    path: Arc<str>,
    app_name: String,
    stream_name: String,
    ssrc: u32,
    start_time: Instant,
    engine: EngineConfig,
    tx: mpsc::Sender<ActionMessage>,
    state: AtomicU8,
    closed: AtomicBool,
    // Mirrors maintained by the owning task for lock-free observation
    subscriber_count: AtomicUsize,
    tracks: Mutex<Vec<TrackHandle>>,
    publisher_kind: Mutex<Option<String>>,
    /// Append-only record of accepted transitions, written only by the
    /// owning task
    history: Mutex<Vec<StateEvent>>,
}

impl StreamHandle {
    pub(crate) fn new(
        path: Arc<str>,
        app_name: String,
        stream_name: String,
        ssrc: u32,
        engine: EngineConfig,
        tx: mpsc::Sender<ActionMessage>,
    ) -> Self {
        Self {
            path,
            app_name,
            stream_name,
            ssrc,
            start_time: Instant::now(),
            engine,
            tx,
            state: AtomicU8::new(StreamState::WaitPublish as u8),
            closed: AtomicBool::new(false),
            subscriber_count: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
            publisher_kind: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Full stream path, "<app>/<name>"
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Stable RTP synchronization source id for this stream's lifetime
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub(crate) fn ring_capacity(&self) -> usize {
        self.engine.ring_capacity
    }

    /// Last state published by the owning task
    pub fn state(&self) -> StreamState {
        match self.state.load(Ordering::Acquire) {
            0 => StreamState::WaitPublish,
            1 => StreamState::Publishing,
            2 => StreamState::WaitClose,
            _ => StreamState::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Accepted transitions so far, oldest first
    pub fn state_history(&self) -> Vec<StateEvent> {
        self.history.lock().unwrap().clone()
    }

    /// Whether this stream's close (if any) was deliberate rather than a
    /// failure path
    pub fn is_shutdown(&self) -> bool {
        is_shutdown(&self.history.lock().unwrap())
    }

    /// Register (or re-register) a publisher. Resolves once the stream
    /// accepted it; a republish by the same session also resolves.
    pub async fn publish(&self, publisher: Arc<dyn Publisher>) -> Result<()> {
        let (promise, completion) = Promise::new(publisher);
        self.send(ActionMessage::Publish(promise)).await?;
        completion.wait().await
    }

    /// Register a subscriber. Resolves once every configured track wait
    /// is satisfied or the wait is aborted.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Result<()> {
        let (promise, completion) = Promise::new(subscriber);
        self.send(ActionMessage::Subscribe(promise)).await?;
        completion.wait().await
    }

    /// Remove a subscriber by id
    pub fn unsubscribe(&self, subscriber: u64) {
        self.send_detached(ActionMessage::Unsubscribe(subscriber));
    }

    /// Register a subscriber for periodic pulse events
    pub async fn subscribe_pulse(&self, subscriber: Arc<dyn Subscriber>) -> Result<()> {
        self.send(ActionMessage::SubPulse(subscriber)).await
    }

    /// Offer a track to the stream; rejected on duplicate names
    pub async fn add_track(&self, track: TrackHandle) -> Result<()> {
        let (promise, completion) = Promise::new(track);
        self.send(ActionMessage::AddTrack(promise)).await?;
        completion.wait().await
    }

    /// Remove a track by name
    pub fn remove_track(&self, name: impl Into<String>) {
        self.send_detached(ActionMessage::TrackRemoved(name.into()));
    }

    /// The publisher will add no further tracks: release pending waits
    pub fn no_more_tracks(&self) {
        self.send_detached(ActionMessage::NoMoreTrack);
    }

    /// Deliberately close the stream
    pub fn close(&self) {
        self.send_detached(ActionMessage::Bare(StreamAction::Close));
    }

    /// Snapshot for listings
    pub fn summary(&self) -> StreamSummary {
        let tracks = self.tracks.lock().unwrap();
        StreamSummary {
            path: self.path.to_string(),
            state: self.state(),
            subscribers: self.subscriber_count(),
            tracks: tracks.iter().map(|t| t.name().to_string()).collect(),
            start_time: self.start_time,
            bps: tracks.iter().map(|t| t.bps()).sum(),
            kind: self.publisher_kind.lock().unwrap().clone(),
        }
    }

    async fn send(&self, msg: ActionMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamClosed);
        }
        self.tx.send(msg).await.map_err(|_| Error::StreamClosed)
    }

    /// Queue a message without waiting. A full queue falls back to a
    /// detached task so sync callers (track writers) never block.
    fn send_detached(&self, msg: ActionMessage) {
        if self.is_closed() {
            return;
        }
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(msg)) => {
                let tx = self.tx.clone();
                let _ = tokio::spawn(async move {
                    let _ = tx.send(msg).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn set_state_mirror(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
        if state == StreamState::Closed {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn set_subscriber_mirror(&self, count: usize) {
        self.subscriber_count.store(count, Ordering::Relaxed);
    }

    fn track_mirror_add(&self, track: TrackHandle) {
        self.tracks.lock().unwrap().push(track);
    }

    fn track_mirror_remove(&self, name: &str) {
        self.tracks.lock().unwrap().retain(|t| t.name() != name);
    }

    fn set_publisher_kind(&self, kind: String) {
        *self.publisher_kind.lock().unwrap() = Some(kind);
    }

    /// Record a transition; returns the new history length
    fn push_history(&self, event: StateEvent) -> usize {
        let mut history = self.history.lock().unwrap();
        history.push(event);
        history.len()
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// The track map with main-video bookkeeping.
#[derive(Default)]
pub(crate) struct Tracks {
    map: HashMap<String, TrackHandle>,
    main_video: Option<TrackHandle>,
}

impl Tracks {
    /// Insert a track; returns false on a duplicate name.
    ///
    /// The first video track becomes the main video. Audio tracks added
    /// while a main video exists start narrowed and are narrowed again on
    /// each of its IDRs.
    fn add(&mut self, track: TrackHandle) -> bool {
        if self.map.contains_key(track.name()) {
            return false;
        }
        match track.kind() {
            TrackKind::Video => {
                if self.main_video.is_none() {
                    for t in self.map.values() {
                        if t.kind() == TrackKind::Audio {
                            track.add_narrow_target(t.clone());
                        }
                    }
                    self.main_video = Some(track.clone());
                }
            }
            TrackKind::Audio => {
                if let Some(main) = &self.main_video {
                    track.narrow();
                    main.add_narrow_target(track.clone());
                }
            }
            TrackKind::Data => {}
        }
        self.map.insert(track.name().to_string(), track);
        true
    }

    fn remove(&mut self, name: &str) -> Option<TrackHandle> {
        let track = self.map.remove(name)?;
        match track.kind() {
            TrackKind::Audio => {
                if let Some(main) = &self.main_video {
                    main.remove_narrow_target(name);
                }
            }
            TrackKind::Video => {
                if self
                    .main_video
                    .as_ref()
                    .is_some_and(|main| main.same_track(&track))
                {
                    self.main_video = None;
                }
            }
            TrackKind::Data => {}
        }
        Some(track)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &TrackHandle> {
        self.map.values()
    }
}

/// The task-owned mutable half of a stream.
pub(crate) struct StreamCore {
    handle: Arc<StreamHandle>,
    hub: Weak<RegistryInner>,
    bus: EventBus,
    state: StreamState,
    publisher: Option<Arc<dyn Publisher>>,
    subscribers: Subscribers,
    tracks: Tracks,
    timeouts: StreamTimeouts,
    deadline: TokioInstant,
    pulse_subs: HashMap<u64, Arc<dyn Subscriber>>,
}

impl StreamCore {
    pub(crate) fn new(
        handle: Arc<StreamHandle>,
        hub: Weak<RegistryInner>,
        bus: EventBus,
        wait_timeout: Duration,
    ) -> Self {
        let timeouts = StreamTimeouts {
            publish: handle.engine.publish_timeout,
            delay_close: handle.engine.delay_close_timeout,
            idle: handle.engine.idle_timeout,
        };
        Self {
            handle,
            hub,
            bus,
            state: StreamState::WaitPublish,
            publisher: None,
            subscribers: Subscribers::new(),
            tracks: Tracks::default(),
            timeouts,
            deadline: TokioInstant::now() + wait_timeout,
            pulse_subs: HashMap::new(),
        }
    }

    fn arm_timer(&mut self, after: Duration) {
        self.deadline = TokioInstant::now() + after;
    }

    /// Apply a state-machine action. History append, bus emission,
    /// publisher callback and subscriber broadcast happen before this
    /// returns, so a transition is atomic relative to other transitions.
    fn action(&mut self, action: StreamAction) -> bool {
        let Some(next) = next_state(self.state, action) else {
            tracing::debug!(
                stream = %self.handle.path,
                state = %self.state,
                action = %action,
                "Rejected action"
            );
            return false;
        };
        let event = StateEvent {
            path: self.handle.path.clone(),
            action,
            from: self.state,
            time: Instant::now(),
        };
        tracing::info!(
            stream = %self.handle.path,
            from = %event.from,
            to = %next,
            action = %action,
            "State transition"
        );
        self.state = next;
        self.handle.set_state_mirror(next);
        let history_len = self.handle.push_history(event.clone());

        let typed = match next {
            StreamState::WaitPublish => {
                let mut wait = Duration::ZERO;
                if let Some(publisher) = &self.publisher {
                    wait = publisher.info().config.wait_close_timeout;
                    for t in self.tracks.iter() {
                        t.set_state(TrackState::Offline);
                    }
                }
                self.subscribers.on_publisher_lost(event.clone());
                if let Some(suber) = self.subscribers.pick() {
                    if wait.is_zero() {
                        wait = suber.info().config.wait_timeout;
                    }
                } else if wait.is_zero() {
                    wait = DEFAULT_WAIT;
                }
                self.arm_timer(wait);
                tracing::debug!(stream = %self.handle.path, timeout = ?wait, "Waiting for publisher");
                StreamEvent::WaitPublish(event)
            }
            StreamState::Publishing => {
                self.arm_timer(self.timeouts.publish);
                if history_len > 1 {
                    StreamEvent::Republish(event)
                } else {
                    StreamEvent::Publish(event)
                }
            }
            StreamState::WaitClose => {
                let wait = if self.timeouts.idle > Duration::ZERO {
                    self.timeouts.idle
                } else {
                    self.timeouts.delay_close
                };
                self.arm_timer(wait);
                StreamEvent::WaitClose(event)
            }
            StreamState::Closed => {
                if let Some(hub) = self.hub.upgrade() {
                    hub.remove(&self.handle.path);
                }
                StreamEvent::Close(event)
            }
        };

        self.bus.publish(typed.clone());
        if let Some(publisher) = &self.publisher {
            publisher.on_event(typed.clone());
        }
        self.subscribers.broadcast(typed);

        // A publisher on an idle-closable stream with nobody watching
        // goes straight back out
        if self.state == StreamState::Publishing
            && self.timeouts.idle > Duration::ZERO
            && self.subscribers.len() == 0
        {
            return self.action(StreamAction::LastLeave);
        }
        true
    }

    fn publisher_config(&self) -> Option<crate::config::PublishConfig> {
        self.publisher.as_ref().map(|p| p.info().config.clone())
    }

    fn on_suber_close(&mut self, id: u64) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(stream = %self.handle.path, subscriber = id, "Subscriber removed");
            if let Some(publisher) = &self.publisher {
                publisher.on_event(StreamEvent::SubscriberLeft {
                    subscriber: id,
                    remaining: self.subscribers.len(),
                });
            }
        }
        self.handle.set_subscriber_mirror(self.subscribers.len());
        if (self.timeouts.delay_close > Duration::ZERO || self.timeouts.idle > Duration::ZERO)
            && self.subscribers.len() == 0
        {
            self.action(StreamAction::LastLeave);
        }
    }

    fn on_timer(&mut self) {
        if self.state == StreamState::Publishing {
            let reaped = self.subscribers.reap_internal();
            if reaped > 0 {
                tracing::info!(
                    stream = %self.handle.path,
                    reaped,
                    remains = self.subscribers.internal_len(),
                    "Internal subscribers reaped"
                );
            }
            for id in self.subscribers.closed_public_ids() {
                self.pulse_subs.remove(&id);
                self.on_suber_close(id);
            }
            let mut track_timeout = false;
            for t in self.tracks.iter() {
                if t.kind() == TrackKind::Data {
                    continue;
                }
                if let Some(age) = t.last_write_age() {
                    if age > self.timeouts.publish {
                        tracing::warn!(
                            stream = %self.handle.path,
                            track = t.name(),
                            age = ?age,
                            timeout = ?self.timeouts.publish,
                            "Track timeout"
                        );
                        track_timeout = true;
                    }
                }
            }
            if track_timeout || self.publisher.as_ref().is_some_and(|p| p.is_closed()) {
                self.action(StreamAction::PublishLost);
            } else {
                self.arm_timer(HEARTBEAT);
                // Subscribers stuck waiting for tracks give up and start
                self.subscribers.abort_wait();
            }
        } else {
            tracing::debug!(stream = %self.handle.path, state = %self.state, "State timeout");
            if !self.action(StreamAction::Timeout) {
                self.arm_timer(HEARTBEAT);
            }
        }
    }

    fn handle_message(&mut self, msg: ActionMessage) -> &'static str {
        match msg {
            ActionMessage::Publish(mut promise) => {
                let publisher = promise.value().clone();
                let republish = self
                    .publisher
                    .as_ref()
                    .is_some_and(|cur| cur.id() == publisher.id());
                if !republish {
                    let config = &publisher.info().config;
                    self.timeouts = StreamTimeouts {
                        publish: config.publish_timeout,
                        delay_close: config.delay_close_timeout,
                        idle: config.idle_timeout,
                    };
                    self.handle.set_publisher_kind(publisher.info().kind.clone());
                    self.publisher = Some(publisher);
                }
                if self.action(StreamAction::Publish) || republish {
                    promise.resolve();
                } else {
                    promise.reject(Error::BadTransition {
                        from: self.state,
                        action: StreamAction::Publish,
                    });
                }
                "publish"
            }
            ActionMessage::Subscribe(mut promise) => {
                let sub = promise.value().clone();
                let info = sub.info().clone();
                if info.internal {
                    self.subscribers.add_internal(sub);
                    promise.resolve();
                    return "subscribe";
                }
                let config = &info.config;
                let mut waits = TrackWaits::new(promise);
                if let Some(names) = info.arg(&config.sub_audio_arg) {
                    waits.audio.wait(split_names(names));
                } else if !config.sub_audio_tracks.is_empty() {
                    waits.audio.wait(config.sub_audio_tracks.clone());
                } else if config.sub_audio {
                    waits.audio.wait(Vec::new());
                }
                if let Some(names) = info.arg(&config.sub_video_arg) {
                    waits.video.wait(split_names(names));
                } else if !config.sub_video_tracks.is_empty() {
                    waits.video.wait(config.sub_video_tracks.clone());
                } else if config.sub_video {
                    waits.video.wait(Vec::new());
                }
                if let Some(names) = info.arg(&config.sub_data_arg) {
                    waits.data.wait(split_names(names));
                }
                if let Some(publisher) = self.publisher.clone() {
                    publisher.on_event(StreamEvent::SubscriberJoined {
                        subscriber: sub.id(),
                    });
                    for track in self.tracks.iter() {
                        waits.accept(track, &sub);
                    }
                    let pub_config = &publisher.info().config;
                    if !pub_config.pub_audio || self.subscribers.wait_aborted() {
                        waits.stop_audio();
                    }
                    if !pub_config.pub_video || self.subscribers.wait_aborted() {
                        waits.stop_video();
                    }
                }
                self.subscribers.add(sub, waits);
                self.handle.set_subscriber_mirror(self.subscribers.len());
                if self.subscribers.len() == 1 && self.state == StreamState::WaitClose {
                    self.action(StreamAction::FirstEnter);
                }
                "subscribe"
            }
            ActionMessage::Unsubscribe(id) => {
                self.pulse_subs.remove(&id);
                self.on_suber_close(id);
                "unsubscribe"
            }
            ActionMessage::AddTrack(mut promise) => {
                if self.state == StreamState::WaitPublish {
                    self.action(StreamAction::Publish);
                }
                let track = promise.value().clone();
                if self.tracks.add(track.clone()) {
                    promise.resolve();
                    tracing::info!(
                        stream = %self.handle.path,
                        track = track.name(),
                        total = self.tracks.len(),
                        "Track added"
                    );
                    self.handle.track_mirror_add(track.clone());
                    self.subscribers.on_track(&track);
                    if let Some(config) = self.publisher_config() {
                        // The other kind will never come: stop waiting on it
                        if track.kind() == TrackKind::Video && !config.pub_audio {
                            self.subscribers.abort_wait();
                        }
                        if track.kind() == TrackKind::Audio && !config.pub_video {
                            self.subscribers.abort_wait();
                        }
                    }
                    // Release waiting subscribers promptly even when the
                    // publish timeout is configured very large
                    self.arm_timer(HEARTBEAT);
                } else {
                    promise.reject(Error::DuplicateTrackName(track.name().to_string()));
                }
                "track"
            }
            ActionMessage::TrackRemoved(name) => {
                if let Some(track) = self.tracks.remove(&name) {
                    tracing::info!(
                        stream = %self.handle.path,
                        track = %name,
                        remains = self.tracks.len(),
                        "Track removed"
                    );
                    self.handle.track_mirror_remove(&name);
                    self.subscribers
                        .broadcast(StreamEvent::TrackRemoved(track.clone()));
                    if self.tracks.is_empty() {
                        self.action(StreamAction::PublishLost);
                    }
                    if track.kind() == TrackKind::Data {
                        track.dispose();
                    }
                }
                "track-removed"
            }
            ActionMessage::NoMoreTrack => {
                self.subscribers.abort_wait();
                "no-more-track"
            }
            ActionMessage::SubPulse(sub) => {
                self.pulse_subs.insert(sub.id(), sub);
                "sub-pulse"
            }
            ActionMessage::Bare(action) => {
                self.action(action);
                "action"
            }
        }
    }

    fn check_cost(&self, started: Instant, kind: &'static str) {
        let cost = started.elapsed();
        if cost > SLOW_ITERATION {
            tracing::warn!(stream = %self.handle.path, kind, cost = ?cost, "Slow loop iteration");
        }
    }
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',').map(str::to_string).collect()
}

/// The owning task: the only place a stream's state is mutated.
pub(crate) async fn run(mut core: StreamCore, mut rx: mpsc::Receiver<ActionMessage>) {
    core.bus.publish(StreamEvent::Created {
        path: core.handle.path.clone(),
        time: Instant::now(),
    });
    let period = core.handle.engine.pulse_interval;
    let mut pulse = tokio::time::interval_at(TokioInstant::now() + period, period);
    pulse.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let timer = tokio::time::sleep_until(core.deadline);
    tokio::pin!(timer);

    enum Wake {
        Pulse,
        Timer,
        Action(Option<ActionMessage>),
    }

    loop {
        let wake = tokio::select! {
            _ = pulse.tick() => Wake::Pulse,
            _ = &mut timer => Wake::Timer,
            msg = rx.recv() => Wake::Action(msg),
        };
        let started = Instant::now();
        let kind = match wake {
            Wake::Pulse => {
                for sub in core.pulse_subs.values() {
                    sub.on_event(StreamEvent::Pulse { time: started });
                }
                "pulse"
            }
            Wake::Timer => {
                core.on_timer();
                "timer"
            }
            Wake::Action(Some(msg)) => core.handle_message(msg),
            // Every handle is gone; nobody can reach the stream again
            Wake::Action(None) => {
                core.action(StreamAction::Close);
                "orphaned"
            }
        };
        if core.state == StreamState::Closed {
            close_and_drain(&mut rx);
            core.subscribers.dispose();
            for track in core.tracks.iter() {
                if track.kind() == TrackKind::Data {
                    track.dispose();
                }
            }
            core.check_cost(started, kind);
            return;
        }
        timer.as_mut().reset(core.deadline);
        core.check_cost(started, kind);
    }
}

/// Shut the queue and reject everything still buffered, so no enqueuer's
/// promise is lost to the close.
fn close_and_drain(rx: &mut mpsc::Receiver<ActionMessage>) {
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            ActionMessage::Publish(mut p) => p.reject(Error::StreamClosed),
            ActionMessage::Subscribe(mut p) => p.reject(Error::StreamClosed),
            ActionMessage::AddTrack(mut p) => p.reject(Error::StreamClosed),
            _ => {}
        }
    }
}
