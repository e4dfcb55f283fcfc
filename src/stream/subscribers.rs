//! The subscriber set and track-wait bookkeeping
//!
//! Subscribers register with up to three waits (audio, video, data). The
//! subscribe promise resolves once every wait is satisfied by a matching
//! track or stopped (publisher disables the kind, wait aborted, or the
//! heartbeat gives up on it). Engine-internal pullers live in a separate
//! set and skip the wait machinery.

use std::collections::HashMap;
use std::sync::Arc;

use super::events::StreamEvent;
use super::state::StateEvent;
use crate::peer::Subscriber;
use crate::promise::Promise;
use crate::track::{TrackHandle, TrackKind};

/// One wait for a kind of track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackWait {
    /// Not waiting for this kind; counts as satisfied
    Idle,
    /// Waiting for any track (empty list) or for one of the named tracks
    Waiting(Vec<String>),
    /// Satisfied or stopped
    Done,
}

impl TrackWait {
    /// Arm the wait; an empty name list accepts any track of the kind
    pub(crate) fn wait(&mut self, names: Vec<String>) {
        *self = TrackWait::Waiting(names);
    }

    /// Whether `track` satisfies this wait
    fn matches(&self, track: &TrackHandle) -> bool {
        match self {
            TrackWait::Waiting(names) => {
                names.is_empty() || names.iter().any(|n| n == track.name())
            }
            _ => false,
        }
    }

    fn stop(&mut self) {
        if matches!(self, TrackWait::Waiting(_)) {
            *self = TrackWait::Done;
        }
    }

    fn satisfied(&self) -> bool {
        !matches!(self, TrackWait::Waiting(_))
    }
}

/// The three waits of one subscription, owning the subscribe promise.
pub(crate) struct TrackWaits {
    promise: Promise<Arc<dyn Subscriber>>,
    pub(crate) audio: TrackWait,
    pub(crate) video: TrackWait,
    pub(crate) data: TrackWait,
}

impl TrackWaits {
    pub(crate) fn new(promise: Promise<Arc<dyn Subscriber>>) -> Self {
        Self {
            promise,
            audio: TrackWait::Idle,
            video: TrackWait::Idle,
            data: TrackWait::Idle,
        }
    }

    /// Offer a track; on a match the subscriber learns about it and the
    /// wait completes. Resolves the promise when nothing is left to wait
    /// for.
    pub(crate) fn accept(&mut self, track: &TrackHandle, sub: &Arc<dyn Subscriber>) {
        let wait = match track.kind() {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
            TrackKind::Data => &mut self.data,
        };
        if wait.matches(track) {
            *wait = TrackWait::Done;
            sub.on_event(StreamEvent::TrackAdded(track.clone()));
            self.try_resolve();
        }
    }

    pub(crate) fn stop_audio(&mut self) {
        self.audio.stop();
        self.try_resolve();
    }

    pub(crate) fn stop_video(&mut self) {
        self.video.stop();
        self.try_resolve();
    }

    /// Stop every wait and resolve
    pub(crate) fn abort(&mut self) {
        self.audio.stop();
        self.video.stop();
        self.data.stop();
        self.try_resolve();
    }

    pub(crate) fn try_resolve(&mut self) {
        if self.audio.satisfied() && self.video.satisfied() && self.data.satisfied() {
            self.promise.resolve();
        }
    }
}

struct SubscriberSlot {
    sub: Arc<dyn Subscriber>,
    waits: TrackWaits,
}

/// The subscribers of one stream. Owned and mutated only by the stream's
/// task.
#[derive(Default)]
pub(crate) struct Subscribers {
    internal: HashMap<u64, Arc<dyn Subscriber>>,
    public: HashMap<u64, SubscriberSlot>,
    wait_aborted: bool,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of public subscribers
    pub(crate) fn len(&self) -> usize {
        self.public.len()
    }

    pub(crate) fn internal_len(&self) -> usize {
        self.internal.len()
    }

    pub(crate) fn wait_aborted(&self) -> bool {
        self.wait_aborted
    }

    /// Insert a public subscriber; the promise inside `waits` resolves
    /// now if nothing is pending.
    pub(crate) fn add(&mut self, sub: Arc<dyn Subscriber>, mut waits: TrackWaits) {
        waits.try_resolve();
        self.public.insert(sub.id(), SubscriberSlot { sub, waits });
    }

    pub(crate) fn add_internal(&mut self, sub: Arc<dyn Subscriber>) {
        self.internal.insert(sub.id(), sub);
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Arc<dyn Subscriber>> {
        self.public.remove(&id).map(|slot| slot.sub)
    }

    /// Any one public subscriber, if present
    pub(crate) fn pick(&self) -> Option<&Arc<dyn Subscriber>> {
        self.public.values().next().map(|slot| &slot.sub)
    }

    /// Deliver an event to every subscriber, internal ones included
    pub(crate) fn broadcast(&self, event: StreamEvent) {
        for sub in self.internal.values() {
            sub.on_event(event.clone());
        }
        for slot in self.public.values() {
            slot.sub.on_event(event.clone());
        }
    }

    /// Publisher dropped: tell everyone
    pub(crate) fn on_publisher_lost(&self, event: StateEvent) {
        self.broadcast(StreamEvent::PublisherLost(event));
    }

    /// A track arrived: satisfy matching waits
    pub(crate) fn on_track(&mut self, track: &TrackHandle) {
        for slot in self.public.values_mut() {
            slot.waits.accept(track, &slot.sub);
        }
    }

    /// Stop blocking every current and future wait. Sticky.
    pub(crate) fn abort_wait(&mut self) {
        self.wait_aborted = true;
        for slot in self.public.values_mut() {
            slot.waits.abort();
        }
    }

    /// Drop internal subscribers whose sessions are gone
    pub(crate) fn reap_internal(&mut self) -> usize {
        let before = self.internal.len();
        self.internal.retain(|_, sub| !sub.is_closed());
        before - self.internal.len()
    }

    /// Ids of public subscribers whose sessions are gone
    pub(crate) fn closed_public_ids(&self) -> Vec<u64> {
        self.public
            .iter()
            .filter(|(_, slot)| slot.sub.is_closed())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tear down the set; pending promises resolve through their waits
    /// being dropped by the close broadcast that preceded this call.
    pub(crate) fn dispose(&mut self) {
        self.internal.clear();
        self.public.clear();
    }
}
