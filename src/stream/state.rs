//! Stream states, actions and the transition table

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// No publisher yet (or the publisher dropped); subscribers may wait
    WaitPublish = 0,
    /// A publisher is delivering media
    Publishing = 1,
    /// Last subscriber left; delayed close pending
    WaitClose = 2,
    /// Terminal; the stream is gone from the registry
    Closed = 3,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::WaitPublish => "wait-publish",
            StreamState::Publishing => "publishing",
            StreamState::WaitClose => "wait-close",
            StreamState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Actions driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    /// A publisher was accepted
    Publish,
    /// The state timer expired
    Timeout,
    /// The publisher disappeared (track silence or session close)
    PublishLost,
    /// Deliberate close
    Close,
    /// The last subscriber left
    LastLeave,
    /// The first subscriber arrived while waiting to close
    FirstEnter,
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamAction::Publish => "publish",
            StreamAction::Timeout => "timeout",
            StreamAction::PublishLost => "publish lost",
            StreamAction::Close => "close",
            StreamAction::LastLeave => "last leave",
            StreamAction::FirstEnter => "first enter",
        };
        write!(f, "{}", name)
    }
}

/// The transition table. `None` means the action is rejected in that state.
pub fn next_state(state: StreamState, action: StreamAction) -> Option<StreamState> {
    use StreamAction::*;
    use StreamState::*;
    match (state, action) {
        (WaitPublish, Publish) => Some(Publishing),
        (WaitPublish, Timeout) => Some(Closed),
        (WaitPublish, LastLeave) => Some(Closed),
        (WaitPublish, Close) => Some(Closed),
        (Publishing, PublishLost) => Some(WaitPublish),
        (Publishing, LastLeave) => Some(WaitClose),
        (Publishing, Close) => Some(Closed),
        (WaitClose, PublishLost) => Some(Closed),
        (WaitClose, Timeout) => Some(Closed),
        (WaitClose, FirstEnter) => Some(Publishing),
        (WaitClose, Close) => Some(Closed),
        _ => None,
    }
}

/// One accepted transition, recorded in the stream's history.
#[derive(Debug, Clone)]
pub struct StateEvent {
    /// Stream path the event belongs to
    pub path: Arc<str>,

    /// The action that fired
    pub action: StreamAction,

    /// The state the stream left
    pub from: StreamState,

    /// When the transition happened
    pub time: Instant,
}

/// Whether a close recorded in `history` was deliberate (an explicit
/// Close, or a WaitClose window running out) rather than a failure path.
pub fn is_shutdown(history: &[StateEvent]) -> bool {
    match history.last() {
        None => false,
        Some(last) => match last.action {
            StreamAction::Close => true,
            StreamAction::Timeout => last.from == StreamState::WaitClose,
            _ => false,
        },
    }
}
