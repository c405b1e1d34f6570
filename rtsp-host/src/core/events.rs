//! Playback lifecycle events reported to the presentation layer
//!
//! States are reported, never queried: the observer infers transitions from
//! the order of emissions. Sending never blocks and never fails.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PlaybackState {
    None = 0,
    Idle = 1,
    Buffering = 2,
    Ready = 3,
    Ended = 4,
    Started = 11,
    Stopped = 12,
    /// Video is being shown on the surface; payload carries the pacing delta
    Playing = 13,
    Paused = 14,
    /// First decoded frame of a loop was rendered, emitted once per loop
    TimelineChanged = 15,
    SpeedChanged = 16,
    ReplayArchive = 17,
    ErrorOccurred = 600,
    /// Video decoder kept finding its queue empty
    ErrorVideoDecoder = 601,
    /// Audio decoder kept finding its queue empty
    ErrorQueueFrame = 602,
    Released = 666,
}

impl PlaybackState {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            PlaybackState::ErrorOccurred
                | PlaybackState::ErrorVideoDecoder
                | PlaybackState::ErrorQueueFrame
        )
    }
}

/// Typed error markers carried by `ErrorOccurred`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMarker {
    /// Upstream answered 204: the requested archive range does not exist
    ArchiveUnavailable,
    /// A socket read timed out; the controller retries these
    SocketReadTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Stream start time reported by the session (milliseconds)
    Timestamp(i64),
    /// Milliseconds between the last two rendered frames
    PacingMs(i64),
    Marker(ErrorMarker),
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    State {
        state: PlaybackState,
        payload: Option<Payload>,
    },
    /// Show (true) or hide (false) the empty/error placeholder
    EmptyScreen(bool),
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerEvent::State {
                state,
                payload: Some(payload),
            } => write!(f, "{:?}({}) {:?}", state, state.code(), payload),
            PlayerEvent::State {
                state,
                payload: None,
            } => write!(f, "{:?}({})", state, state.code()),
            PlayerEvent::EmptyScreen(show) => write!(f, "EmptyScreen({})", show),
        }
    }
}

/// Fire-and-forget sender half of the event channel
#[derive(Clone)]
pub struct EventSink {
    tx: Option<Sender<PlayerEvent>>,
}

impl EventSink {
    /// Create a connected sink and the receiver the presentation layer drains
    pub fn channel() -> (Self, Receiver<PlayerEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, state: PlaybackState, payload: Option<Payload>) {
        log_verbose!("EVENT", "{:?} {:?}", state, payload);
        self.send(PlayerEvent::State { state, payload });
    }

    pub fn show_empty(&self, show: bool) {
        self.send(PlayerEvent::EmptyScreen(show));
    }

    fn send(&self, event: PlayerEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching anymore
            let _ = tx.send(event);
        }
    }
}
