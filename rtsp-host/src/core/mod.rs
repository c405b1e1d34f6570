//! Core module - shared pipeline types, configuration and logging

#[macro_use]
pub mod logger;
mod app;
mod config;
mod events;
mod frame;
mod queue;

pub use app::{run, PlayOptions};
pub use config::{
    is_debug, is_verbose, PlayerConfig, DEBUG, DEFAULT_RTSP_PORT, MAX_TRANSPORT_ERRORS,
    STARVATION_THRESHOLD, VERBOSE,
};
pub use events::{ErrorMarker, EventSink, Payload, PlaybackState, PlayerEvent};
pub use frame::{Frame, FrameData, FrameError, Surface};
pub use queue::FrameQueue;
