//! RTSP-Host Library
//!
//! Real-time stream ingestion: a session controller feeding per-track frame
//! queues that decode loops drain into decoders and a display surface.

#[macro_use]
pub mod core;
pub mod audio;
pub mod codec;
pub mod network;
pub mod utils;
pub mod video;

// Re-export commonly used items
pub use crate::core::{run, EventSink, PlaybackState, PlayerConfig, PlayerEvent, Surface};
pub use network::{SessionController, StreamTarget};
