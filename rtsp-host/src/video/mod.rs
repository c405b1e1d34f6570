//! Video module - Decoding and decode loop

mod decoder;
pub mod pipeline;

pub use decoder::OpenH264Decoder;
pub use pipeline::{DecodeCallbacks, DecodeLoop, DecodeParams, StarvationCounter};
