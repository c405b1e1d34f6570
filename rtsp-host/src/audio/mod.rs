//! Audio module - PCM decoding and playback
//!
//! The audio decode loop is the generic `video::DecodeLoop` run without
//! pacing or timeline callbacks.

mod decoder;
mod playback;

pub use decoder::PcmDecoder;
pub use playback::start_audio_playback;
