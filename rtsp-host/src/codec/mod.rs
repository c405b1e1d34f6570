//! Decoder abstraction used by the decode loops
//!
//! Modeled on a slot-based hardware codec: the loop borrows an input slot,
//! fills it, then polls for output buffers and releases them to the surface.

pub mod h264;
mod software;

pub use software::SoftwareDecoderFactory;

use crate::core::Surface;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const MIME_H264: &str = "video/avc";
pub const MIME_H265: &str = "video/hevc";
pub const MIME_AAC: &str = "audio/mp4a-latm";
pub const MIME_PCM: &str = "audio/raw";

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("no decoder available for {0}")]
    Unsupported(String),
    #[error("decoder configuration failed: {0}")]
    Configure(String),
    #[error("decoder used before configure/start")]
    NotStarted,
    #[error("invalid buffer index {0}")]
    InvalidIndex(usize),
    #[error("decode failed: {0}")]
    Codec(String),
}

/// Format handed to `MediaDecoder::configure`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate_hz: u32,
    pub channel_count: u32,
    pub codec_config: Option<Vec<u8>>,
}

impl MediaFormat {
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: mime.to_string(),
            width,
            height,
            sample_rate_hz: 0,
            channel_count: 0,
            codec_config: None,
        }
    }

    pub fn audio(
        mime: &str,
        sample_rate_hz: u32,
        channel_count: u32,
        codec_config: Option<Vec<u8>>,
    ) -> Self {
        Self {
            mime: mime.to_string(),
            width: 0,
            height: 0,
            sample_rate_hz,
            channel_count,
            codec_config,
        }
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }
}

/// Frame sizes a video decoder accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoCapabilities {
    pub width_alignment: u32,
    pub height_alignment: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl VideoCapabilities {
    pub fn is_size_supported(&self, width: u32, height: u32) -> bool {
        width >= self.min_width
            && height >= self.min_height
            && width <= self.max_width
            && height <= self.max_height
            && width % self.width_alignment.max(1) == 0
            && height % self.height_alignment.max(1) == 0
    }

    /// Requested size if supported, otherwise each dimension rounded up to
    /// the next multiple of the decoder's alignment.
    pub fn safe_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.is_size_supported(width, height) {
            return (width, height);
        }
        let wa = self.width_alignment.max(1);
        let ha = self.height_alignment.max(1);
        (ceil_divide(width, wa) * wa, ceil_divide(height, ha) * ha)
    }
}

fn ceil_divide(numerator: u32, denominator: u32) -> u32 {
    numerator.div_ceil(denominator)
}

/// A decoded buffer ready to be released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBuffer {
    pub index: usize,
    pub size: usize,
    pub timestamp_us: i64,
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    TryAgainLater,
    FormatChanged(String),
    Buffer(OutputBuffer),
}

/// Created and driven entirely on the decode loop's own thread.
pub trait MediaDecoder {
    fn name(&self) -> &str;

    /// Size constraints, `None` for audio decoders
    fn video_capabilities(&self) -> Option<VideoCapabilities> {
        None
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Arc<Surface>>,
    ) -> Result<(), DecoderError>;

    fn start(&mut self) -> Result<(), DecoderError>;

    /// Borrow a free input slot, waiting at most `timeout`
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>, DecoderError>;

    /// Submit `data` in a borrowed slot; empty data with `end_of_stream`
    /// signals the end of input
    fn queue_input(
        &mut self,
        slot: usize,
        data: &[u8],
        timestamp_us: i64,
        end_of_stream: bool,
    ) -> Result<(), DecoderError>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, DecoderError>;

    /// Give an output buffer back, rendering it to the surface when `render`
    fn release_output(&mut self, index: usize, render: bool) -> Result<(), DecoderError>;

    fn stop(&mut self);
}

/// Creates decoders by mime type
pub trait DecoderFactory: Send + Sync {
    fn supports(&self, mime: &str) -> bool;

    fn create(&self, mime: &str) -> Result<Box<dyn MediaDecoder>, DecoderError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted decoder for exercising the decode loops without a codec

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What the scripted decoder observed, shared with the test
    #[derive(Default)]
    pub struct DecoderLog {
        pub configured: Option<MediaFormat>,
        pub inputs: Vec<(Vec<u8>, i64)>,
        pub empty_inputs: usize,
        pub end_of_stream_queued: bool,
        pub rendered: Vec<i64>,
        pub stopped: bool,
    }

    pub struct ScriptedDecoder {
        pub log: Arc<Mutex<DecoderLog>>,
        pub capabilities: Option<VideoCapabilities>,
        pub fail_configure: bool,
        /// Emit an end-of-stream output after this many rendered buffers
        pub end_after: Option<usize>,
        pending: VecDeque<i64>,
        next_index: usize,
    }

    impl ScriptedDecoder {
        pub fn new(log: Arc<Mutex<DecoderLog>>) -> Self {
            Self {
                log,
                capabilities: None,
                fail_configure: false,
                end_after: None,
                pending: VecDeque::new(),
                next_index: 0,
            }
        }
    }

    impl MediaDecoder for ScriptedDecoder {
        fn name(&self) -> &str {
            "scripted"
        }

        fn video_capabilities(&self) -> Option<VideoCapabilities> {
            self.capabilities
        }

        fn configure(
            &mut self,
            format: &MediaFormat,
            _surface: Option<Arc<Surface>>,
        ) -> Result<(), DecoderError> {
            if self.fail_configure {
                return Err(DecoderError::Configure("scripted failure".into()));
            }
            self.log.lock().unwrap().configured = Some(format.clone());
            Ok(())
        }

        fn start(&mut self) -> Result<(), DecoderError> {
            Ok(())
        }

        fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<usize>, DecoderError> {
            Ok(Some(0))
        }

        fn queue_input(
            &mut self,
            _slot: usize,
            data: &[u8],
            timestamp_us: i64,
            end_of_stream: bool,
        ) -> Result<(), DecoderError> {
            let mut log = self.log.lock().unwrap();
            if end_of_stream {
                log.end_of_stream_queued = true;
            } else if data.is_empty() {
                log.empty_inputs += 1;
            } else {
                log.inputs.push((data.to_vec(), timestamp_us));
                self.pending.push_back(timestamp_us);
            }
            Ok(())
        }

        fn dequeue_output(&mut self, _timeout: Duration) -> Result<OutputStatus, DecoderError> {
            let rendered = self.log.lock().unwrap().rendered.len();
            if let Some(limit) = self.end_after {
                if rendered >= limit {
                    return Ok(OutputStatus::Buffer(OutputBuffer {
                        index: usize::MAX,
                        size: 0,
                        timestamp_us: 0,
                        end_of_stream: true,
                    }));
                }
            }
            match self.pending.front() {
                Some(&timestamp_us) => {
                    self.next_index += 1;
                    Ok(OutputStatus::Buffer(OutputBuffer {
                        index: self.next_index,
                        size: 1,
                        timestamp_us,
                        end_of_stream: false,
                    }))
                }
                None => Ok(OutputStatus::TryAgainLater),
            }
        }

        fn release_output(&mut self, _index: usize, render: bool) -> Result<(), DecoderError> {
            if let Some(ts) = self.pending.pop_front() {
                if render {
                    self.log.lock().unwrap().rendered.push(ts);
                }
            }
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().stopped = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> VideoCapabilities {
        VideoCapabilities {
            width_alignment: 16,
            height_alignment: 16,
            min_width: 16,
            min_height: 16,
            max_width: 4096,
            max_height: 2304,
        }
    }

    #[test]
    fn supported_size_is_kept() {
        assert_eq!(caps().safe_size(1920, 1088), (1920, 1088));
    }

    #[test]
    fn unsupported_size_rounds_up_to_alignment() {
        assert!(!caps().is_size_supported(1920, 1080));
        assert_eq!(caps().safe_size(1920, 1080), (1920, 1088));
        assert_eq!(caps().safe_size(1, 17), (16, 32));
    }
}
