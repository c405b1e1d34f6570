//! H264 Video Decoder using OpenH264
//! Cross-platform decoder that works on macOS/Windows/Linux without system dependencies

use crate::codec::h264::{self, START_CODE};
use crate::codec::{
    DecoderError, MediaDecoder, MediaFormat, OutputBuffer, OutputStatus, VideoCapabilities,
};
use crate::core::{FrameData, Surface};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INPUT_SLOT: usize = 0;

/// Decoded picture waiting to be released to the surface
struct PendingPicture {
    index: usize,
    frame: FrameData,
}

pub struct OpenH264Decoder {
    decoder: Option<Decoder>,
    surface: Option<Arc<Surface>>,
    started: bool,
    pending: VecDeque<PendingPicture>,
    format_change: Option<String>,
    current_size: (u32, u32),
    end_of_stream: bool,
    next_index: usize,
    unit_count: u64,
    frame_count: u64,
    error_count: u64,
    last_log: Instant,
    waiting_for_keyframe: bool,
}

impl OpenH264Decoder {
    pub fn new() -> Self {
        Self {
            decoder: None,
            surface: None,
            started: false,
            pending: VecDeque::new(),
            format_change: None,
            current_size: (0, 0),
            end_of_stream: false,
            next_index: 0,
            unit_count: 0,
            frame_count: 0,
            error_count: 0,
            last_log: Instant::now(),
            waiting_for_keyframe: true,
        }
    }

    /// Reset decoder to recover from errors
    fn reset_decoder(&mut self) -> Result<(), DecoderError> {
        log_verbose!("DEC", "Resetting decoder...");
        self.decoder = Some(
            Decoder::new().map_err(|e| DecoderError::Codec(format!("OpenH264 reset failed: {:?}", e)))?,
        );
        self.waiting_for_keyframe = true;
        log_verbose!("DEC", "Decoder reset complete, waiting for keyframe...");
        Ok(())
    }

    fn decode_unit(&mut self, unit: &[u8], timestamp_us: i64) -> Result<(), DecoderError> {
        self.unit_count += 1;

        if self.waiting_for_keyframe {
            if h264::is_keyframe(unit) {
                log_verbose!("DEC", "Found keyframe (unit {}), resuming decode", self.unit_count);
                self.waiting_for_keyframe = false;
            } else {
                if self.unit_count % 100 == 0 {
                    log_verbose!(
                        "DEC",
                        "Skipping non-keyframe unit {}, waiting for keyframe",
                        self.unit_count
                    );
                }
                return Ok(());
            }
        }

        let decoder = self.decoder.as_mut().ok_or(DecoderError::NotStarted)?;
        let (decoded, failure) = match decoder.decode(unit) {
            Ok(Some(yuv)) => {
                let (width, height) = yuv.dimensions();
                let (y_stride, u_stride, _v_stride) = yuv.strides();
                let frame = pack_planes(
                    yuv.y(),
                    yuv.u(),
                    yuv.v(),
                    width,
                    height,
                    y_stride,
                    u_stride,
                    timestamp_us,
                );
                (Some(frame), None)
            }
            // No picture yet (need more NAL units)
            Ok(None) => (None, None),
            Err(e) => (None, Some(format!("{:?}", e))),
        };

        if let Some(message) = failure {
            self.error_count += 1;
            if self.error_count % 50 == 0 {
                log_verbose!(
                    "DEC",
                    "Decode error (unit {}): {}, resetting decoder",
                    self.unit_count,
                    message
                );
                self.reset_decoder()?;
            } else if self.error_count % 10 == 0 {
                log_verbose!("DEC", "Decode error (unit {}): {}", self.unit_count, message);
            }
        }

        if let Some(frame) = decoded {
            self.frame_count += 1;
            let size = (frame.width, frame.height);
            if size != self.current_size {
                self.current_size = size;
                self.format_change = Some(format!("video/raw i420 {}x{}", size.0, size.1));
            }
            self.next_index += 1;
            self.pending.push_back(PendingPicture {
                index: self.next_index,
                frame,
            });
        }

        if self.last_log.elapsed().as_secs() >= 5 {
            log_verbose!(
                "DEC",
                "Stats: units={}, frames={}, errors={}, pending={}, waiting_keyframe={}",
                self.unit_count,
                self.frame_count,
                self.error_count,
                self.pending.len(),
                self.waiting_for_keyframe
            );
            self.last_log = Instant::now();
        }
        Ok(())
    }
}

impl Default for OpenH264Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy planes (stride-aware) into packed I420
#[allow(clippy::too_many_arguments)]
fn pack_planes(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: usize,
    height: usize,
    y_stride: usize,
    uv_stride: usize,
    timestamp_us: i64,
) -> FrameData {
    // Odd sizes keep the last half-covered chroma row and column
    let uv_h = height.div_ceil(2);
    let uv_w = width.div_ceil(2);

    let mut y_packed = Vec::with_capacity(width * height);
    for row in 0..height {
        y_packed.extend_from_slice(&y_plane[row * y_stride..row * y_stride + width]);
    }

    let mut u_packed = Vec::with_capacity(uv_w * uv_h);
    let mut v_packed = Vec::with_capacity(uv_w * uv_h);
    for row in 0..uv_h {
        u_packed.extend_from_slice(&u_plane[row * uv_stride..row * uv_stride + uv_w]);
        v_packed.extend_from_slice(&v_plane[row * uv_stride..row * uv_stride + uv_w]);
    }

    FrameData {
        width: width as u32,
        height: height as u32,
        y_plane: Arc::new(y_packed),
        u_plane: Arc::new(u_packed),
        v_plane: Arc::new(v_packed),
        y_stride: width,
        uv_stride: uv_w,
        timestamp_us,
    }
}

impl MediaDecoder for OpenH264Decoder {
    fn name(&self) -> &str {
        "openh264"
    }

    fn video_capabilities(&self) -> Option<VideoCapabilities> {
        Some(VideoCapabilities {
            width_alignment: 2,
            height_alignment: 2,
            min_width: 16,
            min_height: 16,
            max_width: 3840,
            max_height: 2160,
        })
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<Arc<Surface>>,
    ) -> Result<(), DecoderError> {
        if !format.is_video() {
            return Err(DecoderError::Configure(format!(
                "openh264 cannot decode {}",
                format.mime
            )));
        }
        let surface = surface.ok_or_else(|| DecoderError::Configure("no surface bound".into()))?;
        let decoder = Decoder::new()
            .map_err(|e| DecoderError::Configure(format!("OpenH264 init failed: {:?}", e)))?;
        log_verbose!("DEC", "Configured openh264 for {}x{}", format.width, format.height);
        self.decoder = Some(decoder);
        self.surface = Some(surface);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DecoderError> {
        if self.decoder.is_none() {
            return Err(DecoderError::NotStarted);
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<usize>, DecoderError> {
        if !self.started {
            return Err(DecoderError::NotStarted);
        }
        // Input is decoded synchronously, so the single slot is always free
        Ok(Some(INPUT_SLOT))
    }

    fn queue_input(
        &mut self,
        slot: usize,
        data: &[u8],
        timestamp_us: i64,
        end_of_stream: bool,
    ) -> Result<(), DecoderError> {
        if slot != INPUT_SLOT {
            return Err(DecoderError::InvalidIndex(slot));
        }
        if end_of_stream {
            self.end_of_stream = true;
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        if h264::has_start_code(data) {
            self.decode_unit(data, timestamp_us)
        } else {
            let mut unit = Vec::with_capacity(START_CODE.len() + data.len());
            unit.extend_from_slice(START_CODE);
            unit.extend_from_slice(data);
            self.decode_unit(&unit, timestamp_us)
        }
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<OutputStatus, DecoderError> {
        if let Some(description) = self.format_change.take() {
            return Ok(OutputStatus::FormatChanged(description));
        }
        if let Some(picture) = self.pending.front() {
            let frame = &picture.frame;
            return Ok(OutputStatus::Buffer(OutputBuffer {
                index: picture.index,
                size: frame.y_plane.len() + frame.u_plane.len() + frame.v_plane.len(),
                timestamp_us: frame.timestamp_us,
                end_of_stream: false,
            }));
        }
        if self.end_of_stream {
            return Ok(OutputStatus::Buffer(OutputBuffer {
                index: 0,
                size: 0,
                timestamp_us: 0,
                end_of_stream: true,
            }));
        }
        Ok(OutputStatus::TryAgainLater)
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), DecoderError> {
        if index == 0 && self.end_of_stream && self.pending.is_empty() {
            return Ok(());
        }
        match self.pending.front() {
            Some(picture) if picture.index == index => {}
            _ => return Err(DecoderError::InvalidIndex(index)),
        }
        let picture = self.pending.pop_front().ok_or(DecoderError::InvalidIndex(index))?;
        if render {
            if let Some(surface) = &self.surface {
                let skipped = surface.present(picture.frame);
                if skipped && self.frame_count % 100 == 0 {
                    log_verbose!("DEC", "Frame skipped at #{}", self.frame_count);
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.pending.clear();
        self.decoder = None;
        log_verbose!(
            "DEC",
            "Stopped after {} units, {} frames",
            self.unit_count,
            self.frame_count
        );
    }
}
