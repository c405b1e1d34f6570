//! Audio decoder
//!
//! Converts L16 (16-bit big-endian PCM, the RTP payload layout) to f32 for playback.

use super::start_audio_playback;
use crate::codec::{DecoderError, MediaDecoder, MediaFormat, OutputBuffer, OutputStatus, MIME_PCM};
use crate::core::Surface;
use crossbeam_channel::Sender;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const INPUT_SLOT: usize = 0;

struct PendingSamples {
    index: usize,
    timestamp_us: i64,
    samples: Vec<f32>,
}

pub struct PcmDecoder {
    output: Option<Sender<Vec<f32>>>,
    started: bool,
    pending: VecDeque<PendingSamples>,
    end_of_stream: bool,
    next_index: usize,
    dropped: u64,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self {
            output: None,
            started: false,
            pending: VecDeque::new(),
            end_of_stream: false,
            next_index: 0,
            dropped: 0,
        }
    }

    /// Decoder that hands samples to `output` instead of an audio device
    pub fn with_output(output: Sender<Vec<f32>>) -> Self {
        Self {
            output: Some(output),
            ..Self::new()
        }
    }
}

impl Default for PcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert 16-bit big-endian PCM to f32 in [-1.0, 1.0)
pub fn l16_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|chunk| i16::from_be_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

impl MediaDecoder for PcmDecoder {
    fn name(&self) -> &str {
        "pcm"
    }

    fn configure(
        &mut self,
        format: &MediaFormat,
        _surface: Option<Arc<Surface>>,
    ) -> Result<(), DecoderError> {
        if format.mime != MIME_PCM {
            return Err(DecoderError::Configure(format!("pcm cannot decode {}", format.mime)));
        }
        if format.sample_rate_hz == 0 || format.channel_count == 0 {
            return Err(DecoderError::Configure(format!(
                "invalid audio format {} Hz x {}",
                format.sample_rate_hz, format.channel_count
            )));
        }
        if self.output.is_none() {
            let channels = u16::try_from(format.channel_count)
                .map_err(|_| DecoderError::Configure("too many channels".into()))?;
            let output = start_audio_playback(format.sample_rate_hz, channels)
                .map_err(|e| DecoderError::Configure(format!("playback thread: {}", e)))?;
            self.output = Some(output);
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DecoderError> {
        if self.output.is_none() {
            return Err(DecoderError::NotStarted);
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<usize>, DecoderError> {
        if !self.started {
            return Err(DecoderError::NotStarted);
        }
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
        } else if !data.is_empty() {
            self.next_index += 1;
            self.pending.push_back(PendingSamples {
                index: self.next_index,
                timestamp_us,
                samples: l16_to_f32(data),
            });
        }
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<OutputStatus, DecoderError> {
        Ok(match self.pending.front() {
            Some(pending) => OutputStatus::Buffer(OutputBuffer {
                index: pending.index,
                size: pending.samples.len(),
                timestamp_us: pending.timestamp_us,
                end_of_stream: false,
            }),
            None if self.end_of_stream => OutputStatus::Buffer(OutputBuffer {
                index: 0,
                size: 0,
                timestamp_us: 0,
                end_of_stream: true,
            }),
            None => OutputStatus::TryAgainLater,
        })
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), DecoderError> {
        if index == 0 && self.pending.is_empty() {
            return Ok(());
        }
        match self.pending.front() {
            Some(pending) if pending.index == index => {}
            _ => return Err(DecoderError::InvalidIndex(index)),
        }
        let Some(pending) = self.pending.pop_front() else {
            return Err(DecoderError::InvalidIndex(index));
        };
        if render {
            if let Some(output) = &self.output {
                // Playback buffer full, drop samples to avoid latency buildup
                if output.try_send(pending.samples).is_err() {
                    self.dropped += 1;
                    if self.dropped % 100 == 1 {
                        log_verbose!("AUDIO", "Playback full, {} buffers dropped", self.dropped);
                    }
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.pending.clear();
        // Dropping the sender ends the playback thread
        self.output = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn converts_big_endian_samples() {
        let samples = l16_to_f32(&[0x40, 0x00, 0xC0, 0x00, 0x7F]);
        assert_eq!(samples, vec![0.5, -0.5]);
    }

    #[test]
    fn rendered_buffers_reach_the_output() {
        let (tx, rx) = unbounded();
        let mut decoder = PcmDecoder::with_output(tx);
        decoder
            .configure(&MediaFormat::audio(MIME_PCM, 8000, 1, None), None)
            .unwrap();
        decoder.start().unwrap();

        let slot = decoder.dequeue_input(Duration::ZERO).unwrap().unwrap();
        decoder.queue_input(slot, &[0x40, 0x00], 125, false).unwrap();
        let OutputStatus::Buffer(buffer) = decoder.dequeue_output(Duration::ZERO).unwrap() else {
            panic!("expected a buffer");
        };
        assert_eq!(buffer.timestamp_us, 125);
        decoder.release_output(buffer.index, true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![0.5]);
        assert!(decoder.release_output(buffer.index, true).is_err());
    }

    #[test]
    fn rejects_other_codecs() {
        let mut decoder = PcmDecoder::new();
        let format = MediaFormat::audio(crate::codec::MIME_AAC, 44_100, 2, None);
        assert!(decoder.configure(&format, None).is_err());
    }
}
