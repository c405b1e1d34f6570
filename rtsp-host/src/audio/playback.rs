//! Audio playback
//!
//! Plays PCM audio samples using cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

/// Samples to buffer before old ones are dropped, per channel
const BUFFER_SIZE: usize = 4096;

/// Start the audio playback thread.
///
/// The thread plays whatever arrives on the returned sender and exits once
/// every sender is dropped.
pub fn start_audio_playback(sample_rate: u32, channels: u16) -> std::io::Result<Sender<Vec<f32>>> {
    let (tx, rx) = bounded::<Vec<f32>>(64);

    thread::Builder::new()
        .name("audio-playback".into())
        .spawn(move || {
            // Get default audio output device
            let host = cpal::default_host();
            let device = match host.default_output_device() {
                Some(d) => d,
                None => {
                    log_error!("AUDIO", "No audio output device found");
                    return;
                }
            };

            let config = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            // Shared buffer for samples
            let capacity = BUFFER_SIZE * channels as usize;
            let buffer: Arc<Mutex<VecDeque<f32>>> =
                Arc::new(Mutex::new(VecDeque::with_capacity(capacity * 4)));
            let buffer_clone = buffer.clone();

            let stream = match device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut buf = buffer_clone.lock().unwrap_or_else(|p| p.into_inner());
                    for sample in data.iter_mut() {
                        *sample = buf.pop_front().unwrap_or(0.0);
                    }
                },
                |err| {
                    log_error!("AUDIO", "Stream error: {}", err);
                },
                None,
            ) {
                Ok(s) => s,
                Err(e) => {
                    log_error!("AUDIO", "Failed to build output stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log_error!("AUDIO", "Failed to start playback: {}", e);
                return;
            }
            log_verbose!("AUDIO", "Playback started: {} Hz, {} channels", sample_rate, channels);

            // Feed samples to buffer
            while let Ok(samples) = rx.recv() {
                let mut buf = buffer.lock().unwrap_or_else(|p| p.into_inner());
                buf.extend(samples);
                // Prevent buffer from growing too large (drop old samples)
                while buf.len() > capacity * 8 {
                    buf.pop_front();
                }
            }
            log_verbose!("AUDIO", "Playback stopped");
        })?;

    Ok(tx)
}
