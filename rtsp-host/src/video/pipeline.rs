//! Decode loop: drains one frame queue into a decoder on a dedicated thread
//!
//! The video loop paces rendered output and reports the first rendered frame;
//! the audio loop runs the same algorithm without those callbacks.

use crate::codec::{DecoderError, DecoderFactory, MediaDecoder, MediaFormat, OutputStatus};
use crate::core::{FrameQueue, PlayerConfig, Surface};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Everything a decode loop needs besides its callbacks
pub struct DecodeParams {
    /// Thread and log name, "video" or "audio"
    pub name: &'static str,
    pub format: MediaFormat,
    pub surface: Option<Arc<Surface>>,
    pub queue: Arc<FrameQueue>,
    pub factory: Arc<dyn DecoderFactory>,
    pub input_timeout: Duration,
    pub output_timeout: Duration,
    pub pop_timeout: Duration,
    pub starvation_threshold: u32,
}

impl DecodeParams {
    pub fn new(
        name: &'static str,
        format: MediaFormat,
        queue: Arc<FrameQueue>,
        factory: Arc<dyn DecoderFactory>,
        config: &PlayerConfig,
    ) -> Self {
        Self {
            name,
            format,
            surface: None,
            queue,
            factory,
            input_timeout: config.input_timeout,
            output_timeout: config.output_timeout,
            pop_timeout: config.pop_timeout,
            starvation_threshold: config.starvation_threshold,
        }
    }

    pub fn with_surface(mut self, surface: Arc<Surface>) -> Self {
        self.surface = Some(surface);
        self
    }
}

/// Signals raised by a running loop. Unset callbacks are skipped.
#[derive(Default)]
pub struct DecodeCallbacks {
    /// Queue stayed empty for `starvation_threshold` consecutive pops
    pub on_starved: Option<Box<dyn FnMut() + Send>>,
    /// Milliseconds between the two most recent rendered frames
    pub on_pacing: Option<Box<dyn FnMut(i64) + Send>>,
    /// First rendered frame of this loop
    pub on_timeline: Option<Box<dyn FnOnce() + Send>>,
    /// Decoder failed while the loop was not being stopped
    pub on_fault: Option<Box<dyn FnOnce(&DecoderError) + Send>>,
}

/// Counts consecutive empty pops and reports every `threshold`-th one
#[derive(Debug)]
pub struct StarvationCounter {
    count: u32,
    threshold: u32,
}

impl StarvationCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record an empty pop. Returns true when the threshold is reached;
    /// the count then starts over.
    pub fn record_empty(&mut self) -> bool {
        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Local pause switch; the network session keeps running while paused
struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn set(&self, paused: bool) {
        let mut guard = self.paused.lock().unwrap_or_else(|p| p.into_inner());
        *guard = paused;
        drop(guard);
        if !paused {
            self.resumed.notify_one();
        }
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Block while paused, returning early once `exit` is set
    fn wait(&self, exit: &AtomicBool) {
        let mut paused = self.paused.lock().unwrap_or_else(|p| p.into_inner());
        while *paused && !exit.load(Ordering::SeqCst) {
            paused = self.resumed.wait(paused).unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Wake the waiter so it can observe the exit flag
    fn wake(&self) {
        let _guard = self.paused.lock().unwrap_or_else(|p| p.into_inner());
        self.resumed.notify_all();
    }
}

/// Handle for a running decode loop thread
pub struct DecodeLoop {
    name: &'static str,
    exit: Arc<AtomicBool>,
    pause: Arc<PauseGate>,
    queue: Arc<FrameQueue>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeLoop {
    pub fn spawn(params: DecodeParams, callbacks: DecodeCallbacks) -> io::Result<Self> {
        let name = params.name;
        let exit = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(PauseGate::new());
        let queue = params.queue.clone();

        let worker = Worker {
            exit: exit.clone(),
            pause: pause.clone(),
            callbacks,
            params,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-decode", name))
            .spawn(move || worker.run())?;

        Ok(Self {
            name,
            exit,
            pause,
            queue,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pause(&self) {
        self.pause.set(true);
    }

    pub fn resume(&self) {
        self.pause.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Ask the loop to exit, waking it from a pause or queue wait
    pub fn stop(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.pause.wake();
        self.queue.interrupt();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop and wait for the thread to finish
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DecodeLoop {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Worker {
    exit: Arc<AtomicBool>,
    pause: Arc<PauseGate>,
    callbacks: DecodeCallbacks,
    params: DecodeParams,
}

impl Worker {
    fn stopping(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    fn run(mut self) {
        let name = self.params.name;
        log_verbose!("DEC", "{} decode loop started", name);

        let mut decoder = match self.params.factory.create(&self.params.format.mime) {
            Ok(decoder) => decoder,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let mut format = self.params.format.clone();
        if let Some(caps) = decoder.video_capabilities() {
            let (width, height) = caps.safe_size(format.width, format.height);
            if (width, height) != (format.width, format.height) {
                log_verbose!(
                    "DEC",
                    "{}x{} unsupported by {}, using {}x{}",
                    format.width,
                    format.height,
                    decoder.name(),
                    width,
                    height
                );
            }
            format.width = width;
            format.height = height;
        }

        log_info!(
            "DEC",
            "Configuring {} decoder '{}' for {} ({}x{})",
            name,
            decoder.name(),
            format.mime,
            format.width,
            format.height
        );

        // stop() may land while configuring; that is a shutdown, not a fault
        let configured = if self.stopping() {
            Err(DecoderError::Configure("stopped before configure".into()))
        } else {
            decoder
                .configure(&format, self.params.surface.clone())
                .and_then(|_| decoder.start())
        };
        if let Err(e) = configured {
            self.fail(e);
            self.params.queue.clear();
            return;
        }

        let result = self.decode(decoder.as_mut());
        self.shutdown(decoder.as_mut());
        if let Err(e) = result {
            self.fail(e);
        }
        log_verbose!("DEC", "{} decode loop stopped", name);
    }

    fn decode(&mut self, decoder: &mut dyn MediaDecoder) -> Result<(), DecoderError> {
        let queue = self.params.queue.clone();
        let mut starvation = StarvationCounter::new(self.params.starvation_threshold);
        let mut previous_ts = 0i64;
        let mut current_ts = 0i64;
        let mut rendered = 0u64;
        let start = Instant::now();
        let mut last_log = Instant::now();

        while !self.stopping() {
            self.pause.wait(&self.exit);
            if self.stopping() {
                break;
            }

            if let Some(slot) = decoder.dequeue_input(self.params.input_timeout)? {
                if self.stopping() {
                    break;
                }
                match queue.pop_unless(self.params.pop_timeout, &self.exit) {
                    None if self.stopping() => break,
                    None => {
                        // Keep the decoder pipeline moving with an empty input
                        decoder.queue_input(slot, &[], 0, false)?;
                        log_debug!(
                            "DEC",
                            "{}: queue empty, count={}",
                            self.params.name,
                            starvation.count() + 1
                        );
                        if starvation.record_empty() {
                            log_verbose!("DEC", "{}: starved", self.params.name);
                            if let Some(on_starved) = self.callbacks.on_starved.as_mut() {
                                on_starved();
                            }
                        }
                    }
                    Some(frame) => {
                        starvation.reset();
                        decoder.queue_input(slot, frame.bytes(), frame.timestamp_us(), false)?;
                        current_ts = frame.timestamp_us();
                        if previous_ts == 0 {
                            previous_ts = current_ts;
                        }
                    }
                }
            }

            if self.stopping() {
                break;
            }

            match decoder.dequeue_output(self.params.output_timeout)? {
                OutputStatus::FormatChanged(description) => {
                    log_verbose!("DEC", "{}: format changed: {}", self.params.name, description);
                }
                OutputStatus::TryAgainLater => {
                    log_debug!("DEC", "{}: no output available", self.params.name);
                }
                OutputStatus::Buffer(buffer) if buffer.end_of_stream => {
                    decoder.release_output(buffer.index, false)?;
                    log_verbose!("DEC", "{}: end of stream", self.params.name);
                    break;
                }
                OutputStatus::Buffer(buffer) => {
                    decoder.release_output(buffer.index, buffer.size != 0 && !self.stopping())?;
                    rendered += 1;
                    if let Some(on_pacing) = self.callbacks.on_pacing.as_mut() {
                        on_pacing((current_ts - previous_ts) / 1000);
                    }
                    if let Some(on_timeline) = self.callbacks.on_timeline.take() {
                        on_timeline();
                    }
                    previous_ts = current_ts;
                }
            }

            if last_log.elapsed().as_secs() >= 10 {
                let fps = rendered as f64 / start.elapsed().as_secs_f64();
                log_verbose!(
                    "DEC",
                    "{}: {} frames, {:.1} fps avg, {} queued",
                    self.params.name,
                    rendered,
                    fps,
                    queue.len()
                );
                last_log = Instant::now();
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, decoder: &mut dyn MediaDecoder) {
        match decoder.dequeue_input(self.params.input_timeout) {
            Ok(Some(slot)) => {
                if let Err(e) = decoder.queue_input(slot, &[], 0, true) {
                    log_verbose!("DEC", "{}: end of stream not queued: {}", self.params.name, e);
                }
            }
            _ => log_warn!("DEC", "{}: not able to signal end of stream", self.params.name),
        }
        decoder.stop();
        self.params.queue.clear();
    }

    fn fail(&mut self, error: DecoderError) {
        if self.stopping() {
            log_verbose!("DEC", "{} stopped during setup: {}", self.params.name, error);
            return;
        }
        log_error!("DEC", "{} decode loop failed: {}", self.params.name, error);
        if let Some(on_fault) = self.callbacks.on_fault.take() {
            on_fault(&error);
        }
    }
}
