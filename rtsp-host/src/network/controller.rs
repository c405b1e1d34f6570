//! Session controller
//!
//! Owns one streaming session end to end: connects, runs the session on a
//! worker thread, routes received units into the frame queues, starts and
//! stops the decode loops, and decides when a fault needs the restart action.
//!
//! Fault policy:
//! - transient transport errors are counted and retried with backoff; reaching
//!   `max_transport_errors` closes the transport and fires the restart action
//! - refused or aborted connections and `SocketFailure` fire it immediately
//! - server rejections (auth, archive range, other) end the session and show
//!   the empty state without a restart
//!
//! The restart action fires at most once per controller. Whatever owns the
//! controller is expected to release it and build a new one.
//!
//! `release()` only raises the stop flag and wakes whatever the worker is
//! blocked on. The worker then joins the decode loops and clears the queues
//! on its own thread; `wait_finished` observes that.

use super::transport::{classify, is_read_timeout, FaultClass};
use super::{
    AudioTrack, Connector, ParameterSets, SessionEvent, SessionFactory, SessionRequest,
    StreamInfo, StreamTarget, StreamUnit, TcpConnector, UrlError, VideoCodec,
};
use crate::codec::{DecoderError, DecoderFactory, MediaFormat, SoftwareDecoderFactory};
use crate::core::{
    ErrorMarker, EventSink, Frame, FrameQueue, Payload, PlaybackState, PlayerConfig, Surface,
};
use crate::video::{DecodeCallbacks, DecodeLoop, DecodeParams};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Invoked when the controller gives up on its session
pub type RestartAction = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error("failed to spawn controller thread: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    /// Session negotiated, decoders starting
    Connected,
    /// Units are arriving
    Streaming,
    /// Released, or the session ended normally
    Teardown,
    /// Gave up; the restart action has fired
    Failed,
}

const EMPTY_UNKNOWN: u8 = 0;
const EMPTY_HIDDEN: u8 = 1;
const EMPTY_SHOWN: u8 = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Fires once; waiters see the channel disconnect
struct StopSignal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    fn trigger(&self) {
        lock(&self.tx).take();
    }

    /// Sleep up to `timeout`; true when the signal fired
    fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

#[derive(Default)]
struct DecodeLoops {
    video: Option<DecodeLoop>,
    audio: Option<DecodeLoop>,
}

struct Shared {
    target: StreamTarget,
    config: PlayerConfig,
    events: EventSink,
    surface: Option<Arc<Surface>>,
    decoders: Arc<dyn DecoderFactory>,
    restart: RestartAction,
    restart_fired: AtomicBool,
    stopped: AtomicBool,
    stop_signal: StopSignal,
    /// Fired by the worker once it has torn everything down
    finished: StopSignal,
    running: AtomicBool,
    /// Raised while no data has been seen; the watchdog reads it
    is_timeout: AtomicBool,
    empty_state: AtomicU8,
    released: AtomicBool,
    state: Mutex<ControllerState>,
    video_queue: Arc<FrameQueue>,
    audio_queue: Arc<FrameQueue>,
    loops: Mutex<DecodeLoops>,
    closer: Mutex<Option<TcpStream>>,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ControllerState) {
        let mut current = lock(&self.state);
        if *current != state {
            log_debug!("CTRL", "{:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Show or hide the empty state, emitting only on change
    fn show_error(&self, need_show: bool) {
        self.is_timeout.store(need_show, Ordering::SeqCst);
        let next = if need_show { EMPTY_SHOWN } else { EMPTY_HIDDEN };
        if self.empty_state.swap(next, Ordering::SeqCst) != next {
            self.events.show_empty(need_show);
        }
    }

    fn fire_restart(&self) {
        if self.restart_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        log_warn!("CTRL", "Restarting player for {}", self.target.url);
        self.set_state(ControllerState::Failed);
        (self.restart)();
    }

    fn close_transport(&self) {
        if let Some(stream) = lock(&self.closer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Ask running loops to exit without waiting for them
    fn signal_decoders(&self) {
        let loops = lock(&self.loops);
        for decode_loop in loops.video.iter().chain(loops.audio.iter()) {
            decode_loop.stop();
        }
    }

    fn stop_decoders(&self) {
        let mut loops = lock(&self.loops);
        let video = loops.video.take();
        let audio = loops.audio.take();
        drop(loops);
        // Signal both before joining either
        for decode_loop in video.iter().chain(audio.iter()) {
            decode_loop.stop();
        }
        if let Some(video) = video {
            video.join();
        }
        if let Some(audio) = audio {
            audio.join();
        }
    }

    fn push_unit(&self, queue: &FrameQueue, unit: StreamUnit) {
        if unit.length == 0 {
            return;
        }
        match Frame::new(unit.data, unit.offset, unit.length, unit.timestamp_us) {
            Ok(frame) => queue.push(frame),
            Err(e) => log_warn!("CTRL", "{}: dropping unit: {}", queue.name(), e),
        }
    }
}

/// Configures and starts a `SessionController`
pub struct SessionControllerBuilder {
    url: String,
    sessions: Arc<dyn SessionFactory>,
    surface: Option<Arc<Surface>>,
    config: PlayerConfig,
    events: EventSink,
    restart: Option<RestartAction>,
    connector: Option<Arc<dyn Connector>>,
    decoders: Option<Arc<dyn DecoderFactory>>,
}

impl SessionControllerBuilder {
    pub fn surface(mut self, surface: Arc<Surface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn on_restart<F>(mut self, restart: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.restart = Some(Arc::new(restart));
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn decoder_factory(mut self, decoders: Arc<dyn DecoderFactory>) -> Self {
        self.decoders = Some(decoders);
        self
    }

    /// Resolve the URL and start the worker and watchdog threads
    pub fn start(self) -> Result<SessionController, ControllerError> {
        let target = StreamTarget::parse(&self.url)?;
        log_info!("CTRL", "Starting session for {}", target.url);

        let shared = Arc::new(Shared {
            target,
            config: self.config,
            events: self.events,
            surface: self.surface,
            decoders: self
                .decoders
                .unwrap_or_else(|| Arc::new(SoftwareDecoderFactory::default())),
            restart: self.restart.unwrap_or_else(|| {
                Arc::new(|| log_warn!("CTRL", "Restart requested but no handler installed"))
            }),
            restart_fired: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_signal: StopSignal::new(),
            finished: StopSignal::new(),
            running: AtomicBool::new(true),
            is_timeout: AtomicBool::new(true),
            empty_state: AtomicU8::new(EMPTY_UNKNOWN),
            released: AtomicBool::new(false),
            state: Mutex::new(ControllerState::Idle),
            video_queue: Arc::new(FrameQueue::new("video")),
            audio_queue: Arc::new(FrameQueue::new("audio")),
            loops: Mutex::new(DecodeLoops::default()),
            closer: Mutex::new(None),
        });

        let worker = Worker {
            shared: shared.clone(),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(TcpConnector::new())),
            sessions: self.sessions,
        };
        // Both threads detach; they exit once the stop signal fires
        thread::Builder::new()
            .name("rtsp-session".into())
            .spawn(move || worker.run())?;

        let watchdog_shared = shared.clone();
        if let Err(e) = thread::Builder::new()
            .name("rtsp-watchdog".into())
            .spawn(move || run_watchdog(watchdog_shared))
        {
            log_warn!("CTRL", "Watchdog not started: {}", e);
        }

        Ok(SessionController { shared })
    }
}

/// One running streaming session
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// `url` is resolved on `start()`; `sessions` speaks the wire protocol
    pub fn builder(
        url: impl Into<String>,
        sessions: Arc<dyn SessionFactory>,
    ) -> SessionControllerBuilder {
        SessionControllerBuilder {
            url: url.into(),
            sessions,
            surface: None,
            config: PlayerConfig::default(),
            events: EventSink::disconnected(),
            restart: None,
            connector: None,
            decoders: None,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.shared.target
    }

    pub fn state(&self) -> ControllerState {
        *lock(&self.shared.state)
    }

    pub fn video_queue(&self) -> &Arc<FrameQueue> {
        &self.shared.video_queue
    }

    pub fn audio_queue(&self) -> &Arc<FrameQueue> {
        &self.shared.audio_queue
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Worker thread still running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Hold decoding locally; the session keeps receiving
    pub fn pause_decoding(&self) {
        let loops = lock(&self.shared.loops);
        for decode_loop in loops.video.iter().chain(loops.audio.iter()) {
            decode_loop.pause();
        }
        drop(loops);
        self.shared.events.emit(PlaybackState::Paused, None);
    }

    pub fn resume_decoding(&self) {
        let loops = lock(&self.shared.loops);
        for decode_loop in loops.video.iter().chain(loops.audio.iter()) {
            decode_loop.resume();
        }
        drop(loops);
        self.shared.events.emit(PlaybackState::Playing, None);
    }

    /// Stop everything and emit `Released`. Never blocks on the worker;
    /// idempotent and safe to call from any thread, the restart action
    /// included.
    pub fn release(&self) {
        let shared = &self.shared;
        if shared.released.swap(true, Ordering::SeqCst) {
            return;
        }
        log_info!("CTRL", "Releasing session for {}", shared.target.url);

        shared.stopped.store(true, Ordering::SeqCst);
        shared.stop_signal.trigger();
        shared.close_transport();
        shared.signal_decoders();

        shared.set_state(ControllerState::Teardown);
        shared.events.emit(PlaybackState::Released, None);
    }

    /// Wait up to `timeout` for the worker to exit and join its decode
    /// loops. True once it has.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.shared.finished.wait(timeout)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}

/// Show the empty state if nothing arrived within the watchdog window
fn run_watchdog(shared: Arc<Shared>) {
    if shared.stop_signal.wait(shared.config.watchdog_timeout) {
        return;
    }
    if shared.is_timeout.load(Ordering::SeqCst)
        && shared.running.load(Ordering::SeqCst)
        && !shared.is_stopped()
    {
        log_verbose!("CTRL", "No data after {:?}", shared.config.watchdog_timeout);
        shared.show_error(true);
    }
}

/// How one connect-and-run attempt ended without an I/O error
enum AttemptEnd {
    /// Peer closed the session normally
    Finished,
    /// Server rejected the session
    Rejected,
    /// Restart already fired from inside the session
    Restarted,
}

#[derive(Default)]
struct AttemptFlags {
    connected: bool,
    rejected: bool,
    restart: bool,
    streaming: bool,
}

struct Worker {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    sessions: Arc<dyn SessionFactory>,
}

impl Worker {
    fn run(self) {
        let shared = &self.shared;
        let config = &shared.config;
        let mut error_count = 0u32;
        let mut retry_delay = config.retry_delay;

        let end = loop {
            if shared.is_stopped() {
                break None;
            }
            shared.set_state(ControllerState::Connecting);

            let mut flags = AttemptFlags::default();
            let result = self.attempt(&mut flags);
            if flags.connected {
                error_count = 0;
                retry_delay = config.retry_delay;
            }

            match result {
                Ok(end) => break Some(end),
                Err(_) if shared.is_stopped() => break None,
                Err(e) => {
                    shared.show_error(true);
                    if classify(&e) == FaultClass::Hard {
                        log_error!("CTRL", "Connection failed: {}", e);
                        shared.close_transport();
                        shared.fire_restart();
                        break Some(AttemptEnd::Restarted);
                    }

                    error_count += 1;
                    log_warn!(
                        "CTRL",
                        "Transport error ({}/{}): {}",
                        error_count,
                        config.max_transport_errors,
                        e
                    );
                    if is_read_timeout(&e) {
                        shared.events.emit(
                            PlaybackState::ErrorOccurred,
                            Some(Payload::Marker(ErrorMarker::SocketReadTimeout)),
                        );
                    }
                    if error_count >= config.max_transport_errors {
                        shared.close_transport();
                        shared.fire_restart();
                        break Some(AttemptEnd::Restarted);
                    }
                    if shared.stop_signal.wait(retry_delay) {
                        break None;
                    }
                    retry_delay = config.next_retry_delay(retry_delay);
                }
            }
        };

        shared.stop_decoders();
        shared.close_transport();
        if shared.is_stopped() {
            shared.video_queue.clear();
            shared.audio_queue.clear();
        } else {
            match end {
                Some(AttemptEnd::Finished) => {
                    log_info!("CTRL", "Session ended");
                    shared.set_state(ControllerState::Teardown);
                    shared.events.emit(PlaybackState::Ended, None);
                }
                Some(AttemptEnd::Rejected) => {
                    shared.set_state(ControllerState::Teardown);
                }
                Some(AttemptEnd::Restarted) | None => {}
            }
        }
        shared.running.store(false, Ordering::SeqCst);
        shared.stop_signal.trigger();
        shared.finished.trigger();
        log_verbose!("CTRL", "Session worker stopped");
    }

    /// Connect, run the session to completion and tear the transport down
    fn attempt(&self, flags: &mut AttemptFlags) -> io::Result<AttemptEnd> {
        let shared = &self.shared;
        let connection = self.connector.connect(&shared.target, &shared.config)?;
        *lock(&shared.closer) = connection.closer;
        if shared.is_stopped() {
            // release() ran while connecting and found no socket to close
            shared.close_transport();
            return Ok(AttemptEnd::Finished);
        }

        let request = SessionRequest {
            url: shared.target.url.clone(),
            credentials: shared.target.credentials.clone(),
            request_video: true,
            request_audio: true,
        };
        let mut session = self.sessions.create(connection.stream, request);
        let result = session.execute(&shared.stopped, &mut |event| {
            self.handle_event(event, flags)
        });
        drop(session);
        shared.close_transport();

        if flags.restart {
            return Ok(AttemptEnd::Restarted);
        }
        // Servers usually drop the connection after a rejection
        if flags.rejected {
            if let Err(e) = result {
                log_verbose!("CTRL", "Connection closed after rejection: {}", e);
            }
            return Ok(AttemptEnd::Rejected);
        }
        result.map(|_| AttemptEnd::Finished)
    }

    fn handle_event(&self, event: SessionEvent, flags: &mut AttemptFlags) {
        let shared = &self.shared;
        // Nothing is reported after `Released`
        if shared.is_stopped() {
            return;
        }
        match event {
            SessionEvent::Connecting => {
                log_verbose!("CTRL", "Connecting to {}", shared.target.address());
                shared.events.emit(PlaybackState::Buffering, None);
            }
            SessionEvent::Connected(info) => {
                flags.connected = true;
                flags.streaming = false;
                self.on_connected(info);
            }
            SessionEvent::Disconnected => {
                log_verbose!("CTRL", "Disconnected from {}", shared.target.address());
            }
            SessionEvent::Unauthorized => {
                log_error!("CTRL", "Username or password is incorrect");
                flags.rejected = true;
                shared.events.emit(
                    PlaybackState::ErrorOccurred,
                    Some(Payload::Message("unauthorized".into())),
                );
                shared.show_error(true);
            }
            SessionEvent::ArchiveUnavailable => {
                log_warn!("CTRL", "Archive range not available");
                flags.rejected = true;
                shared.events.emit(
                    PlaybackState::ErrorOccurred,
                    Some(Payload::Marker(ErrorMarker::ArchiveUnavailable)),
                );
                shared.show_error(true);
            }
            SessionEvent::Failed(reason) => {
                log_error!("CTRL", "Session failed: {}", reason);
                flags.rejected = true;
                shared
                    .events
                    .emit(PlaybackState::ErrorOccurred, Some(Payload::Message(reason)));
                shared.show_error(true);
            }
            SessionEvent::SocketFailure(reason) => {
                log_error!("CTRL", "Socket failure: {}", reason);
                flags.restart = true;
                shared.show_error(true);
                shared.close_transport();
                shared.fire_restart();
            }
            SessionEvent::Video(unit) => {
                shared.show_error(false);
                self.on_unit(flags);
                shared.push_unit(&shared.video_queue, unit);
            }
            SessionEvent::Audio(unit) => {
                self.on_unit(flags);
                shared.push_unit(&shared.audio_queue, unit);
            }
        }
    }

    fn on_unit(&self, flags: &mut AttemptFlags) {
        if !flags.streaming {
            flags.streaming = true;
            self.shared.set_state(ControllerState::Streaming);
        }
    }

    fn on_connected(&self, info: StreamInfo) {
        let shared = &self.shared;
        log_info!(
            "CTRL",
            "Connected to {} (video: {:?}, audio: {:?})",
            shared.target.address(),
            info.video.as_ref().map(|v| v.codec),
            info.audio.as_ref().map(|a| a.codec)
        );
        shared.show_error(false);
        shared
            .events
            .emit(PlaybackState::Started, info.time_ms.map(Payload::Timestamp));

        // A renegotiation replaces whatever the previous one started
        shared.stop_decoders();
        shared.video_queue.clear();
        shared.audio_queue.clear();

        let video_mime = match &info.video {
            Some(track) => {
                match &track.parameter_sets {
                    Some(sets) => shared.video_queue.push(priming_frame(sets)),
                    None => log_verbose!("CTRL", "No parameter sets in stream description"),
                }
                track.codec.mime()
            }
            None => VideoCodec::H264.mime(),
        };

        shared.set_state(ControllerState::Connected);
        shared.events.emit(PlaybackState::Ready, None);

        if shared.is_stopped() {
            return;
        }
        self.play_video(video_mime);
        if let Some(track) = info.audio {
            self.play_audio(track);
        }
    }

    fn play_video(&self, mime: &str) {
        let shared = &self.shared;
        let Some(surface) = shared.surface.clone() else {
            log_verbose!("CTRL", "No surface bound, video not decoded");
            return;
        };
        let params = DecodeParams::new(
            "video",
            MediaFormat::video(mime, shared.config.surface_width, shared.config.surface_height),
            shared.video_queue.clone(),
            shared.decoders.clone(),
            &shared.config,
        )
        .with_surface(surface);

        let starved = shared.events.clone();
        let pacing = shared.events.clone();
        let timeline = shared.events.clone();
        let callbacks = DecodeCallbacks {
            on_starved: Some(Box::new(move || {
                starved.emit(PlaybackState::ErrorVideoDecoder, None)
            })),
            on_pacing: Some(Box::new(move |ms| {
                pacing.emit(PlaybackState::Playing, Some(Payload::PacingMs(ms)))
            })),
            on_timeline: Some(Box::new(move || {
                timeline.emit(PlaybackState::TimelineChanged, None)
            })),
            on_fault: Some(fault_callback(shared.events.clone())),
        };

        match DecodeLoop::spawn(params, callbacks) {
            Ok(decode_loop) => lock(&shared.loops).video = Some(decode_loop),
            Err(e) => {
                log_error!("CTRL", "Video decode thread not started: {}", e);
                shared.events.emit(
                    PlaybackState::ErrorOccurred,
                    Some(Payload::Message(e.to_string())),
                );
            }
        }
    }

    fn play_audio(&self, track: AudioTrack) {
        let shared = &self.shared;
        let mime = track.codec.mime();
        if track.sample_rate_hz == 0 || track.channel_count == 0 {
            log_warn!(
                "CTRL",
                "Audio track {} Hz x {} ignored",
                track.sample_rate_hz,
                track.channel_count
            );
            return;
        }
        if !shared.decoders.supports(mime) {
            log_info!("CTRL", "No decoder for {}, audio disabled", mime);
            return;
        }
        let params = DecodeParams::new(
            "audio",
            MediaFormat::audio(
                mime,
                track.sample_rate_hz,
                track.channel_count,
                track.codec_config,
            ),
            shared.audio_queue.clone(),
            shared.decoders.clone(),
            &shared.config,
        );
        let starved = shared.events.clone();
        let callbacks = DecodeCallbacks {
            on_starved: Some(Box::new(move || {
                starved.emit(PlaybackState::ErrorQueueFrame, None)
            })),
            on_fault: Some(fault_callback(shared.events.clone())),
            ..Default::default()
        };

        match DecodeLoop::spawn(params, callbacks) {
            Ok(decode_loop) => lock(&shared.loops).audio = Some(decode_loop),
            Err(e) => log_error!("CTRL", "Audio decode thread not started: {}", e),
        }
    }
}

fn fault_callback(events: EventSink) -> Box<dyn FnOnce(&DecoderError) + Send> {
    Box::new(move |error| {
        events.emit(
            PlaybackState::ErrorOccurred,
            Some(Payload::Message(error.to_string())),
        )
    })
}

/// Parameter sets as the first frame of a fresh video queue
pub fn priming_frame(sets: &ParameterSets) -> Frame {
    Frame::from_vec(sets.priming_bytes(), 0)
}
