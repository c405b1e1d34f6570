//! Headless player: runs a session controller against a surface, logs its
//! events and rebuilds it whenever it asks for a restart

use crate::codec::SoftwareDecoderFactory;
use crate::core::{EventSink, PlaybackState, PlayerConfig, PlayerEvent, Surface};
use crate::network::{FramedSession, SessionController};
use crate::utils::save_surface_snapshot;
use anyhow::Context;
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(16);
/// How long shutdown waits for the worker to release its decoders
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub url: String,
    pub config: PlayerConfig,
    pub audio: bool,
    /// Stop after this long; run until the stream ends otherwise
    pub duration: Option<Duration>,
    /// Write the last presented frame here on exit
    pub snapshot_dir: Option<PathBuf>,
}

struct PlayerApp {
    options: PlayOptions,
    surface: Arc<Surface>,
    events: EventSink,
    restart_tx: Sender<()>,
    controller: Option<SessionController>,
    /// Fires when a released controller is due to be rebuilt
    rebuild_due: Receiver<Instant>,
    restarts: u32,
    current_width: u32,
    current_height: u32,
    last_count: u64,
    last_stats_count: u64,
    last_log: Instant,
}

impl PlayerApp {
    fn new(options: PlayOptions, events: EventSink, restart_tx: Sender<()>) -> Self {
        Self {
            options,
            surface: Arc::new(Surface::new()),
            events,
            restart_tx,
            controller: None,
            rebuild_due: never(),
            restarts: 0,
            current_width: 0,
            current_height: 0,
            last_count: 0,
            last_stats_count: 0,
            last_log: Instant::now(),
        }
    }

    fn start_controller(&mut self) -> anyhow::Result<()> {
        let restart_tx = self.restart_tx.clone();
        let controller = SessionController::builder(
            self.options.url.clone(),
            Arc::new(FramedSession::factory()),
        )
        .surface(self.surface.clone())
        .config(self.options.config.clone())
        .events(self.events.clone())
        .decoder_factory(Arc::new(SoftwareDecoderFactory::new(self.options.audio)))
        .on_restart(move || {
            let _ = restart_tx.try_send(());
        })
        .start()
        .with_context(|| format!("failed to start player for {}", self.options.url))?;
        self.controller = Some(controller);
        Ok(())
    }

    /// Release the current controller and schedule its replacement after
    /// the retry delay
    fn restart(&mut self) {
        self.restarts += 1;
        log_warn!("APP", "Restart #{} requested", self.restarts);
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
        self.rebuild_due = after(self.options.config.retry_delay);
    }

    fn rebuild(&mut self) -> anyhow::Result<()> {
        self.rebuild_due = never();
        if self.controller.is_some() {
            return Ok(());
        }
        log_verbose!("APP", "Rebuilding player for {}", self.options.url);
        self.start_controller()
    }

    /// Log an event; returns false once playback is over
    fn handle_event(&mut self, event: PlayerEvent) -> bool {
        match &event {
            PlayerEvent::State { state, .. } if state.is_error() => {
                log_warn!("APP", "{}", event);
            }
            PlayerEvent::State {
                state: PlaybackState::Playing,
                payload: Some(_),
            } => {
                log_debug!("APP", "{}", event);
            }
            _ => log_info!("APP", "{}", event),
        }
        !matches!(
            event,
            PlayerEvent::State {
                state: PlaybackState::Ended,
                ..
            }
        )
    }

    fn tick(&mut self) {
        if let Some(frame) = self.surface.consume() {
            self.last_count += 1;
            if frame.width != self.current_width || frame.height != self.current_height {
                log_verbose!(
                    "APP",
                    "Resolution change: {}x{} -> {}x{}",
                    self.current_width,
                    self.current_height,
                    frame.width,
                    frame.height
                );
                self.current_width = frame.width;
                self.current_height = frame.height;
            }
        }

        if self.last_log.elapsed().as_secs() >= 10 {
            let shown = self.last_count - self.last_stats_count;
            log_info!(
                "APP",
                "Stats: {} fps, total_frames={}, shown={}",
                shown / 10,
                self.surface.frame_count(),
                self.last_count
            );
            self.last_stats_count = self.last_count;
            self.last_log = Instant::now();
        }
    }

    fn shutdown(&mut self) {
        self.rebuild_due = never();
        if let Some(controller) = self.controller.take() {
            controller.release();
            if !controller.wait_finished(SHUTDOWN_GRACE) {
                log_warn!("APP", "Session worker still busy after {:?}", SHUTDOWN_GRACE);
            }
        }
        let Some(dir) = &self.options.snapshot_dir else {
            return;
        };
        match self.surface.last_frame() {
            Some(frame) => match save_surface_snapshot(&frame, dir) {
                Ok(path) => log_info!("APP", "Snapshot saved to {}", path.display()),
                Err(e) => log_error!("APP", "Snapshot failed: {}", e),
            },
            None => log_info!("APP", "No frame presented, snapshot skipped"),
        }
    }
}

fn event_loop(
    app: &mut PlayerApp,
    events: &Receiver<PlayerEvent>,
    restarts: &Receiver<()>,
) -> anyhow::Result<()> {
    let deadline = app.options.duration.map(|d| Instant::now() + d);
    loop {
        let rebuild = app.rebuild_due.clone();
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    if !app.handle_event(event) {
                        return Ok(());
                    }
                }
            }
            recv(restarts) -> _ => app.restart(),
            recv(rebuild) -> _ => app.rebuild()?,
            default(TICK) => {}
        }
        app.tick();
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log_info!("APP", "Run duration reached");
            return Ok(());
        }
    }
}

pub fn run(options: PlayOptions) -> anyhow::Result<()> {
    let (events, event_rx) = EventSink::channel();
    let (restart_tx, restart_rx) = bounded(1);
    let mut app = PlayerApp::new(options, events, restart_tx);

    app.start_controller()?;
    let result = event_loop(&mut app, &event_rx, &restart_rx);
    app.shutdown();
    for event in event_rx.try_iter() {
        log_verbose!("APP", "{}", event);
    }
    result
}
