//! Command interface: the synchronous API used by the control surface,
//! backed by a dedicated render thread that owns the playback engine.
//!
//! Commands travel over a bounded channel and are applied between ticks,
//! one per loop iteration. Status and preview are read from a snapshot the
//! render thread publishes after every iteration, so queries never wait on
//! the render loop.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    render, AppConfig, DeviceConfig, Frame, LedCtlError, PlaybackEngine, Playlist,
    RenderSettingsUpdate, Result, SourceDescriptor, Status,
};

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Crossfade requested with `switch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crossfade {
    pub duration_ms: u64,
}

impl Crossfade {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms }
    }

    pub fn duration(self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// State mutations accepted by the playback engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(SourceDescriptor),
    StartPlaylist(Playlist),
    Switch {
        source: SourceDescriptor,
        crossfade: Option<Crossfade>,
    },
    Stop,
    SetBrightness(f32),
    SetRenderSettings(RenderSettingsUpdate),
    ConfigureDevice(DeviceConfig),
}

impl Command {
    /// Commands that put a new source on screen and should render at once.
    fn replaces_source(&self) -> bool {
        matches!(
            self,
            Self::Start(_) | Self::StartPlaylist(_) | Self::Switch { .. }
        )
    }
}

enum Message {
    Command(Command, Sender<Result<Status>>),
    Shutdown,
}

#[derive(Debug)]
struct Published {
    status: Status,
    preview: Option<Frame>,
}

type SharedPublished = Arc<Mutex<Published>>;

/// Cloneable handle used to command the render thread.
#[derive(Clone)]
pub struct Controller {
    commands: Sender<Message>,
    published: SharedPublished,
}

impl Controller {
    pub fn start(&self, source: SourceDescriptor) -> Result<Status> {
        self.send(Command::Start(source))
    }

    pub fn start_playlist(&self, playlist: Playlist) -> Result<Status> {
        self.send(Command::StartPlaylist(playlist))
    }

    pub fn switch(&self, source: SourceDescriptor, crossfade: Option<Crossfade>) -> Result<Status> {
        self.send(Command::Switch { source, crossfade })
    }

    pub fn stop(&self) -> Result<Status> {
        self.send(Command::Stop)
    }

    /// Rejected with `OutOfRange` before reaching the render thread.
    pub fn set_brightness(&self, value: f32) -> Result<()> {
        render::validate_brightness(value)?;
        self.send(Command::SetBrightness(value)).map(|_| ())
    }

    pub fn set_render_settings(&self, update: RenderSettingsUpdate) -> Result<()> {
        self.send(Command::SetRenderSettings(update)).map(|_| ())
    }

    /// Swaps the output device; the playback session carries over.
    pub fn configure_device(&self, config: DeviceConfig) -> Result<Status> {
        self.send(Command::ConfigureDevice(config))
    }

    pub fn status(&self) -> Result<Status> {
        Ok(self.lock()?.status.clone())
    }

    /// Latest rendered frame as a PNG.
    pub fn preview(&self) -> Result<Vec<u8>> {
        self.preview_frame()?.encode_png()
    }

    pub fn preview_frame(&self) -> Result<Frame> {
        self.lock()?
            .preview
            .clone()
            .ok_or(LedCtlError::NotAvailable("preview"))
    }

    fn send(&self, command: Command) -> Result<Status> {
        let (reply, response) = bounded(1);
        self.commands
            .send(Message::Command(command, reply))
            .map_err(|_| LedCtlError::engine("render thread has stopped"))?;
        response
            .recv()
            .map_err(|_| LedCtlError::engine("render thread dropped the command"))?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Published>> {
        lock_published(&self.published)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

/// Owns the render thread. Dropping it shuts the engine down and closes the
/// device.
#[derive(Debug)]
pub struct Renderer {
    controller: Controller,
    handle: Option<JoinHandle<()>>,
}

impl Renderer {
    /// Opens the configured device and starts the render thread idle.
    pub fn spawn(config: &AppConfig) -> Result<Self> {
        let now = Instant::now();
        let engine = PlaybackEngine::new(config, now)?;
        let published = Arc::new(Mutex::new(Published {
            status: engine.status(now),
            preview: None,
        }));
        let (commands, inbox) = bounded(COMMAND_QUEUE_DEPTH);

        let shared = published.clone();
        let handle = thread::Builder::new()
            .name("ledctl-render".to_string())
            .spawn(move || render_loop(engine, inbox, shared))?;

        Ok(Self {
            controller: Controller {
                commands,
                published,
            },
            handle: Some(handle),
        })
    }

    pub fn controller(&self) -> Controller {
        self.controller.clone()
    }

    /// Stops the render thread and waits for the device to close.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // The thread may already be gone after an internal error.
        let _ = self.controller.commands.send(Message::Shutdown);
        handle
            .join()
            .map_err(|_| LedCtlError::engine("render thread panicked"))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.stop_thread() {
            tracing::error!(error = %err, "render thread did not shut down cleanly");
        }
    }
}

fn render_loop(mut engine: PlaybackEngine, inbox: Receiver<Message>, published: SharedPublished) {
    tracing::debug!("render thread started");
    let mut next_tick = Instant::now();
    loop {
        let wait = if engine.is_running() {
            next_tick.saturating_duration_since(Instant::now())
        } else {
            engine.tick_period()
        };
        let message = match inbox.recv_timeout(wait) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let now = Instant::now();
        let mut render_now = now >= next_tick;
        let reply = match message {
            Some(Message::Shutdown) => break,
            Some(Message::Command(command, reply)) => {
                render_now |= command.replaces_source();
                Some((engine.handle(command, now), reply))
            }
            None => None,
        };

        if engine.is_running() && render_now {
            engine.tick(now);
            // Pacing is measured from this tick, so an overrun starts the
            // next one immediately instead of catching up.
            next_tick = now + engine.tick_period();
        }

        if let Err(err) = publish(&published, &engine, Instant::now()) {
            tracing::error!(error = %err, "cannot publish engine state");
            break;
        }
        if let Some((result, reply)) = reply {
            let _ = reply.send(result);
        }
    }
    engine.shutdown();
    let _ = publish(&published, &engine, Instant::now());
    tracing::debug!("render thread stopped");
}

fn publish(published: &Mutex<Published>, engine: &PlaybackEngine, now: Instant) -> Result<()> {
    let mut slot = lock_published(published)?;
    slot.status = engine.status(now);
    slot.preview = engine.preview().cloned();
    Ok(())
}

fn lock_published(published: &Mutex<Published>) -> Result<MutexGuard<'_, Published>> {
    published
        .lock()
        .map_err(|_| LedCtlError::engine("published engine state has been poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PlaybackState, RenderSettings};

    fn renderer() -> Renderer {
        let config = AppConfig {
            render: RenderSettings::neutral(),
            ..AppConfig::default()
        };
        Renderer::spawn(&config).unwrap()
    }

    #[test]
    fn preview_is_unavailable_before_first_frame() {
        let renderer = renderer();
        let controller = renderer.controller();
        assert!(matches!(
            controller.preview(),
            Err(LedCtlError::NotAvailable("preview"))
        ));
        assert_eq!(controller.status().unwrap().state, PlaybackState::Idle);
    }

    #[test]
    fn switch_and_stop_round_trip_through_the_thread() {
        let renderer = renderer();
        let controller = renderer.controller();
        controller
            .start(SourceDescriptor::Solid { color: [255, 0, 0] })
            .unwrap();
        let status = controller
            .switch(
                SourceDescriptor::Solid { color: [0, 255, 0] },
                None,
            )
            .unwrap();
        assert_eq!(status.active_source_id.as_deref(), Some("solid:#00ff00"));
        assert_eq!(controller.preview_frame().unwrap().pixel(5, 5), [0, 255, 0]);

        let status = controller.stop().unwrap();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(controller.status().unwrap().state, PlaybackState::Idle);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let renderer = renderer();
        let controller = renderer.controller();
        let update = RenderSettingsUpdate {
            gamma: Some(0.0),
            ..RenderSettingsUpdate::default()
        };
        assert!(matches!(
            controller.set_render_settings(update),
            Err(LedCtlError::OutOfRange { name: "gamma", .. })
        ));
        controller.set_brightness(0.25).unwrap();
        assert_eq!(controller.status().unwrap().brightness, 0.25);
    }

    #[test]
    fn commands_fail_after_shutdown() {
        let renderer = renderer();
        let controller = renderer.controller();
        renderer.shutdown().unwrap();
        assert!(matches!(controller.stop(), Err(LedCtlError::Engine(_))));
    }

    #[test]
    fn crossfade_converts_milliseconds() {
        assert_eq!(Crossfade::new(250).duration(), Duration::from_millis(250));
    }
}
