//! Playback engine: drives one active source through the color pipeline and
//! the mapper into the output device, one tick at a time.
//!
//! The engine is single-threaded and never reads the clock for scheduling.
//! Every time-dependent call takes the instant to act at, so the render
//! thread in [`crate::command`] and the tests drive it the same way.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    playlist::PlaylistCursor, render, AppConfig, Command, Crossfade, DeviceConfig, EngineConfig,
    Frame, FrameSource, LedCtlError, Mapper, OutputDevice, Playlist, Pull, RenderSettings, Result,
    ScaleFilter, Size, SourceDescriptor,
};

const FPS_SMOOTHING: f32 = 0.1;
/// Upper bound on source handovers (fade completion, playlist advance)
/// resolved inside one tick.
const MAX_HANDOVERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Crossfading,
    Faulted,
}

/// Snapshot returned by every command and by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: PlaybackState,
    /// The source on screen; the destination while crossfading.
    pub active_source_id: Option<String>,
    pub fault: Option<String>,
    pub fps_actual: f32,
    /// Time since the engine was created.
    pub uptime_ms: u64,
    /// Frames drawn since the last `start`.
    pub frames: u64,
    pub last_draw_ms: Option<f32>,
    pub device: String,
    pub brightness: f32,
    pub dropped_frames: u64,
}

/// A source on screen plus the bookkeeping to end it.
#[derive(Debug)]
struct Active {
    id: String,
    source: FrameSource,
    started: Instant,
    hold: Option<Duration>,
    last: Option<Frame>,
}

impl Active {
    fn new(
        descriptor: &SourceDescriptor,
        source: FrameSource,
        now: Instant,
        hold: Option<Duration>,
    ) -> Self {
        Self {
            id: descriptor.id(),
            source,
            started: now,
            hold,
            last: None,
        }
    }

    fn pull(&mut self, now: Instant, canvas: Size, filter: ScaleFilter) -> Result<Pull> {
        if let Some(hold) = self.hold {
            if now.saturating_duration_since(self.started) >= hold {
                return Ok(Pull::End);
            }
        }
        let pull = self.source.pull(now, canvas, filter)?;
        if let Pull::Frame(frame) = &pull {
            self.last = Some(frame.clone());
        }
        Ok(pull)
    }

    /// Like `pull`, but an exhausted source keeps showing its last frame.
    fn pull_or_hold(&mut self, now: Instant, canvas: Size, filter: ScaleFilter) -> Result<Frame> {
        match self.pull(now, canvas, filter)? {
            Pull::Frame(frame) => Ok(frame),
            Pull::End => Ok(match &self.last {
                Some(frame) => frame.fit(canvas, filter),
                None => Frame::solid(canvas, [0; 3]),
            }),
        }
    }
}

#[derive(Debug)]
struct Fade {
    from: Active,
    to: Active,
    started: Instant,
    duration: Duration,
}

impl Fade {
    fn progress(&self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        (elapsed / self.duration.as_secs_f64()).clamp(0.0, 1.0) as f32
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Playing(Active),
    Crossfading(Box<Fade>),
    Faulted(String),
}

#[derive(Debug, Default)]
struct Stats {
    frames: u64,
    dropped: u64,
    consecutive_failures: u32,
    last_draw: Option<Duration>,
    last_tick: Option<Instant>,
    fps: f32,
}

impl Stats {
    fn record_tick(&mut self, now: Instant) {
        if let Some(previous) = self.last_tick.replace(now) {
            let dt = now.saturating_duration_since(previous).as_secs_f32();
            if dt > 0.0 {
                let instant_fps = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant_fps
                } else {
                    self.fps + (instant_fps - self.fps) * FPS_SMOOTHING
                };
            }
        }
    }
}

/// The playback state machine. Owns the output device, the mapper and the
/// render settings; nothing else touches them.
#[derive(Debug)]
pub struct PlaybackEngine {
    device: OutputDevice,
    mapper: Mapper,
    settings: RenderSettings,
    config: EngineConfig,
    state: State,
    playlist: Option<PlaylistCursor>,
    stats: Stats,
    created: Instant,
    preview: Option<Frame>,
}

impl PlaybackEngine {
    /// Builds and opens the configured device.
    pub fn new(config: &AppConfig, now: Instant) -> Result<Self> {
        let (device, mapper) = build_device(&config.device)?;
        Self::with_device(device, mapper, config.render, config.engine.clone(), now)
    }

    /// Starts the engine on an already built device, opening it.
    pub fn with_device(
        mut device: OutputDevice,
        mapper: Mapper,
        settings: RenderSettings,
        config: EngineConfig,
        now: Instant,
    ) -> Result<Self> {
        settings.validate()?;
        config.validate()?;
        device.open()?;
        let size = mapper.size();
        tracing::info!(
            device = device.type_name(),
            width = size.width,
            height = size.height,
            leds = mapper.pixel_count(),
            "playback engine ready"
        );
        Ok(Self {
            device,
            mapper,
            settings,
            config,
            state: State::Idle,
            playlist: None,
            stats: Stats::default(),
            created: now,
            preview: None,
        })
    }

    pub fn state(&self) -> PlaybackState {
        match self.state {
            State::Idle => PlaybackState::Idle,
            State::Playing(_) => PlaybackState::Playing,
            State::Crossfading(_) => PlaybackState::Crossfading,
            State::Faulted(_) => PlaybackState::Faulted,
        }
    }

    /// Whether the render loop should keep ticking.
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Playing(_) | State::Crossfading(_))
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// The last corrected frame, as the device received it.
    pub fn preview(&self) -> Option<&Frame> {
        self.preview.as_ref()
    }

    /// Time between ticks for the active source; the idle poll otherwise.
    pub fn tick_period(&self) -> Duration {
        let nominal = match &self.state {
            State::Playing(active) => active.source.nominal_fps(),
            State::Crossfading(fade) => fade
                .from
                .source
                .nominal_fps()
                .max(fade.to.source.nominal_fps()),
            State::Idle | State::Faulted(_) => return self.config.idle_poll(),
        };
        self.config.tick_period(nominal)
    }

    /// Applies one command atomically. A rejected command changes nothing.
    pub fn handle(&mut self, command: Command, now: Instant) -> Result<Status> {
        match command {
            Command::Start(descriptor) => self.start(&descriptor, now)?,
            Command::StartPlaylist(playlist) => self.start_playlist(playlist, now)?,
            Command::Switch { source, crossfade } => self.switch(&source, crossfade, now)?,
            Command::Stop => self.stop(),
            Command::SetBrightness(value) => {
                render::validate_brightness(value)?;
                self.settings.brightness = value;
            }
            Command::SetRenderSettings(update) => {
                self.settings = update.merge(&self.settings)?;
            }
            Command::ConfigureDevice(config) => self.configure_device(&config)?,
        }
        Ok(self.status(now))
    }

    pub fn status(&self, now: Instant) -> Status {
        let (state, active_source_id, fault) = match &self.state {
            State::Idle => (PlaybackState::Idle, None, None),
            State::Playing(active) => (PlaybackState::Playing, Some(active.id.clone()), None),
            State::Crossfading(fade) => {
                (PlaybackState::Crossfading, Some(fade.to.id.clone()), None)
            }
            State::Faulted(reason) => (PlaybackState::Faulted, None, Some(reason.clone())),
        };
        Status {
            state,
            active_source_id,
            fault,
            fps_actual: if self.is_running() { self.stats.fps } else { 0.0 },
            uptime_ms: now.saturating_duration_since(self.created).as_millis() as u64,
            frames: self.stats.frames,
            last_draw_ms: self.stats.last_draw.map(|d| d.as_secs_f32() * 1000.0),
            device: self.device.type_name().to_owned(),
            brightness: self.settings.brightness,
            dropped_frames: self.stats.dropped,
        }
    }

    /// Renders and draws at most one frame.
    pub fn tick(&mut self, now: Instant) {
        let composite = match self.compose(now) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                self.fault(err);
                return;
            }
        };
        let corrected = render::apply(&composite, &self.settings);
        let mapped = match self.mapper.map_frame(&corrected) {
            Ok(mapped) => mapped,
            Err(err) => {
                self.fault(err);
                return;
            }
        };

        self.stats.record_tick(now);
        let began = Instant::now();
        match self.device.draw_frame(&mapped) {
            Ok(()) => {
                self.stats.frames += 1;
                self.stats.consecutive_failures = 0;
                self.stats.last_draw = Some(began.elapsed());
            }
            Err(err) => {
                self.stats.dropped += 1;
                self.stats.consecutive_failures += 1;
                if self.device.escalates_write_failures()
                    && self.stats.consecutive_failures >= self.config.max_consecutive_write_failures
                {
                    self.fault(err);
                    return;
                }
                tracing::warn!(
                    error = %err,
                    consecutive = self.stats.consecutive_failures,
                    "dropped frame"
                );
            }
        }
        self.preview = Some(self.device.snapshot().unwrap_or(corrected));
    }

    /// Releases every source and closes the device.
    pub fn shutdown(&mut self) {
        self.state = State::Idle;
        self.playlist = None;
        self.device.close();
        tracing::info!("playback engine shut down");
    }

    fn start(&mut self, descriptor: &SourceDescriptor, now: Instant) -> Result<()> {
        let source = self.open_source(descriptor)?;
        self.playlist = None;
        self.begin(Active::new(descriptor, source, now, None));
        Ok(())
    }

    fn start_playlist(&mut self, playlist: Playlist, now: Instant) -> Result<()> {
        playlist.validate()?;
        let cursor = PlaylistCursor::new(playlist);
        let active = {
            let entry = cursor.current();
            let source = self.open_source(&entry.source)?;
            Active::new(&entry.source, source, now, entry.hold())
        };
        self.begin(active);
        self.playlist = Some(cursor);
        Ok(())
    }

    /// Starts a fresh session, clearing any fault.
    fn begin(&mut self, active: Active) {
        tracing::info!(source = %active.id, "playing");
        self.state = State::Playing(active);
        self.stats = Stats::default();
    }

    fn switch(
        &mut self,
        descriptor: &SourceDescriptor,
        crossfade: Option<Crossfade>,
        now: Instant,
    ) -> Result<()> {
        if let State::Faulted(_) = self.state {
            return Err(LedCtlError::InvalidState("faulted"));
        }
        let source = self.open_source(descriptor)?;
        let next = Active::new(descriptor, source, now, None);
        self.playlist = None;
        if let State::Idle = self.state {
            self.begin(next);
            return Ok(());
        }
        let fade = crossfade.map(Crossfade::duration).filter(|d| !d.is_zero());
        self.transition(next, fade, now);
        Ok(())
    }

    fn stop(&mut self) {
        match self.state {
            State::Faulted(_) => return,
            State::Idle => {}
            _ => tracing::info!("stopped"),
        }
        self.state = State::Idle;
        self.playlist = None;
    }

    fn configure_device(&mut self, config: &DeviceConfig) -> Result<()> {
        let (mut device, mapper) = build_device(config)?;
        device.open()?;
        let mut previous = std::mem::replace(&mut self.device, device);
        previous.close();
        self.mapper = mapper;
        self.preview = None;
        self.stats.consecutive_failures = 0;
        tracing::info!(
            from = previous.type_name(),
            to = self.device.type_name(),
            "output device switched"
        );
        Ok(())
    }

    fn open_source(&self, descriptor: &SourceDescriptor) -> Result<FrameSource> {
        descriptor.open(self.config.fallback_frame())
    }

    /// Moves to `next`, fading from whatever is on screen when `fade` is set.
    /// The superseded source is dropped here, before the next tick.
    fn transition(&mut self, next: Active, fade: Option<Duration>, now: Instant) {
        let current = match std::mem::replace(&mut self.state, State::Idle) {
            State::Playing(active) => Some(active),
            State::Crossfading(fade) => {
                let Fade { to, .. } = *fade;
                Some(to)
            }
            State::Idle | State::Faulted(_) => None,
        };
        match (current, fade) {
            (Some(mut from), Some(duration)) => {
                // The outgoing side keeps animating until the fade completes.
                from.hold = None;
                tracing::info!(
                    from = %from.id,
                    to = %next.id,
                    duration_ms = duration.as_millis() as u64,
                    "crossfading"
                );
                self.state = State::Crossfading(Box::new(Fade {
                    from,
                    to: next,
                    started: now,
                    duration,
                }));
            }
            _ => {
                tracing::info!(source = %next.id, "playing");
                self.state = State::Playing(next);
            }
        }
    }

    /// Pulls the frame for this tick, resolving fade completion and natural
    /// ends on the way.
    fn compose(&mut self, now: Instant) -> Result<Option<Frame>> {
        let canvas = self.settings.rotation.source_size(self.mapper.size());
        let filter = self.config.scale_filter;
        for _ in 0..MAX_HANDOVERS {
            let ended = match &mut self.state {
                State::Idle | State::Faulted(_) => return Ok(None),
                State::Playing(active) => match active.pull(now, canvas, filter)? {
                    Pull::Frame(frame) => return Ok(Some(frame)),
                    Pull::End => true,
                },
                State::Crossfading(fade) => {
                    let t = fade.progress(now);
                    if t < 1.0 {
                        if let Pull::Frame(to) = fade.to.pull(now, canvas, filter)? {
                            let from = fade.from.pull_or_hold(now, canvas, filter)?;
                            return blend(&from, &to, t).map(Some);
                        }
                    }
                    false
                }
            };
            if ended {
                self.natural_end(now)?;
            } else {
                self.finish_fade();
            }
        }
        tracing::warn!("too many source handovers in one tick, skipping frame");
        Ok(None)
    }

    fn finish_fade(&mut self) {
        if let State::Crossfading(fade) = std::mem::replace(&mut self.state, State::Idle) {
            let Fade { to, .. } = *fade;
            tracing::debug!(source = %to.id, "crossfade complete");
            self.state = State::Playing(to);
        }
    }

    /// The active source ran out: advance the playlist or go idle.
    fn natural_end(&mut self, now: Instant) -> Result<()> {
        let Some(cursor) = self.playlist.as_mut() else {
            tracing::info!("source ended");
            self.state = State::Idle;
            return Ok(());
        };
        let Some(index) = cursor.peek_next() else {
            tracing::info!("playlist finished");
            self.state = State::Idle;
            self.playlist = None;
            return Ok(());
        };
        let entry = cursor.entry(index).clone();
        let source = entry
            .source
            .open(self.config.fallback_frame())
            .map_err(|err| LedCtlError::source_fault(err.to_string()))?;
        let fade = cursor.transition_into(&entry, &source);
        cursor.move_to(index);
        tracing::debug!(index, "playlist advanced");
        let next = Active::new(&entry.source, source, now, entry.hold());
        self.transition(next, fade, now);
        Ok(())
    }

    fn fault(&mut self, err: LedCtlError) {
        let reason = err.to_string();
        tracing::error!(%reason, "playback faulted");
        self.state = State::Faulted(reason);
        self.playlist = None;
    }
}

fn build_device(config: &DeviceConfig) -> Result<(OutputDevice, Mapper)> {
    let (mut device, mapper) = config.build()?;
    device.set_brightness(config.hardware_brightness)?;
    Ok((device, mapper))
}

/// Per-channel `a*(1-t) + b*t`, rounded half up, so `t = 1` reproduces `b`
/// exactly.
pub fn blend(a: &Frame, b: &Frame, t: f32) -> Result<Frame> {
    if a.size() != b.size() {
        return Err(LedCtlError::engine(format!(
            "cannot blend {:?} with {:?}",
            a.size(),
            b.size()
        )));
    }
    let t = t.clamp(0.0, 1.0);
    let pixels = a
        .pixels()
        .iter()
        .zip(b.pixels())
        .map(|(&x, &y)| (f32::from(x) * (1.0 - t) + f32::from(y) * t + 0.5).floor() as u8)
        .collect();
    Frame::new(a.width(), a.height(), pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::testing::MemoryBus, GeometryConfig, LedStrip, PixelOrder, PlaylistEntry,
        RenderSettingsUpdate, Rotation,
    };

    const RED: [u8; 3] = [255, 0, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn solid(color: [u8; 3]) -> SourceDescriptor {
        SourceDescriptor::Solid { color }
    }

    fn preview_engine(t0: Instant) -> PlaybackEngine {
        let config = AppConfig {
            render: RenderSettings::neutral(),
            ..AppConfig::default()
        };
        PlaybackEngine::new(&config, t0).unwrap()
    }

    fn strip_engine(t0: Instant, bus: &MemoryBus) -> PlaybackEngine {
        let mapper = Mapper::new(&GeometryConfig::default()).unwrap();
        let strip = LedStrip::new(mapper.pixel_count(), PixelOrder::Rgb, Box::new(bus.clone()));
        PlaybackEngine::with_device(
            OutputDevice::Strip(strip),
            mapper,
            RenderSettings::neutral(),
            EngineConfig::default(),
            t0,
        )
        .unwrap()
    }

    fn preview_pixel(engine: &PlaybackEngine) -> [u8; 3] {
        engine.preview().unwrap().pixel(0, 0)
    }

    #[test]
    fn start_plays_and_previews_static_source() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        let status = engine.handle(Command::Start(solid(RED)), t0).unwrap();
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.active_source_id.as_deref(), Some("solid:#ff0000"));

        engine.tick(t0);
        let preview = engine.preview().unwrap();
        assert_eq!(preview.size(), Size::new(10, 10));
        assert!(preview.pixels().chunks(3).all(|px| px == RED));
        assert_eq!(engine.status(t0).frames, 1);
    }

    #[test]
    fn crossfade_blends_linearly_and_lands_on_destination() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        engine.tick(t0);

        let status = engine
            .handle(
                Command::Switch {
                    source: solid(BLUE),
                    crossfade: Some(Crossfade { duration_ms: 1000 }),
                },
                t0,
            )
            .unwrap();
        assert_eq!(status.state, PlaybackState::Crossfading);

        engine.tick(t0);
        assert_eq!(preview_pixel(&engine), RED);
        engine.tick(t0 + ms(500));
        assert_eq!(preview_pixel(&engine), [128, 0, 128]);
        engine.tick(t0 + ms(1000));
        assert_eq!(preview_pixel(&engine), BLUE);
        let status = engine.status(t0 + ms(1000));
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.active_source_id.as_deref(), Some("solid:#0000ff"));
    }

    #[test]
    fn hard_switch_renders_new_source_next_tick() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        engine.tick(t0);
        engine
            .handle(
                Command::Switch {
                    source: solid(BLUE),
                    crossfade: None,
                },
                t0 + ms(10),
            )
            .unwrap();
        engine.tick(t0 + ms(20));
        assert_eq!(preview_pixel(&engine), BLUE);
    }

    fn three_colors() -> SourceDescriptor {
        SourceDescriptor::Colors {
            colors: vec![[10, 0, 0], [20, 0, 0], [30, 0, 0]],
            frame_ms: 100,
            looping: false,
        }
    }

    #[test]
    fn finite_sequence_without_playlist_goes_idle() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(three_colors()), t0).unwrap();
        for step in 0..3 {
            engine.tick(t0 + ms(step * 100));
            assert_eq!(engine.state(), PlaybackState::Playing);
        }
        assert_eq!(preview_pixel(&engine), [30, 0, 0]);

        engine.tick(t0 + ms(300));
        assert_eq!(engine.state(), PlaybackState::Idle);
        assert_eq!(engine.status(t0 + ms(300)).frames, 3);
        assert!(!engine.is_running());
    }

    #[test]
    fn finite_sequence_in_playlist_switches_to_next_entry() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        let playlist = Playlist {
            entries: vec![PlaylistEntry::new(three_colors()), PlaylistEntry::new(solid(BLUE))],
            looping: false,
            crossfade_ms: None,
        };
        engine.handle(Command::StartPlaylist(playlist), t0).unwrap();
        engine.tick(t0);
        engine.tick(t0 + ms(300));
        let status = engine.status(t0 + ms(300));
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.active_source_id.as_deref(), Some("solid:#0000ff"));
        assert_eq!(preview_pixel(&engine), BLUE);
    }

    #[test]
    fn playlist_crossfade_is_clamped_to_next_hold() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        let entry = |color| PlaylistEntry {
            source: solid(color),
            hold_ms: Some(1000),
        };
        let playlist = Playlist {
            entries: vec![entry(RED), entry(BLUE)],
            looping: true,
            crossfade_ms: Some(2000),
        };
        engine.handle(Command::StartPlaylist(playlist), t0).unwrap();
        engine.tick(t0);
        engine.tick(t0 + ms(1000));
        assert_eq!(engine.state(), PlaybackState::Crossfading);
        assert_eq!(preview_pixel(&engine), RED);
        // Fade runs over 1000ms, not 2000ms.
        engine.tick(t0 + ms(1500));
        assert_eq!(preview_pixel(&engine), [128, 0, 128]);
    }

    #[test]
    fn outgoing_entry_keeps_animating_after_its_hold() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        let blinking = PlaylistEntry {
            source: SourceDescriptor::Colors {
                colors: vec![RED, [0, 255, 0]],
                frame_ms: 100,
                looping: true,
            },
            hold_ms: Some(1000),
        };
        let playlist = Playlist {
            entries: vec![blinking, PlaylistEntry::new(solid([0, 0, 0]))],
            looping: false,
            crossfade_ms: Some(500),
        };
        engine.handle(Command::StartPlaylist(playlist), t0).unwrap();
        engine.tick(t0);
        engine.tick(t0 + ms(950));
        assert_eq!(preview_pixel(&engine), [0, 255, 0]);
        engine.tick(t0 + ms(1000));
        assert_eq!(engine.state(), PlaybackState::Crossfading);

        // 10% into the fade the outgoing sequence is back on its red frame.
        engine.tick(t0 + ms(1050));
        assert_eq!(engine.state(), PlaybackState::Crossfading);
        let [r, g, b] = preview_pixel(&engine);
        assert!((228..=231).contains(&r), "red channel {r}");
        assert_eq!((g, b), (0, 0));
    }

    #[test]
    fn brightness_out_of_range_is_rejected_without_change() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        let err = engine.handle(Command::SetBrightness(1.5), t0).unwrap_err();
        assert!(matches!(err, LedCtlError::OutOfRange { .. }));
        assert_eq!(engine.settings().brightness, 1.0);
    }

    #[test]
    fn settings_take_effect_on_next_tick() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        engine.tick(t0);
        engine.handle(Command::SetBrightness(0.5), t0).unwrap();
        assert_eq!(preview_pixel(&engine), RED);
        engine.tick(t0 + ms(33));
        assert_eq!(preview_pixel(&engine), [128, 0, 0]);

        let update = RenderSettingsUpdate {
            rotation: Some(Rotation::Deg90),
            ..RenderSettingsUpdate::default()
        };
        engine.handle(Command::SetRenderSettings(update), t0).unwrap();
        assert_eq!(engine.settings().rotation, Rotation::Deg90);
        assert_eq!(engine.settings().brightness, 0.5);
    }

    #[test]
    fn hardware_write_failures_escalate_and_start_recovers() {
        let t0 = Instant::now();
        let bus = MemoryBus::default();
        let mut engine = strip_engine(t0, &bus);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        *bus.failing.lock().unwrap() = true;

        for step in 0..4 {
            engine.tick(t0 + ms(step * 33));
            if step < 2 {
                assert_eq!(engine.state(), PlaybackState::Playing);
            }
        }
        let status = engine.status(t0 + ms(200));
        assert_eq!(status.state, PlaybackState::Faulted);
        assert!(status.fault.unwrap().contains("strip write failed"));
        assert_eq!(status.dropped_frames, 3);

        *bus.failing.lock().unwrap() = false;
        let status = engine.handle(Command::Start(solid(BLUE)), t0 + ms(300)).unwrap();
        assert_eq!(status.state, PlaybackState::Playing);
        assert!(status.fault.is_none());
        engine.tick(t0 + ms(300));
        assert_eq!(bus.writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_keeps_device_open_and_halts_drawing() {
        let t0 = Instant::now();
        let bus = MemoryBus::default();
        let mut engine = strip_engine(t0, &bus);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        engine.tick(t0);
        assert_eq!(engine.handle(Command::Stop, t0).unwrap().state, PlaybackState::Idle);
        engine.tick(t0 + ms(33));
        assert_eq!(bus.writes.lock().unwrap().len(), 1);

        engine.handle(Command::Start(solid(BLUE)), t0 + ms(50)).unwrap();
        engine.tick(t0 + ms(50));
        let writes = bus.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(&writes[1][..3], &BLUE);
    }

    #[test]
    fn source_fault_is_terminal_until_start() {
        let t0 = Instant::now();
        let good = std::env::temp_dir().join(format!("ledctl-playback-{}-good.png", std::process::id()));
        let bad = std::env::temp_dir().join(format!("ledctl-playback-{}-bad.png", std::process::id()));
        image::RgbImage::from_pixel(2, 2, image::Rgb([5, 5, 5]))
            .save(&good)
            .unwrap();
        std::fs::write(&bad, b"garbage").unwrap();

        let mut engine = preview_engine(t0);
        let slideshow = SourceDescriptor::Slideshow {
            paths: vec![good.clone(), bad.clone()],
            frame_ms: 100,
            looping: true,
        };
        engine.handle(Command::Start(slideshow), t0).unwrap();
        engine.tick(t0);
        engine.tick(t0 + ms(100));
        assert_eq!(engine.state(), PlaybackState::Faulted);

        let err = engine
            .handle(
                Command::Switch {
                    source: solid(RED),
                    crossfade: None,
                },
                t0 + ms(150),
            )
            .unwrap_err();
        assert!(matches!(err, LedCtlError::InvalidState(_)));
        engine.handle(Command::Stop, t0 + ms(150)).unwrap();
        assert_eq!(engine.state(), PlaybackState::Faulted);

        engine.handle(Command::Start(solid(RED)), t0 + ms(200)).unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);

        std::fs::remove_file(good).unwrap();
        std::fs::remove_file(bad).unwrap();
    }

    #[test]
    fn unavailable_source_leaves_state_unchanged() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();
        let missing = SourceDescriptor::Image {
            path: "/nonexistent/ledctl.png".into(),
        };
        let err = engine.handle(Command::Start(missing), t0).unwrap_err();
        assert!(matches!(err, LedCtlError::SourceUnavailable(_)));
        assert_eq!(
            engine.status(t0).active_source_id.as_deref(),
            Some("solid:#ff0000")
        );
    }

    #[test]
    fn configure_device_keeps_session_and_refits() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        engine.handle(Command::Start(solid(RED)), t0).unwrap();

        let wide = DeviceConfig::preview(GeometryConfig::row_major(4, 2));
        engine.handle(Command::ConfigureDevice(wide), t0).unwrap();
        let update = RenderSettingsUpdate {
            rotation: Some(Rotation::Deg90),
            ..RenderSettingsUpdate::default()
        };
        engine.handle(Command::SetRenderSettings(update), t0).unwrap();
        engine.tick(t0);
        assert_eq!(engine.preview().unwrap().size(), Size::new(4, 2));
        assert_eq!(engine.state(), PlaybackState::Playing);

        let mut broken = DeviceConfig::preview(GeometryConfig::row_major(4, 2));
        broken.geometry.pixel_count = Some(3);
        assert!(engine.handle(Command::ConfigureDevice(broken), t0).is_err());
        engine.tick(t0 + ms(33));
        assert_eq!(engine.preview().unwrap().size(), Size::new(4, 2));
    }

    #[test]
    fn tick_period_tracks_source_rate() {
        let t0 = Instant::now();
        let mut engine = preview_engine(t0);
        assert_eq!(engine.tick_period(), EngineConfig::default().idle_poll());
        engine.handle(Command::Start(three_colors()), t0).unwrap();
        let period = engine.tick_period();
        assert!(period >= ms(99) && period <= ms(101));
    }

    #[test]
    fn blend_rounds_half_up() {
        let a = Frame::solid(Size::new(1, 1), [0, 255, 1]);
        let b = Frame::solid(Size::new(1, 1), [255, 0, 2]);
        assert_eq!(blend(&a, &b, 0.0).unwrap().pixel(0, 0), [0, 255, 1]);
        assert_eq!(blend(&a, &b, 0.5).unwrap().pixel(0, 0), [128, 128, 2]);
        assert_eq!(blend(&a, &b, 1.0).unwrap().pixel(0, 0), [255, 0, 2]);
        assert!(blend(&a, &Frame::solid(Size::new(2, 1), [0; 3]), 0.5).is_err());
    }
}
