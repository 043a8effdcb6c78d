//! Frame sources: lazy, possibly infinite frame sequences pulled once per
//! tick.

mod builtin;

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use image::{codecs::gif::GifDecoder, AnimationDecoder};
use serde::{Deserialize, Serialize};

use crate::{Frame, LedCtlError, Result, ScaleFilter, Size};

pub use builtin::Builtin;

const STATIC_FPS: f32 = 30.0;
const MIN_FRAME_DURATION: Duration = Duration::from_millis(1);

fn default_true() -> bool {
    true
}

/// Serializable description of what to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Solid {
        color: [u8; 3],
    },
    Image {
        path: PathBuf,
    },
    /// Animated GIF played with its own frame delays.
    Animation {
        path: PathBuf,
        #[serde(rename = "loop", default = "default_true")]
        looping: bool,
    },
    /// Image files shown in order, decoded as they come up.
    Slideshow {
        paths: Vec<PathBuf>,
        frame_ms: u64,
        #[serde(rename = "loop", default = "default_true")]
        looping: bool,
    },
    /// Solid colors shown in order.
    Colors {
        colors: Vec<[u8; 3]>,
        frame_ms: u64,
        #[serde(rename = "loop", default = "default_true")]
        looping: bool,
    },
    /// `{"kind": "builtin", "name": "scrolling_text", "text": "HI"}`
    Builtin {
        #[serde(flatten)]
        builtin: Builtin,
    },
}

impl SourceDescriptor {
    /// Stable identifier reported by `status()`.
    pub fn id(&self) -> String {
        match self {
            Self::Solid { color: [r, g, b] } => format!("solid:#{r:02x}{g:02x}{b:02x}"),
            Self::Image { path } => format!("image:{}", path.display()),
            Self::Animation { path, .. } => format!("animation:{}", path.display()),
            Self::Slideshow { paths, .. } => format!("slideshow:{}", paths.len()),
            Self::Colors { colors, .. } => format!("colors:{}", colors.len()),
            Self::Builtin { builtin } => format!("builtin:{}", builtin.name()),
        }
    }

    /// Opens the source. Every failure here is `SourceUnavailable`.
    ///
    /// `fallback_frame` is used for animation frames without a delay.
    pub fn open(&self, fallback_frame: Duration) -> Result<FrameSource> {
        let source = match self {
            Self::Solid { color } => FrameSource::Static(StaticSource::new(Frame::solid(
                Size::new(1, 1),
                *color,
            ))),
            Self::Image { path } => FrameSource::Static(StaticSource::new(load_image(path)?)),
            Self::Animation { path, looping } => {
                let (frames, durations) = load_gif(path, fallback_frame)?;
                FrameSource::Sequence(SequenceSource::new(
                    SequenceFrames::Decoded(frames),
                    durations,
                    *looping,
                )?)
            }
            Self::Slideshow {
                paths,
                frame_ms,
                looping,
            } => {
                if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                    return Err(LedCtlError::source_unavailable(format!(
                        "asset not found: {}",
                        missing.display()
                    )));
                }
                let durations = vec![Duration::from_millis(*frame_ms); paths.len()];
                FrameSource::Sequence(SequenceSource::new(
                    SequenceFrames::Files(paths.clone()),
                    durations,
                    *looping,
                )?)
            }
            Self::Colors {
                colors,
                frame_ms,
                looping,
            } => {
                let frames = colors
                    .iter()
                    .map(|c| Frame::solid(Size::new(1, 1), *c))
                    .collect::<Vec<_>>();
                let durations = vec![Duration::from_millis(*frame_ms); frames.len()];
                FrameSource::Sequence(SequenceSource::new(
                    SequenceFrames::Decoded(frames),
                    durations,
                    *looping,
                )?)
            }
            Self::Builtin { builtin } => {
                FrameSource::Procedural(ProceduralSource::new(builtin.clone()))
            }
        };
        tracing::debug!(id = %self.id(), "opened source");
        Ok(source)
    }
}

/// Result of pulling a source once.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Frame(Frame),
    /// A finite source ran past its last frame.
    End,
}

/// The closed set of frame source variants.
#[derive(Debug)]
pub enum FrameSource {
    Static(StaticSource),
    Sequence(SequenceSource),
    Procedural(ProceduralSource),
}

impl FrameSource {
    /// Returns the frame due at `now`, fitted to `canvas`.
    pub fn pull(&mut self, now: Instant, canvas: Size, filter: ScaleFilter) -> Result<Pull> {
        match self {
            Self::Static(source) => Ok(Pull::Frame(source.pull(canvas, filter))),
            Self::Sequence(source) => source.pull(now, canvas, filter),
            Self::Procedural(source) => Ok(Pull::Frame(source.pull(now, canvas))),
        }
    }

    pub fn nominal_fps(&self) -> f32 {
        match self {
            Self::Static(_) => STATIC_FPS,
            Self::Sequence(source) => source.nominal_fps(),
            Self::Procedural(source) => source.builtin.nominal_fps(),
        }
    }

    /// How long the source plays before ending on its own, if it does.
    pub fn finite_duration(&self) -> Option<Duration> {
        match self {
            Self::Sequence(source) if !source.looping => Some(source.total_duration()),
            _ => None,
        }
    }
}

/// Infinite source repeating one cached frame.
#[derive(Debug)]
pub struct StaticSource {
    frame: Frame,
    fitted: Option<Frame>,
}

impl StaticSource {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            fitted: None,
        }
    }

    fn pull(&mut self, canvas: Size, filter: ScaleFilter) -> Frame {
        match &self.fitted {
            Some(frame) if frame.size() == canvas => frame.clone(),
            _ => {
                let frame = self.frame.fit(canvas, filter);
                self.fitted = Some(frame.clone());
                frame
            }
        }
    }
}

#[derive(Debug)]
enum SequenceFrames {
    Decoded(Vec<Frame>),
    Files(Vec<PathBuf>),
}

impl SequenceFrames {
    fn len(&self) -> usize {
        match self {
            Self::Decoded(frames) => frames.len(),
            Self::Files(paths) => paths.len(),
        }
    }
}

/// Finite ordered frames with per-frame durations, advanced by wall time.
#[derive(Debug)]
pub struct SequenceSource {
    frames: SequenceFrames,
    durations: Vec<Duration>,
    looping: bool,
    index: usize,
    shown_at: Option<Instant>,
    ended: bool,
    cached: Option<(usize, Frame)>,
}

impl SequenceSource {
    fn new(frames: SequenceFrames, durations: Vec<Duration>, looping: bool) -> Result<Self> {
        if frames.len() == 0 {
            return Err(LedCtlError::source_unavailable("sequence has no frames"));
        }
        let durations = durations
            .into_iter()
            .map(|d| d.max(MIN_FRAME_DURATION))
            .collect();
        Ok(Self {
            frames,
            durations,
            looping,
            index: 0,
            shown_at: None,
            ended: false,
            cached: None,
        })
    }

    fn total_duration(&self) -> Duration {
        self.durations.iter().sum()
    }

    /// Paced by the shortest frame so no frame falls between two ticks.
    fn nominal_fps(&self) -> f32 {
        let shortest = self
            .durations
            .iter()
            .copied()
            .min()
            .unwrap_or(MIN_FRAME_DURATION);
        1.0 / shortest.as_secs_f32()
    }

    fn pull(&mut self, now: Instant, canvas: Size, filter: ScaleFilter) -> Result<Pull> {
        if self.ended {
            return Ok(Pull::End);
        }
        let mut shown_at = *self.shown_at.get_or_insert(now);

        if self.looping {
            // Skip whole cycles after a long stall instead of walking them.
            let total = self.total_duration();
            let elapsed = now.saturating_duration_since(shown_at);
            if elapsed >= total + self.durations[self.index] {
                let cycles = (elapsed.as_nanos() / total.as_nanos()).saturating_sub(1) as u32;
                shown_at += total * cycles;
            }
        }

        while now.saturating_duration_since(shown_at) >= self.durations[self.index] {
            shown_at += self.durations[self.index];
            self.index += 1;
            if self.index == self.frames.len() {
                if !self.looping {
                    self.ended = true;
                    self.index -= 1;
                    return Ok(Pull::End);
                }
                self.index = 0;
            }
        }
        self.shown_at = Some(shown_at);

        let frame = self.frame_at(self.index)?;
        Ok(Pull::Frame(frame.fit(canvas, filter)))
    }

    fn frame_at(&mut self, index: usize) -> Result<Frame> {
        if let Some((cached, frame)) = &self.cached {
            if *cached == index {
                return Ok(frame.clone());
            }
        }
        let frame = match &self.frames {
            SequenceFrames::Decoded(frames) => frames[index].clone(),
            SequenceFrames::Files(paths) => {
                let path = &paths[index];
                decode_file(path).map_err(|err| {
                    LedCtlError::source_fault(format!("{}: {err}", path.display()))
                })?
            }
        };
        self.cached = Some((index, frame.clone()));
        Ok(frame)
    }
}

/// Infinite source computed from the time since its first pull.
#[derive(Debug)]
pub struct ProceduralSource {
    builtin: Builtin,
    started: Option<Instant>,
}

impl ProceduralSource {
    pub fn new(builtin: Builtin) -> Self {
        Self {
            builtin,
            started: None,
        }
    }

    fn pull(&mut self, now: Instant, canvas: Size) -> Frame {
        let started = *self.started.get_or_insert(now);
        self.builtin
            .render(now.saturating_duration_since(started), canvas)
    }
}

fn decode_file(path: &Path) -> Result<Frame> {
    let image = image::open(path)?.to_rgb8();
    Frame::from_rgb_image(&image)
}

fn load_image(path: &Path) -> Result<Frame> {
    decode_file(path).map_err(|err| {
        LedCtlError::source_unavailable(format!("failed to load image {}: {err}", path.display()))
    })
}

fn load_gif(path: &Path, fallback_frame: Duration) -> Result<(Vec<Frame>, Vec<Duration>)> {
    let unavailable = |err: &dyn std::fmt::Display| {
        LedCtlError::source_unavailable(format!("failed to load gif {}: {err}", path.display()))
    };
    let file = File::open(path).map_err(|err| unavailable(&err))?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|err| unavailable(&err))?;
    let decoded = decoder
        .into_frames()
        .collect_frames()
        .map_err(|err| unavailable(&err))?;
    if decoded.is_empty() {
        return Err(unavailable(&"no frames"));
    }

    let mut frames = Vec::with_capacity(decoded.len());
    let mut durations = Vec::with_capacity(decoded.len());
    for frame in decoded {
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay_ms = if denom == 0 { 0 } else { numer / denom };
        durations.push(if delay_ms == 0 {
            fallback_frame
        } else {
            Duration::from_millis(u64::from(delay_ms))
        });

        // Transparent pixels are shown as unlit.
        let rgba = frame.into_buffer();
        let (width, height) = rgba.dimensions();
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for px in rgba.pixels() {
            let [r, g, b, a] = px.0;
            let a = u16::from(a);
            for c in [r, g, b] {
                rgb.push(((u16::from(c) * a + 127) / 255) as u8);
            }
        }
        frames.push(Frame::new(width, height, rgb).map_err(|err| unavailable(&err))?);
    }
    Ok((frames, durations))
}
