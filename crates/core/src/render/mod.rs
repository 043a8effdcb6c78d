//! Color pipeline: geometric transform, channel balance, gamma and
//! brightness, always in that order.

use serde::{Deserialize, Serialize};

use crate::{Frame, LedCtlError, Result, Size};

pub const GAMMA_RANGE: (f32, f32) = (0.1, 5.0);
pub const BALANCE_RANGE: (f32, f32) = (0.0, 2.0);

/// Counter-clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    /// Size a frame must have before rotation to come out as `output`.
    pub fn source_size(self, output: Size) -> Size {
        if self.swaps_axes() {
            output.transposed()
        } else {
            output
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = LedCtlError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            other => Err(LedCtlError::OutOfRange {
                name: "rotation",
                value: f64::from(other),
                min: 0.0,
                max: 270.0,
            }),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(value: Rotation) -> Self {
        value.degrees()
    }
}

/// Process-wide render settings. Applied on the next tick, never
/// retroactively.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub brightness: f32,
    pub gamma: f32,
    pub balance: [f32; 3],
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub rotation: Rotation,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            gamma: 2.2,
            balance: [1.0; 3],
            mirror_x: false,
            mirror_y: false,
            rotation: Rotation::Deg0,
        }
    }
}

impl RenderSettings {
    /// Settings under which [`apply`] returns its input unchanged.
    pub fn neutral() -> Self {
        Self {
            gamma: 1.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_brightness(self.brightness)?;
        LedCtlError::check_range(
            "gamma",
            f64::from(self.gamma),
            f64::from(GAMMA_RANGE.0),
            f64::from(GAMMA_RANGE.1),
        )?;
        for value in self.balance {
            LedCtlError::check_range(
                "balance",
                f64::from(value),
                f64::from(BALANCE_RANGE.0),
                f64::from(BALANCE_RANGE.1),
            )?;
        }
        Ok(())
    }
}

pub fn validate_brightness(value: f32) -> Result<()> {
    LedCtlError::check_range("brightness", f64::from(value), 0.0, 1.0)
}

/// Partial update from the command interface; `None` keeps the current
/// value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettingsUpdate {
    pub gamma: Option<f32>,
    pub balance: Option<[f32; 3]>,
    pub mirror_x: Option<bool>,
    pub mirror_y: Option<bool>,
    pub rotation: Option<Rotation>,
}

impl RenderSettingsUpdate {
    /// Returns the merged settings, or an error leaving `current` untouched.
    pub fn merge(&self, current: &RenderSettings) -> Result<RenderSettings> {
        let merged = RenderSettings {
            brightness: current.brightness,
            gamma: self.gamma.unwrap_or(current.gamma),
            balance: self.balance.unwrap_or(current.balance),
            mirror_x: self.mirror_x.unwrap_or(current.mirror_x),
            mirror_y: self.mirror_y.unwrap_or(current.mirror_y),
            rotation: self.rotation.unwrap_or(current.rotation),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Runs the full pipeline over `frame`. Pure: same input and settings give
/// the same output.
pub fn apply(frame: &Frame, settings: &RenderSettings) -> Frame {
    let transformed = transform(frame, settings.mirror_x, settings.mirror_y, settings.rotation);
    let lut = ChannelLut::new(settings);
    if lut.is_identity() {
        return transformed;
    }
    let size = transformed.size();
    Frame::from_fn(size, |x, y| lut.correct(transformed.pixel(x, y)))
}

/// Rotate counter-clockwise, then mirror. 90/270 swap width and height.
pub fn transform(frame: &Frame, mirror_x: bool, mirror_y: bool, rotation: Rotation) -> Frame {
    if !mirror_x && !mirror_y && rotation == Rotation::Deg0 {
        return frame.clone();
    }
    let (w, h) = (frame.width(), frame.height());
    let out = if rotation.swaps_axes() {
        Size::new(h, w)
    } else {
        Size::new(w, h)
    };
    Frame::from_fn(out, |x, y| {
        // Position in the rotated, unmirrored frame.
        let rx = if mirror_x { out.width - 1 - x } else { x };
        let ry = if mirror_y { out.height - 1 - y } else { y };
        let (sx, sy) = match rotation {
            Rotation::Deg0 => (rx, ry),
            Rotation::Deg90 => (w - 1 - ry, rx),
            Rotation::Deg180 => (w - 1 - rx, h - 1 - ry),
            Rotation::Deg270 => (ry, h - 1 - rx),
        };
        frame.pixel(sx, sy)
    })
}

/// Balance, gamma and brightness folded into one table per channel.
#[derive(Debug, Clone)]
struct ChannelLut {
    tables: [[u8; 256]; 3],
}

impl ChannelLut {
    fn new(settings: &RenderSettings) -> Self {
        let mut tables = [[0u8; 256]; 3];
        for (channel, table) in tables.iter_mut().enumerate() {
            let balance = settings.balance[channel];
            for (input, slot) in table.iter_mut().enumerate() {
                let balanced = (input as f32 * balance).clamp(0.0, 255.0);
                let corrected = (255.0 * (balanced / 255.0).powf(settings.gamma)).clamp(0.0, 255.0);
                let scaled = (corrected * settings.brightness).clamp(0.0, 255.0);
                *slot = (scaled + 0.5).floor().min(255.0) as u8;
            }
        }
        Self { tables }
    }

    fn is_identity(&self) -> bool {
        self.tables
            .iter()
            .all(|table| table.iter().enumerate().all(|(i, &v)| i == usize::from(v)))
    }

    fn correct(&self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        [
            self.tables[0][usize::from(r)],
            self.tables[1][usize::from(g)],
            self.tables[2][usize::from(b)],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(size: Size) -> Frame {
        Frame::from_fn(size, |x, y| {
            [
                (x * 37 % 256) as u8,
                (y * 53 % 256) as u8,
                ((x + y) * 11 % 256) as u8,
            ]
        })
    }

    #[test]
    fn neutral_settings_are_identity() {
        let frame = gradient(Size::new(9, 7));
        assert_eq!(apply(&frame, &RenderSettings::neutral()), frame);

        let every_value = Frame::from_fn(Size::new(256, 1), |x, _| [x as u8; 3]);
        assert_eq!(apply(&every_value, &RenderSettings::neutral()), every_value);
    }

    #[test]
    fn brightness_is_monotonic() {
        let frame = gradient(Size::new(16, 16));
        let settings = |brightness| RenderSettings {
            brightness,
            ..RenderSettings::default()
        };
        let levels = [0.0, 0.1, 0.25, 0.5, 0.75, 0.9, 1.0];
        for pair in levels.windows(2) {
            let low = apply(&frame, &settings(pair[0]));
            let high = apply(&frame, &settings(pair[1]));
            assert!(low
                .pixels()
                .iter()
                .zip(high.pixels())
                .all(|(l, h)| l <= h));
        }
    }

    #[test]
    fn four_quarter_turns_restore_the_frame() {
        let frame = gradient(Size::new(5, 3));
        let mut current = frame.clone();
        for _ in 0..4 {
            current = transform(&current, false, false, Rotation::Deg90);
        }
        assert_eq!(current, frame);
    }

    #[test]
    fn quarter_turn_swaps_dimensions_counter_clockwise() {
        let frame = Frame::from_fn(Size::new(3, 2), |x, y| [x as u8, y as u8, 0]);
        let rotated = transform(&frame, false, false, Rotation::Deg90);
        assert_eq!(rotated.size(), Size::new(2, 3));
        // Top-right moves to top-left, top-left to bottom-left.
        assert_eq!(rotated.pixel(0, 0), [2, 0, 0]);
        assert_eq!(rotated.pixel(1, 0), [2, 1, 0]);
        assert_eq!(rotated.pixel(0, 2), [0, 0, 0]);
        assert_eq!(rotated.pixel(1, 2), [0, 1, 0]);
    }

    #[test]
    fn mirroring_applies_after_rotation() {
        let frame = Frame::from_fn(Size::new(3, 2), |x, y| [x as u8, y as u8, 0]);
        let turned = transform(&frame, true, false, Rotation::Deg90);
        // Rotated top row [2,0],[2,1] flipped left to right.
        assert_eq!(turned.pixel(0, 0), [2, 1, 0]);
        assert_eq!(turned.pixel(1, 0), [2, 0, 0]);
        assert_eq!(turned.pixel(0, 2), [0, 1, 0]);
    }

    #[test]
    fn rotate_270_undoes_rotate_90() {
        let frame = gradient(Size::new(4, 6));
        let there = transform(&frame, false, false, Rotation::Deg90);
        assert_eq!(transform(&there, false, false, Rotation::Deg270), frame);
    }

    #[test]
    fn mirrors_flip_axes() {
        let frame = Frame::from_fn(Size::new(3, 2), |x, y| [x as u8, y as u8, 0]);
        let flipped = transform(&frame, true, true, Rotation::Deg0);
        assert_eq!(flipped.pixel(0, 0), [2, 1, 0]);
        assert_eq!(flipped.pixel(2, 1), [0, 0, 0]);
    }

    #[test]
    fn gamma_darkens_midtones_and_keeps_extremes() {
        let frame = Frame::from_fn(Size::new(3, 1), |x, _| [[0, 128, 255][x as usize]; 3]);
        let out = apply(&frame, &RenderSettings::default());
        assert_eq!(out.pixel(0, 0), [0; 3]);
        assert!(out.pixel(1, 0)[0] < 128);
        assert_eq!(out.pixel(2, 0), [255; 3]);
    }

    #[test]
    fn balance_scales_channels_and_clamps() {
        let frame = Frame::solid(Size::new(1, 1), [200, 200, 200]);
        let settings = RenderSettings {
            balance: [2.0, 0.5, 1.0],
            ..RenderSettings::neutral()
        };
        assert_eq!(apply(&frame, &settings).pixel(0, 0), [255, 100, 200]);
    }

    #[test]
    fn update_merges_and_validates() {
        let current = RenderSettings::default();
        let update = RenderSettingsUpdate {
            rotation: Some(Rotation::Deg180),
            mirror_x: Some(true),
            ..Default::default()
        };
        let merged = update.merge(&current).unwrap();
        assert_eq!(merged.rotation, Rotation::Deg180);
        assert!(merged.mirror_x);
        assert_eq!(merged.gamma, current.gamma);

        let bad = RenderSettingsUpdate {
            gamma: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            bad.merge(&current),
            Err(LedCtlError::OutOfRange { name: "gamma", .. })
        ));
    }

    #[test]
    fn rotation_deserializes_from_degrees() {
        let rotation: Rotation = serde_json::from_str("270").unwrap();
        assert_eq!(rotation, Rotation::Deg270);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
        assert_eq!(Rotation::Deg90.source_size(Size::new(8, 4)), Size::new(4, 8));
    }
}
