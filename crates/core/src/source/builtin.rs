//! Procedural animations. Each frame is a pure function of elapsed time,
//! so playback speed does not depend on how regularly the engine ticks.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Frame, Size};

/// Hue advance of the color cycle, degrees per second.
const HUE_SPEED: f32 = 187.5;
/// Stripe scroll speed, pixels per second.
const STRIPE_SPEED: f32 = 33.0;
/// Text scroll speed, pixels per second.
const TEXT_SPEED: f32 = 66.0;
const TEXT_COLOR: [u8; 3] = [255, 255, 0];
const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: i64 = 7;

fn default_text() -> String {
    "HELLO".to_owned()
}

/// Selected by the `name` field next to the descriptor's `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Builtin {
    /// Diagonal rainbow slowly rotating through the hue wheel.
    ColorCycle,
    /// Red bars scrolling to the right.
    MovingStripes,
    /// Yellow 5x7 text entering on the right and leaving on the left.
    ScrollingText {
        #[serde(default = "default_text")]
        text: String,
    },
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ColorCycle => "color_cycle",
            Self::MovingStripes => "moving_stripes",
            Self::ScrollingText { .. } => "scrolling_text",
        }
    }

    pub fn nominal_fps(&self) -> f32 {
        match self {
            Self::ColorCycle => 62.5,
            Self::MovingStripes | Self::ScrollingText { .. } => 33.0,
        }
    }

    pub fn render(&self, elapsed: Duration, canvas: Size) -> Frame {
        let secs = elapsed.as_secs_f32();
        match self {
            Self::ColorCycle => {
                let base = (secs * HUE_SPEED) % 360.0;
                Frame::from_fn(canvas, |x, y| {
                    let hue = (base + ((x + y) * 2) as f32) % 360.0;
                    hsv_to_rgb(hue / 360.0, 1.0, 1.0)
                })
            }
            Self::MovingStripes => {
                let stripe = (canvas.width / 8).max(2) as i64;
                let offset = (secs * STRIPE_SPEED) as i64 % (stripe * 2);
                Frame::from_fn(canvas, |x, _| {
                    if (i64::from(x) - offset).rem_euclid(stripe * 2) < stripe {
                        [255, 0, 0]
                    } else {
                        [0, 0, 0]
                    }
                })
            }
            Self::ScrollingText { text } => {
                let columns = text_columns(text);
                let width = i64::from(canvas.width);
                let span = columns.len() as i64;
                let offset = (secs * TEXT_SPEED) as i64 % (width + span).max(1);
                let left = width - offset;
                let top = (i64::from(canvas.height) - GLYPH_HEIGHT) / 2;
                Frame::from_fn(canvas, |x, y| {
                    let col = i64::from(x) - left;
                    let row = i64::from(y) - top;
                    let lit = (0..span).contains(&col)
                        && (0..GLYPH_HEIGHT).contains(&row)
                        && columns[col as usize] & (1 << row) != 0;
                    if lit {
                        TEXT_COLOR
                    } else {
                        [0, 0, 0]
                    }
                })
            }
        }
    }
}

/// Column bitmaps for `text`, one blank column after every glyph.
fn text_columns(text: &str) -> Vec<u8> {
    let mut columns = Vec::with_capacity(text.chars().count() * (GLYPH_WIDTH + 1));
    for c in text.chars() {
        columns.extend(glyph(c.to_ascii_uppercase()));
        columns.push(0);
    }
    columns
}

/// 5x7 glyphs, one byte per column, bit 0 at the top.
fn glyph(c: char) -> [u8; GLYPH_WIDTH] {
    match c {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00],
        '!' => [0x00, 0x00, 0x5f, 0x00, 0x00],
        '-' => [0x08, 0x08, 0x08, 0x08, 0x08],
        '.' => [0x00, 0x60, 0x60, 0x00, 0x00],
        ':' => [0x00, 0x36, 0x36, 0x00, 0x00],
        '0' => [0x3e, 0x51, 0x49, 0x45, 0x3e],
        '1' => [0x00, 0x42, 0x7f, 0x40, 0x00],
        '2' => [0x42, 0x61, 0x51, 0x49, 0x46],
        '3' => [0x21, 0x41, 0x45, 0x4b, 0x31],
        '4' => [0x18, 0x14, 0x12, 0x7f, 0x10],
        '5' => [0x27, 0x45, 0x45, 0x45, 0x39],
        '6' => [0x3c, 0x4a, 0x49, 0x49, 0x30],
        '7' => [0x01, 0x71, 0x09, 0x05, 0x03],
        '8' => [0x36, 0x49, 0x49, 0x49, 0x36],
        '9' => [0x06, 0x49, 0x49, 0x29, 0x1e],
        'A' => [0x7e, 0x11, 0x11, 0x11, 0x7e],
        'B' => [0x7f, 0x49, 0x49, 0x49, 0x36],
        'C' => [0x3e, 0x41, 0x41, 0x41, 0x22],
        'D' => [0x7f, 0x41, 0x41, 0x22, 0x1c],
        'E' => [0x7f, 0x49, 0x49, 0x49, 0x41],
        'F' => [0x7f, 0x09, 0x09, 0x01, 0x01],
        'G' => [0x3e, 0x41, 0x41, 0x51, 0x32],
        'H' => [0x7f, 0x08, 0x08, 0x08, 0x7f],
        'I' => [0x00, 0x41, 0x7f, 0x41, 0x00],
        'J' => [0x20, 0x40, 0x41, 0x3f, 0x01],
        'K' => [0x7f, 0x08, 0x14, 0x22, 0x41],
        'L' => [0x7f, 0x40, 0x40, 0x40, 0x40],
        'M' => [0x7f, 0x02, 0x04, 0x02, 0x7f],
        'N' => [0x7f, 0x04, 0x08, 0x10, 0x7f],
        'O' => [0x3e, 0x41, 0x41, 0x41, 0x3e],
        'P' => [0x7f, 0x09, 0x09, 0x09, 0x06],
        'Q' => [0x3e, 0x41, 0x51, 0x21, 0x5e],
        'R' => [0x7f, 0x09, 0x19, 0x29, 0x46],
        'S' => [0x46, 0x49, 0x49, 0x49, 0x31],
        'T' => [0x01, 0x01, 0x7f, 0x01, 0x01],
        'U' => [0x3f, 0x40, 0x40, 0x40, 0x3f],
        'V' => [0x1f, 0x20, 0x40, 0x20, 0x1f],
        'W' => [0x7f, 0x20, 0x18, 0x20, 0x7f],
        'X' => [0x63, 0x14, 0x08, 0x14, 0x63],
        'Y' => [0x03, 0x04, 0x78, 0x04, 0x03],
        'Z' => [0x61, 0x51, 0x49, 0x45, 0x43],
        // '?' for anything without a glyph.
        _ => [0x02, 0x01, 0x51, 0x09, 0x06],
    }
}

/// `h`, `s`, `v` in `[0, 1]`.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = (255.0 * v * (1.0 - s)) as u8;
    let q = (255.0 * v * (1.0 - f * s)) as u8;
    let t = (255.0 * v * (1.0 - (1.0 - f) * s)) as u8;
    let v = (255.0 * v) as u8;
    match sector as i32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}
