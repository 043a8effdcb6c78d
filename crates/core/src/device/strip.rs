use serde::{Deserialize, Serialize};

use crate::{LedCtlError, MappedFrame, Result};

use super::{scale_channel, LedBus};

/// Channel order expected by the LED controller chip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelOrder {
    Rgb,
    Rbg,
    #[default]
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl PixelOrder {
    pub fn permute(self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        match self {
            Self::Rgb => [r, g, b],
            Self::Rbg => [r, b, g],
            Self::Grb => [g, r, b],
            Self::Gbr => [g, b, r],
            Self::Brg => [b, r, g],
            Self::Bgr => [b, g, r],
        }
    }
}

/// Individually addressable strip written as one flat buffer.
pub struct LedStrip {
    count: usize,
    order: PixelOrder,
    bus: Box<dyn LedBus>,
    level: f32,
    open: bool,
}

impl LedStrip {
    pub fn new(count: usize, order: PixelOrder, bus: Box<dyn LedBus>) -> Self {
        Self {
            count,
            order,
            bus,
            level: 1.0,
            open: false,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub(super) fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.bus
            .open()
            .map_err(|err| LedCtlError::device_write(format!("strip open failed: {err}")))?;
        self.open = true;
        tracing::info!(count = self.count, order = ?self.order, "led strip open");
        Ok(())
    }

    pub(super) fn close(&mut self) {
        if self.open {
            self.bus.close();
            self.open = false;
        }
    }

    pub(super) fn set_brightness(&mut self, value: f32) {
        // Strip controllers take an 8-bit level.
        self.level = (value * 255.0).round() / 255.0;
    }

    pub(super) fn draw_frame(&mut self, frame: &MappedFrame) -> Result<()> {
        if !self.open {
            return Err(LedCtlError::device_write("led strip is not open"));
        }
        if frame.len() != self.count {
            return Err(LedCtlError::device_write(format!(
                "frame has {} LEDs, strip has {}",
                frame.len(),
                self.count
            )));
        }
        let mut payload = Vec::with_capacity(self.count * 3);
        for pixel in frame.pixels() {
            payload.extend(
                self.order
                    .permute(*pixel)
                    .iter()
                    .map(|&c| scale_channel(c, self.level)),
            );
        }
        self.bus
            .write(&payload)
            .map_err(|err| LedCtlError::device_write(format!("strip write failed: {err}")))
    }
}

impl std::fmt::Debug for LedStrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedStrip")
            .field("count", &self.count)
            .field("order", &self.order)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
