use crate::{LedCtlError, MappedFrame, Result, Size};

use super::{scale_channel, LedBus};

/// Panel addressed by (row, col). The payload is the panel's rows top to
/// bottom, three bytes per LED, at the panel's output level.
pub struct MatrixPanel {
    size: Size,
    bus: Box<dyn LedBus>,
    level: f32,
    open: bool,
}

impl MatrixPanel {
    pub fn new(size: Size, bus: Box<dyn LedBus>) -> Self {
        Self {
            size,
            bus,
            level: 1.0,
            open: false,
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub(super) fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        self.bus
            .open()
            .map_err(|err| LedCtlError::device_write(format!("matrix open failed: {err}")))?;
        self.open = true;
        tracing::info!(width = self.size.width, height = self.size.height, "matrix panel open");
        Ok(())
    }

    pub(super) fn close(&mut self) {
        if self.open {
            self.bus.close();
            self.open = false;
        }
    }

    pub(super) fn set_brightness(&mut self, value: f32) {
        // Panels take a whole-percent level.
        self.level = (value * 100.0).round() / 100.0;
    }

    pub(super) fn draw_frame(&mut self, frame: &MappedFrame) -> Result<()> {
        if !self.open {
            return Err(LedCtlError::device_write("matrix panel is not open"));
        }
        if frame.size() != self.size || frame.len() != self.size.area() {
            return Err(LedCtlError::device_write(format!(
                "frame {}x{} ({} LEDs) does not match panel {}x{}",
                frame.size().width,
                frame.size().height,
                frame.len(),
                self.size.width,
                self.size.height
            )));
        }

        let mut payload = Vec::with_capacity(frame.len() * 3);
        for row in frame.pixels().chunks(self.size.width as usize) {
            for pixel in row {
                payload.extend(pixel.iter().map(|&c| scale_channel(c, self.level)));
            }
        }
        self.bus
            .write(&payload)
            .map_err(|err| LedCtlError::device_write(format!("matrix write failed: {err}")))
    }
}

impl std::fmt::Debug for MatrixPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixPanel")
            .field("size", &self.size)
            .field("level", &self.level)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
