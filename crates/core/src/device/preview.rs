use crate::{Frame, LedCtlError, MappedFrame, Result, Size};

use super::scale_channel;

/// In-memory sink. Keeps the last frame for `preview()`; always available.
///
/// The buffer is read back row-major, which is why `DeviceConfig::build`
/// only accepts row-major preview geometries. The hardware level is applied
/// like on the physical variants.
#[derive(Debug)]
pub struct PreviewDevice {
    size: Size,
    level: f32,
    latest: Option<Frame>,
}

impl PreviewDevice {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            level: 1.0,
            latest: None,
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub(super) fn open(&mut self) {}

    pub(super) fn close(&mut self) {
        self.latest = None;
    }

    pub(super) fn set_brightness(&mut self, value: f32) {
        self.level = value;
    }

    pub(super) fn draw_frame(&mut self, frame: &MappedFrame) -> Result<()> {
        if frame.len() != self.size.area() {
            return Err(LedCtlError::device_write(format!(
                "frame has {} LEDs, preview holds {}",
                frame.len(),
                self.size.area()
            )));
        }
        let level = self.level;
        let pixels = frame
            .pixels()
            .iter()
            .flatten()
            .map(|&c| scale_channel(c, level))
            .collect();
        self.latest = Some(Frame::new(self.size.width, self.size.height, pixels)?);
        Ok(())
    }

    pub fn snapshot(&self) -> Option<Frame> {
        self.latest.clone()
    }
}
