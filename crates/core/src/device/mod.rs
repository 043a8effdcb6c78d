//! Output devices: the closed set of sinks a mapped frame can be written to.
//!
//! Hardware variants talk to the LEDs through an [`LedBus`], so the wire
//! transport (SPI device node, FIFO to a panel daemon, in-memory bus in
//! tests) is chosen independently from the pixel format.

mod matrix;
mod network;
mod preview;
mod strip;

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{Frame, GeometryConfig, Layout, LedCtlError, MappedFrame, Mapper, Result};

pub use matrix::MatrixPanel;
pub use network::{NetworkDevice, DNRGB_MAX_LEDS, DRGB_MAX_LEDS, NETWORK_MAX_LEDS};
pub use preview::PreviewDevice;
pub use strip::{LedStrip, PixelOrder};

pub const DEFAULT_WLED_PORT: u16 = 21324;

/// Raw byte transport behind the hardware drivers.
pub trait LedBus: Send {
    fn open(&mut self) -> io::Result<()>;
    /// Writes one complete frame payload.
    fn write(&mut self, payload: &[u8]) -> io::Result<()>;
    fn close(&mut self);
}

/// Bus backed by a writable device node or FIFO.
#[derive(Debug)]
pub struct FileBus {
    path: PathBuf,
    file: Option<File>,
}

impl FileBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }
}

impl LedBus for FileBus {
    fn open(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            self.file = Some(OpenOptions::new().write(true).open(&self.path)?);
        }
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "bus is not open"))?;
        file.write_all(payload)?;
        file.flush()
    }

    fn close(&mut self) {
        self.file = None;
    }
}

fn default_level() -> f32 {
    1.0
}

fn default_port() -> u16 {
    DEFAULT_WLED_PORT
}

fn default_send_timeout_ms() -> u64 {
    20
}

fn default_hold_seconds() -> u8 {
    2
}

/// Device-specific part of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    Preview,
    /// HUB75-style panel addressed by (row, col).
    Matrix { bus: PathBuf },
    /// WS281x-style strip addressed by flat index.
    Strip {
        bus: PathBuf,
        #[serde(default)]
        pixel_order: PixelOrder,
    },
    /// WLED realtime UDP receiver.
    Network {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_send_timeout_ms")]
        send_timeout_ms: u64,
        #[serde(default = "default_hold_seconds")]
        hold_seconds: u8,
    },
}

/// Everything needed to build and open one output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(flatten)]
    pub kind: DeviceKind,
    #[serde(default)]
    pub geometry: GeometryConfig,
    /// Output level applied by the driver itself, 0..1.
    #[serde(default = "default_level")]
    pub hardware_brightness: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::preview(GeometryConfig::default())
    }
}

impl DeviceConfig {
    pub fn preview(geometry: GeometryConfig) -> Self {
        Self {
            kind: DeviceKind::Preview,
            geometry,
            hardware_brightness: 1.0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Preview => "preview",
            DeviceKind::Matrix { .. } => "matrix",
            DeviceKind::Strip { .. } => "strip",
            DeviceKind::Network { .. } => "network",
        }
    }

    /// Validates the geometry and builds the (closed) device plus its mapper.
    pub fn build(&self) -> Result<(OutputDevice, Mapper)> {
        LedCtlError::check_range(
            "hardware_brightness",
            f64::from(self.hardware_brightness),
            0.0,
            1.0,
        )?;
        let mapper = Mapper::new(&self.geometry)?;
        let device = match &self.kind {
            DeviceKind::Preview => {
                // The preview reads its buffer back row-major.
                if !matches!(self.geometry.layout, Layout::RowMajor)
                    || mapper.pixel_count() != mapper.size().area()
                {
                    return Err(LedCtlError::config(
                        "preview devices need a row_major layout with one LED per pixel",
                    ));
                }
                OutputDevice::Preview(PreviewDevice::new(mapper.size()))
            }
            DeviceKind::Matrix { bus } => {
                if mapper.pixel_count() != mapper.size().area() {
                    return Err(LedCtlError::config(
                        "matrix panels need exactly one LED per logical pixel",
                    ));
                }
                OutputDevice::Matrix(MatrixPanel::new(mapper.size(), Box::new(FileBus::new(bus))))
            }
            DeviceKind::Strip { bus, pixel_order } => OutputDevice::Strip(LedStrip::new(
                mapper.pixel_count(),
                *pixel_order,
                Box::new(FileBus::new(bus)),
            )),
            DeviceKind::Network {
                host,
                port,
                send_timeout_ms,
                hold_seconds,
            } => {
                if mapper.pixel_count() > NETWORK_MAX_LEDS {
                    return Err(LedCtlError::config(format!(
                        "network devices address at most {NETWORK_MAX_LEDS} LEDs, geometry has {}",
                        mapper.pixel_count()
                    )));
                }
                OutputDevice::Network(NetworkDevice::new(
                    format!("{host}:{port}"),
                    std::time::Duration::from_millis(*send_timeout_ms),
                    *hold_seconds,
                ))
            }
        };
        Ok((device, mapper))
    }
}

/// The active output sink.
#[derive(Debug)]
pub enum OutputDevice {
    Preview(PreviewDevice),
    Matrix(MatrixPanel),
    Strip(LedStrip),
    Network(NetworkDevice),
}

impl OutputDevice {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Preview(_) => "preview",
            Self::Matrix(_) => "matrix",
            Self::Strip(_) => "strip",
            Self::Network(_) => "network",
        }
    }

    /// Opening an open device is a no-op.
    pub fn open(&mut self) -> Result<()> {
        match self {
            Self::Preview(device) => {
                device.open();
                Ok(())
            }
            Self::Matrix(device) => device.open(),
            Self::Strip(device) => device.open(),
            Self::Network(device) => device.open(),
        }
    }

    /// Closing a closed device is a no-op.
    pub fn close(&mut self) {
        match self {
            Self::Preview(device) => device.close(),
            Self::Matrix(device) => device.close(),
            Self::Strip(device) => device.close(),
            Self::Network(device) => device.close(),
        }
    }

    pub fn set_brightness(&mut self, value: f32) -> Result<()> {
        crate::render::validate_brightness(value)?;
        match self {
            Self::Preview(device) => device.set_brightness(value),
            Self::Matrix(device) => device.set_brightness(value),
            Self::Strip(device) => device.set_brightness(value),
            Self::Network(device) => device.set_brightness(value),
        }
        Ok(())
    }

    /// Writes one fully mapped, fully corrected frame.
    pub fn draw_frame(&mut self, frame: &MappedFrame) -> Result<()> {
        match self {
            Self::Preview(device) => device.draw_frame(frame),
            Self::Matrix(device) => device.draw_frame(frame),
            Self::Strip(device) => device.draw_frame(frame),
            Self::Network(device) => device.draw_frame(frame),
        }
    }

    /// Whether repeated write failures should fault playback. Datagram loss
    /// on the network variant is expected and never escalates.
    pub fn escalates_write_failures(&self) -> bool {
        matches!(self, Self::Matrix(_) | Self::Strip(_))
    }

    /// Latest frame held in memory, for devices that keep one.
    pub fn snapshot(&self) -> Option<Frame> {
        match self {
            Self::Preview(device) => device.snapshot(),
            _ => None,
        }
    }
}

/// Scales one channel by a 0..1 output level, rounding half up.
fn scale_channel(value: u8, level: f32) -> u8 {
    (f32::from(value) * level + 0.5).floor().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory bus recording every payload; can be told to fail writes.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemoryBus {
        pub(crate) writes: Arc<Mutex<Vec<Vec<u8>>>>,
        pub(crate) failing: Arc<Mutex<bool>>,
    }

    impl LedBus for MemoryBus {
        fn open(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, payload: &[u8]) -> io::Result<()> {
            if *self.failing.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "bus unplugged"));
            }
            self.writes.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        fn close(&mut self) {}
    }
}
