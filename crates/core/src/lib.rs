//! Core library for the ledctl LED display controller.
//!
//! Frames flow leaf to root: a [`FrameSource`] is pulled once per tick, the
//! color pipeline in [`render`] corrects and transforms it, the [`Mapper`]
//! reorders it into device address space and an [`OutputDevice`] writes
//! it. The [`PlaybackEngine`] sequences sources and the [`Renderer`] runs it
//! on its own thread behind a [`Controller`].

pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod mapping;
pub mod playback;
pub mod playlist;
pub mod render;
pub mod source;

pub use command::{Command, Controller, Crossfade, Renderer};
pub use config::{AppConfig, EngineConfig};
pub use device::{
    DeviceConfig, DeviceKind, FileBus, LedBus, LedStrip, MatrixPanel, NetworkDevice,
    OutputDevice, PixelOrder, PreviewDevice,
};
pub use error::{LedCtlError, Result};
pub use frame::{Frame, ScaleFilter, Size};
pub use mapping::{Address, GeometryConfig, Layout, MappedFrame, Mapper, TableEntry};
pub use playback::{PlaybackEngine, PlaybackState, Status};
pub use playlist::{Playlist, PlaylistEntry};
pub use render::{RenderSettings, RenderSettingsUpdate, Rotation};
pub use source::{Builtin, FrameSource, Pull, SourceDescriptor};
