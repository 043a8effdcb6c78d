/// Result alias that carries the custom [`LedCtlError`] type.
pub type Result<T> = std::result::Result<T, LedCtlError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LedCtlError {
    /// Geometry/mapping mismatch or an otherwise unusable configuration.
    /// Rejected at the call, nothing is changed.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// A numeric setting outside its accepted range.
    #[error("{name} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// The source could not be opened or decoded at `start`/`switch`.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// The active source failed mid-playback.
    #[error("source fault: {0}")]
    SourceFault(String),
    /// The output device rejected or failed a frame write.
    #[error("device write failed: {0}")]
    DeviceWrite(String),
    /// Requested data does not exist yet (e.g. no frame rendered).
    #[error("{0} not available")]
    NotAvailable(&'static str),
    /// The command is not accepted in the engine's current state.
    #[error("not allowed while {0}")]
    InvalidState(&'static str),
    /// Internal invariant violation: poisoned lock, dead render thread.
    #[error("engine error: {0}")]
    Engine(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Image(#[from] image::ImageError),
}

impl LedCtlError {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn source_unavailable<T: Into<String>>(msg: T) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn source_fault<T: Into<String>>(msg: T) -> Self {
        Self::SourceFault(msg.into())
    }

    pub fn device_write<T: Into<String>>(msg: T) -> Self {
        Self::DeviceWrite(msg.into())
    }

    pub fn engine<T: Into<String>>(msg: T) -> Self {
        Self::Engine(msg.into())
    }

    /// Checks `value` against an inclusive range, naming the offending
    /// setting in the error.
    pub fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
        if value.is_finite() && value >= min && value <= max {
            Ok(())
        } else {
            Err(Self::OutOfRange {
                name,
                value,
                min,
                max,
            })
        }
    }
}
