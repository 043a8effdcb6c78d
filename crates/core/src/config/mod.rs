use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{DeviceConfig, LedCtlError, RenderSettings, Result, ScaleFilter};

pub const FPS_CAP_RANGE: (u32, u32) = (1, 240);

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    /// Render settings in effect at startup.
    pub render: RenderSettings,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            LedCtlError::config(format!("cannot read config {}: {err}", path.display()))
        })?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), device = config.device.type_name(), "loaded config");
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| LedCtlError::config(format!("malformed config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.render.validate()?;
        self.engine.validate()?;
        self.device.build().map(|_| ())
    }
}

/// Tuning for the render loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the tick rate, whatever the source asks for.
    pub fps_cap: u32,
    pub scale_filter: ScaleFilter,
    /// Consecutive hardware write failures tolerated before faulting.
    pub max_consecutive_write_failures: u32,
    /// How long the idle loop waits for a command before re-checking.
    pub idle_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fps_cap: 60,
            scale_filter: ScaleFilter::Lanczos,
            max_consecutive_write_failures: 3,
            idle_poll_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        LedCtlError::check_range(
            "fps_cap",
            f64::from(self.fps_cap),
            f64::from(FPS_CAP_RANGE.0),
            f64::from(FPS_CAP_RANGE.1),
        )?;
        if self.max_consecutive_write_failures == 0 {
            return Err(LedCtlError::config(
                "max_consecutive_write_failures must be at least 1",
            ));
        }
        Ok(())
    }

    /// Tick period for a source running at `nominal_fps`, never faster
    /// than the cap.
    pub fn tick_period(&self, nominal_fps: f32) -> Duration {
        let cap = f64::from(self.fps_cap.max(1));
        let nominal = f64::from(nominal_fps);
        let fps = if nominal.is_finite() && nominal > 0.0 {
            nominal.min(cap)
        } else {
            cap
        };
        Duration::from_secs_f64(1.0 / fps)
    }

    /// Frame duration used for animation frames that carry none.
    pub fn fallback_frame(&self) -> Duration {
        self.tick_period(f32::INFINITY)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceKind, Rotation};

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.device.kind, DeviceKind::Preview);
        assert_eq!(config.engine.fps_cap, 60);
    }

    #[test]
    fn parses_full_document() {
        let json = r#"{
            "device": {
                "type": "matrix",
                "bus": "/tmp/panel.fifo",
                "hardware_brightness": 0.85,
                "geometry": {"width": 64, "height": 32}
            },
            "render": {"gamma": 2.0, "rotation": 90, "balance": [1.0, 0.9, 0.8]},
            "engine": {"fps_cap": 120, "scale_filter": "nearest"}
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.device.type_name(), "matrix");
        assert_eq!(config.render.rotation, Rotation::Deg90);
        assert_eq!(config.render.brightness, 1.0);
        assert_eq!(config.engine.scale_filter, ScaleFilter::Nearest);
        assert_eq!(config.engine.max_consecutive_write_failures, 3);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(AppConfig::from_json(r#"{"engine": {"fps_cap": 0}}"#).is_err());
        assert!(AppConfig::from_json(r#"{"render": {"brightness": 2.0}}"#).is_err());
        assert!(AppConfig::from_json(r#"{"render": {"rotation": 45}}"#).is_err());
    }

    #[test]
    fn tick_period_follows_source_up_to_cap() {
        let engine = EngineConfig::default();
        assert_eq!(engine.tick_period(10.0), Duration::from_millis(100));
        let capped = engine.tick_period(500.0);
        assert!(capped >= Duration::from_micros(16_600) && capped <= Duration::from_micros(16_700));
        assert_eq!(engine.fallback_frame(), capped);
    }
}
