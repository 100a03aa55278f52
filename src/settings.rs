//! Pipeline Settings
//!
//! Startup configuration consumed once by [`Pipeline::new`](crate::Pipeline::new).

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::errors::{PipelineError, Result};
use crate::model::{Format, Viewport};

/// Default number of frames in flight.
pub const DEFAULT_FRAME_LAG: usize = 2;

/// Global configuration for pipeline initialization.
///
/// # Fields
///
/// | Field          | Description                                   | Default       |
/// |----------------|-----------------------------------------------|---------------|
/// | `frame_lag`    | Frames in flight, one Dynamic instance each    | `2`           |
/// | `viewport`     | Initial viewport                              | `1280 × 720`  |
/// | `backend`      | Backend selected at startup                   | `Headless`    |
/// | `depth_format` | Depth format given to stages that request one | `Depth32Float`|
/// | `clear_color`  | Clear color of render targets without one     | Black         |
/// | `present`      | Copy the presentable target to the surface    | `true`        |
///
/// # Example
///
/// ```rust,ignore
/// let settings = PipelineSettings::from_json(r#"{ "frame_lag": 3 }"#)?;
/// assert_eq!(settings.frame_lag, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub frame_lag: usize,
    pub viewport: Viewport,
    pub backend: BackendKind,
    pub depth_format: Format,
    pub clear_color: [f64; 4],
    /// When `false`, frames are submitted but never presented.
    pub present: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_lag: DEFAULT_FRAME_LAG,
            viewport: Viewport::new(1280, 720),
            backend: BackendKind::default(),
            depth_format: Format::Depth32Float,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present: true,
        }
    }
}

impl PipelineSettings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_lag == 0 {
            return Err(PipelineError::InvalidDescription {
                tag: "settings".into(),
                reason: "frame_lag must be at least 1".into(),
            });
        }
        if self.viewport.is_empty() {
            return Err(PipelineError::InvalidDescription {
                tag: "settings".into(),
                reason: "viewport must be non-empty".into(),
            });
        }
        if !self.depth_format.is_depth() {
            return Err(PipelineError::UnsupportedFormat {
                format: format!("{:?}", self.depth_format),
                usage: "depth attachments",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = PipelineSettings::from_json(r#"{ "frame_lag": 3, "present": false }"#)
            .expect("valid settings");
        assert_eq!(settings.frame_lag, 3);
        assert!(!settings.present);
        assert_eq!(settings.viewport, Viewport::new(1280, 720));
        assert_eq!(settings.backend, BackendKind::Headless);
    }

    #[test]
    fn zero_frame_lag_is_rejected() {
        let err = PipelineSettings::from_json(r#"{ "frame_lag": 0 }"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDescription { .. }));
    }

    #[test]
    fn malformed_json_is_a_settings_error() {
        let err = PipelineSettings::from_json("{ frame_lag: }").unwrap_err();
        assert!(matches!(err, PipelineError::Settings(_)));
    }
}
