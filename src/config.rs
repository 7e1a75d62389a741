//! Run-level configuration.
//!
//! Configuration is plain YAML with kebab-case keys; every key is optional:
//!
//! ```yaml
//! fps: 25
//! dpi: 150
//! global-staff-size: 18
//! left-margin-px: 40
//! max-consecutive-skips: 10
//! language: english
//! debug: true
//! ```

use crate::error::SyncError;
use crate::pitch::Language;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_DPI: u32 = 110;
pub const DEFAULT_STAFF_SIZE: f64 = 20.0;
pub const DEFAULT_LEFT_MARGIN_PX: i64 = 50;
pub const DEFAULT_MAX_CONSECUTIVE_SKIPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    pub fps: f64,
    pub dpi: u32,
    /// Staff size in points, as passed to `set-global-staff-size`.
    pub global_staff_size: f64,
    pub left_margin_px: i64,
    pub max_consecutive_skips: usize,
    /// Pitch language in effect before any `\language` directive.
    pub language: Language,
    pub debug: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            fps: DEFAULT_FPS,
            dpi: DEFAULT_DPI,
            global_staff_size: DEFAULT_STAFF_SIZE,
            left_margin_px: DEFAULT_LEFT_MARGIN_PX,
            max_consecutive_skips: DEFAULT_MAX_CONSECUTIVE_SKIPS,
            language: Language::default(),
            debug: false,
        }
    }
}

/// Raw configuration for YAML deserialization
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    fps: Option<f64>,
    dpi: Option<u32>,
    global_staff_size: Option<f64>,
    left_margin_px: Option<i64>,
    max_consecutive_skips: Option<usize>,
    language: Option<String>,
    debug: Option<bool>,
}

impl SyncConfig {
    /// Parse configuration from YAML text. Empty text yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, SyncError> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?
        };

        let language = match &raw.language {
            Some(name) => name
                .parse()
                .map_err(|_| SyncError::Config(format!("Unknown pitch language: {}", name)))?,
            None => Language::default(),
        };

        let defaults = SyncConfig::default();
        let config = SyncConfig {
            fps: raw.fps.unwrap_or(defaults.fps),
            dpi: raw.dpi.unwrap_or(defaults.dpi),
            global_staff_size: raw.global_staff_size.unwrap_or(defaults.global_staff_size),
            left_margin_px: raw.left_margin_px.unwrap_or(defaults.left_margin_px),
            max_consecutive_skips: raw
                .max_consecutive_skips
                .unwrap_or(defaults.max_consecutive_skips),
            language,
            debug: raw.debug.unwrap_or(defaults.debug),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(SyncError::Config(format!("fps must be positive, got {}", self.fps)));
        }
        if self.dpi == 0 {
            return Err(SyncError::Config("dpi must be positive".to_string()));
        }
        if !(self.global_staff_size.is_finite() && self.global_staff_size > 0.0) {
            return Err(SyncError::Config(format!(
                "global-staff-size must be positive, got {}",
                self.global_staff_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::from_yaml("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.fps, 30.0);
        assert_eq!(config.dpi, 110);
        assert_eq!(config.max_consecutive_skips, 10);
        assert_eq!(config.language, Language::Nederlands);
    }

    #[test]
    fn test_partial_yaml() {
        let config = SyncConfig::from_yaml("fps: 25\nlanguage: english\nleft-margin-px: 0\n").unwrap();
        assert_eq!(
            config,
            SyncConfig {
                fps: 25.0,
                left_margin_px: 0,
                language: Language::English,
                ..SyncConfig::default()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            SyncConfig::from_yaml("frames-per-second: 25"),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(SyncConfig::from_yaml("fps: 0"), Err(SyncError::Config(_))));
        assert!(matches!(SyncConfig::from_yaml("dpi: 0"), Err(SyncError::Config(_))));
        assert!(matches!(
            SyncConfig::from_yaml("language: klingon"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "dpi: 300\ndebug: true").unwrap();
        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.dpi, 300);
        assert!(config.debug);

        let missing = SyncConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(SyncError::Io(_))));
    }
}
