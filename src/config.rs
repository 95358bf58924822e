//! Engine configuration.
//!
//! Defaults for export and sheet generation load from `platemaker.toml`.
//! Config files are sparse — override just the values you want:
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [export]
//! format = "png"            # png | jpeg
//! quality = 90              # JPEG quality (1-100)
//! scale = 1.0               # Output scale factor
//! filename = "{index}"      # Filename format ({field} uses record data)
//!
//! [sheet]
//! page = "a4-300"           # Page preset: a4-150 | a4-300 | letter-300
//! # page_width = 2480       # Custom page size overrides the preset
//! # page_height = 3508
//! margin = 40.0             # Page margin in pixels
//! spacing = 20.0            # Spacing between tiles in pixels
//! outline = false           # Draw cutting guides around tiles
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::PageSize;
use crate::raster::OutputFormat;

/// Name of the config file looked up next to the working directory.
pub const CONFIG_FILENAME: &str = "platemaker.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Engine defaults loaded from `platemaker.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub export: ExportConfig,
    pub sheet: SheetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub format: OutputFormat,
    pub quality: u32,
    pub scale: f32,
    pub filename: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 90,
            scale: 1.0,
            filename: "{index}".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SheetConfig {
    /// Page preset name; ignored when a custom size is set.
    pub page: String,
    pub page_width: Option<u32>,
    pub page_height: Option<u32>,
    pub margin: f32,
    pub spacing: f32,
    pub outline: bool,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            page: "a4-300".to_string(),
            page_width: None,
            page_height: None,
            margin: 40.0,
            spacing: 20.0,
            outline: false,
        }
    }
}

impl SheetConfig {
    /// Resolve the target page geometry: custom size wins, then preset.
    pub fn page_size(&self) -> Result<PageSize, ConfigError> {
        if let (Some(width), Some(height)) = (self.page_width, self.page_height) {
            return Ok(PageSize::new(width, height));
        }
        PageSize::preset(&self.page)
            .ok_or_else(|| ConfigError::Validation(format!("unknown page preset: {}", self.page)))
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `platemaker.toml` from `dir` when present, else defaults.
    pub fn load_or_default(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.01..=16.0).contains(&self.export.scale) {
            return Err(ConfigError::Validation(format!(
                "export.scale must be between 0.01 and 16, got {}",
                self.export.scale
            )));
        }
        if self.export.quality == 0 || self.export.quality > 100 {
            return Err(ConfigError::Validation(format!(
                "export.quality must be between 1 and 100, got {}",
                self.export.quality
            )));
        }
        self.sheet.page_size()?;
        Ok(())
    }
}

/// The stock config with every option documented, for `gen-config`.
pub fn stock_config() -> &'static str {
    r#"# platemaker configuration
# All options are optional - defaults shown below.

[export]
format = "png"            # png | jpeg
quality = 90              # JPEG quality (1-100)
scale = 1.0               # Output scale factor
filename = "{index}"      # Filename format ({field} uses record data)

[sheet]
page = "a4-300"           # Page preset: a4-150 | a4-300 | letter-300
# page_width = 2480       # Custom page size overrides the preset
# page_height = 3508
margin = 40.0             # Page margin in pixels
spacing = 20.0            # Spacing between tiles in pixels
outline = false           # Draw cutting guides around tiles
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sheet.page_size().unwrap(), PageSize::new(2480, 3508));
    }

    #[test]
    fn sparse_override_keeps_other_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [export]
            format = "jpeg"
            "#,
        )
        .unwrap();
        assert_eq!(config.export.format, OutputFormat::Jpeg);
        assert_eq!(config.export.quality, 90);
        assert_eq!(config.sheet.page, "a4-300");
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str(
            r#"
            [export]
            formt = "png"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn custom_page_size_wins_over_preset() {
        let config: EngineConfig = toml::from_str(
            r#"
            [sheet]
            page = "a4-300"
            page_width = 100
            page_height = 200
            "#,
        )
        .unwrap();
        assert_eq!(config.sheet.page_size().unwrap(), PageSize::new(100, 200));
    }

    #[test]
    fn unknown_preset_fails_validation() {
        let config: EngineConfig = toml::from_str(
            r#"
            [sheet]
            page = "a9-900"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.sheet.page_size(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn bad_scale_fails_validation() {
        let config: EngineConfig = toml::from_str(
            r#"
            [export]
            scale = 0.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn stock_config_parses_to_defaults() {
        let config: EngineConfig = toml::from_str(stock_config()).unwrap();
        assert_eq!(config.export.quality, 90);
        assert!(!config.sheet.outline);
    }

    #[test]
    fn load_or_default_without_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(tmp.path()).unwrap();
        assert_eq!(config.export.scale, 1.0);
    }

    #[test]
    fn load_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[sheet]\noutline = true\n").unwrap();
        let config = EngineConfig::load_or_default(tmp.path()).unwrap();
        assert!(config.sheet.outline);
    }
}
