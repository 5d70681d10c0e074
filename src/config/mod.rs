//! Application Configuration
//!
//! Pipeline settings stored in TOML format. Every section has defaults, so
//! a config file only needs the values it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::vision::{
    DetectorConfig, ModelManager, ModelType, OrientationConfig, RecognitionConfig,
    SessionOptions, TextDetectionConfig,
};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Object detector
    pub detector: DetectorConfig,
    /// Text detector
    pub text_detection: TextDetectionConfig,
    /// Orientation classifier
    pub orientation: OrientationConfig,
    /// Text recognizer
    pub recognition: RecognitionConfig,
    /// Per-frame pipeline behavior
    pub pipeline: PipelineConfig,
    /// Overlay rendering
    pub overlay: OverlaySettings,
    /// Model file locations
    pub models: ModelsConfig,
    /// Performance settings
    pub performance: PerformanceConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
    /// Pretty-print JSON output
    pub pretty_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            pretty_json: true,
        }
    }
}

/// Per-frame pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum spacing between pipeline runs in milliseconds
    pub interval_ms: u64,
    /// Run OCR on each detection
    pub recognize_text: bool,
    /// Joins the strings read from one detection
    pub text_separator: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            recognize_text: true,
            text_separator: ", ".to_string(),
        }
    }
}

/// Overlay-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Render an annotated copy of each frame
    pub enabled: bool,
    /// Rectangle stroke width in pixels
    pub stroke_width: u32,
    /// Rectangle color as RGB
    pub color: [u8; 3],
    /// TrueType font for label text; labels are bars only when unset
    pub font_path: Option<PathBuf>,
    /// Label text height in pixels
    pub font_scale: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            stroke_width: 3,
            color: [0, 255, 0],
            font_path: None,
            font_scale: 16.0,
        }
    }
}

/// Where model files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Models directory; the per-user data directory when unset
    pub dir: Option<PathBuf>,
    pub object_detector: String,
    pub text_detector: String,
    pub orientation_classifier: String,
    pub text_recognizer: String,
    pub dictionary: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            object_detector: ModelType::ObjectDetector.filename().to_string(),
            text_detector: ModelType::TextDetector.filename().to_string(),
            orientation_classifier: ModelType::OrientationClassifier.filename().to_string(),
            text_recognizer: ModelType::TextRecognizer.filename().to_string(),
            dictionary: ModelType::Dictionary.filename().to_string(),
        }
    }
}

impl ModelsConfig {
    /// Build a model manager for the configured directory and filenames
    pub fn manager(&self) -> Result<ModelManager> {
        let manager = match &self.dir {
            Some(dir) => ModelManager::with_dir(dir.clone())?,
            None => ModelManager::new()?,
        };
        Ok(manager
            .with_filename(ModelType::ObjectDetector, &self.object_detector)
            .with_filename(ModelType::TextDetector, &self.text_detector)
            .with_filename(ModelType::OrientationClassifier, &self.orientation_classifier)
            .with_filename(ModelType::TextRecognizer, &self.text_recognizer)
            .with_filename(ModelType::Dictionary, &self.dictionary))
    }
}

/// Performance-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Intra-op threads per inference session
    pub intra_threads: usize,
    /// Request a GPU execution provider
    pub use_gpu: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            use_gpu: false,
        }
    }
}

impl PerformanceConfig {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            intra_threads: self.intra_threads.max(1),
            use_gpu: self.use_gpu,
        }
    }
}

/// Default config file location in the per-user config directory
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crate::storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at this path; built-in defaults were used
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "config loaded from {:?}", path),
            Self::Defaults(path) => write!(f, "no config at {:?}, using defaults", path),
        }
    }
}

/// Load configuration and report where it came from, without logging
///
/// Callers that load config before the subscriber is installed log the
/// returned source afterwards.
pub fn load_with_source(path: &Path) -> Result<(AppConfig, ConfigSource)> {
    if path.exists() {
        Ok((load_config(path)?, ConfigSource::File(path.to_path_buf())))
    } else {
        Ok((AppConfig::default(), ConfigSource::Defaults(path.to_path_buf())))
    }
}

/// Load configuration, using defaults when the file does not exist
pub fn load_or_default(path: &Path) -> Result<AppConfig> {
    let (config, source) = load_with_source(path)?;
    info!("{}", source);
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
