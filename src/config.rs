use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Root directory to walk recursively.
    #[serde(default = "default_scan_root")]
    pub root_path: PathBuf,
}

fn default_scan_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("media")
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            root_path: default_scan_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the ONNX model file. When unset, the model is downloaded
    /// to the local data directory on first use.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_model_url")]
    pub model_url: String,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_target_classes")]
    pub target_classes: Vec<String>,
}

fn default_model_url() -> String {
    "https://huggingface.co/Xenova/yolov8n/resolve/main/onnx/model.onnx".to_string()
}

fn default_confidence_threshold() -> f32 {
    0.35
}

fn default_target_classes() -> Vec<String> {
    vec!["person".to_string(), "dog".to_string()]
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_url: default_model_url(),
            confidence_threshold: default_confidence_threshold(),
            target_classes: default_target_classes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Run inference on every Nth decoded frame.
    #[serde(default = "default_frame_stride")]
    pub frame_stride: i64,

    /// Hard cap on decoded frames per video. None decodes to end of stream.
    #[serde(default)]
    pub max_frames: Option<i64>,
}

fn default_frame_stride() -> i64 {
    30
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_stride: default_frame_stride(),
            max_frames: None,
        }
    }
}

/// Failure-email settings. Leaving `recipients` empty disables email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub recipients: Vec<String>,

    #[serde(default)]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Use a STARTTLS upgrade; false means implicit TLS.
    #[serde(default = "default_starttls")]
    pub starttls: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_starttls() -> bool {
    true
}

fn default_sender() -> String {
    "noreply@example.com".to_string()
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            starttls: default_starttls(),
            username: None,
            password: None,
            sender: default_sender(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentryscan")
        .join("sentryscan.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            detector: DetectorConfig::default(),
            video: VideoConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sentryscan")
            .join("config.toml")
    }
}
