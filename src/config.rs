use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration. Every recognized option is enumerated here;
/// unknown keys anywhere in the file are a load-time error, not a silent no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub server: ServerConfig,
    pub music_library: MusicLibraryConfig,
    pub audio_analysis: AudioAnalysisConfig,
    pub playlist_engine: PlaylistEngineConfig,
    pub mood_classifier: MoodClassifierConfig,
    pub cache: CacheConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MusicLibraryConfig {
    /// Directories scanned when none are given on the command line.
    pub paths: Vec<PathBuf>,
    /// Maximum directory depth for the enumerator.
    pub max_depth: usize,
    /// Files smaller than this are skipped during enumeration.
    pub min_file_size_kb: u64,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for MusicLibraryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            max_depth: 10,
            min_file_size_kb: 100,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AudioAnalysisConfig {
    pub sample_rate: u32,
    /// Hard cap on input size; larger files become fallback records.
    pub max_file_size_mb: u64,
    /// Worker pool size; 0 means min(cpu_count, 8).
    pub workers: usize,
    /// Non-overlapping time-series window length in seconds.
    pub window_seconds: f64,
    /// Soft per-file extraction budget in seconds.
    pub file_timeout_secs: u64,
    pub trim_silence: bool,
    pub normalize: bool,
}

impl Default for AudioAnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            max_file_size_mb: 500,
            workers: 0,
            window_seconds: 5.0,
            file_timeout_secs: 300,
            trim_silence: true,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PlaylistEngineConfig {
    /// Directory holding custom_presets.json.
    pub presets_dir: Option<PathBuf>,
    /// Score ±2 Camelot neighbours as compatible.
    pub relaxed_harmony: bool,
}

impl Default for PlaylistEngineConfig {
    fn default() -> Self {
        Self {
            presets_dir: None,
            relaxed_harmony: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MoodClassifierConfig {
    pub confidence_threshold: f64,
    pub enable_model: bool,
    pub model_path: Option<PathBuf>,
}

impl Default for MoodClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            enable_model: false,
            model_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub db_path: Option<PathBuf>,
    pub max_age_days: u32,
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_age_days: 30,
            max_size_mb: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportConfig {
    pub output_dir: Option<PathBuf>,
    pub default_format: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            default_format: "m3u".into(),
        }
    }
}

impl Config {
    /// Load a config file; unknown keys are rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load the config from the XDG config directory if present, else defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
            let path = dirs.config_dir().join("config.toml");
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache
            .db_path
            .clone()
            .unwrap_or_else(default_db_path)
    }
}

/// Resolve the default database path using the XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("crateflow.db")
    } else {
        // Fallback: current directory
        PathBuf::from("crateflow.db")
    }
}
