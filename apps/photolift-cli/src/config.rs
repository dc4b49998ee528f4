//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/photolift/photolift.toml`
//! - Windows: `%APPDATA%/photolift/photolift.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use photolift_background::BackgroundConfig;
use photolift_queue::UploadConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the photo server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Where the queue is kept between runs.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_chunk_size_kib")]
    pub chunk_size_kib: usize,

    /// MIME types the server accepts. Empty accepts everything.
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,

    #[serde(default = "default_max_failed")]
    pub max_failed_uploads: usize,

    #[serde(default)]
    pub moderate_uploads: bool,

    #[serde(default = "default_true")]
    pub strip_private_metadata: bool,

    /// Length of a `--background` window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default = "default_max_bytes_per_window")]
    pub max_bytes_per_window: u64,

    #[serde(default)]
    pub requires_external_power: bool,
}

fn default_server_url() -> String {
    "http://localhost/piwigo".into()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_state_file() -> PathBuf {
    config_dir().join("queue.json")
}

fn default_chunk_size_kib() -> usize {
    UploadConfig::default().chunk_size_bytes / 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    UploadConfig::default().allowed_mime_types
}

fn default_max_failed() -> usize {
    UploadConfig::default().max_failed_uploads
}

fn default_true() -> bool {
    true
}

fn default_window_secs() -> u64 {
    30
}

fn default_max_bytes_per_window() -> u64 {
    BackgroundConfig::default().max_bytes_per_window
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: default_request_timeout(),
            state_file: default_state_file(),
            chunk_size_kib: default_chunk_size_kib(),
            allowed_mime_types: default_allowed_mime_types(),
            max_failed_uploads: default_max_failed(),
            moderate_uploads: false,
            strip_private_metadata: true,
            window_secs: default_window_secs(),
            max_bytes_per_window: default_max_bytes_per_window(),
            requires_external_power: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or creates a default file there if not found.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = AppConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds the account password.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn upload_config(&self, start_paused: bool) -> UploadConfig {
        UploadConfig {
            chunk_size_bytes: self.chunk_size_kib.max(1) * 1024,
            max_failed_uploads: self.max_failed_uploads,
            allowed_mime_types: self.allowed_mime_types.clone(),
            moderate_uploads: self.moderate_uploads,
            start_paused,
            ..UploadConfig::default()
        }
    }

    pub fn background_config(&self) -> BackgroundConfig {
        BackgroundConfig {
            max_bytes_per_window: self.max_bytes_per_window,
            requires_external_power: self.requires_external_power,
            ..BackgroundConfig::default()
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn default_config_path() -> PathBuf {
    config_dir().join("photolift.toml")
}

fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("photolift")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config").join("photolift")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = AppConfig::default();
        assert_eq!(config.chunk_size_kib, 500);
        assert_eq!(config.max_failed_uploads, 5);
        assert!(config.strip_private_metadata);
        assert!(config.state_file.ends_with("queue.json"));
        assert!(default_config_path().to_string_lossy().contains("photolift"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: AppConfig =
            toml::from_str("server_url = \"https://photos.example.org\"\nchunk_size_kib = 64")
                .unwrap();
        assert_eq!(config.server_url, "https://photos.example.org");
        assert_eq!(config.upload_config(false).chunk_size_bytes, 64 * 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
        assert!(!config.moderate_uploads);
    }

    #[test]
    fn first_load_writes_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("photolift.toml");

        let created = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, AppConfig::default());

        let edited = AppConfig {
            username: "jo".into(),
            moderate_uploads: true,
            ..created
        };
        edited.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), edited);
    }

    #[test]
    fn broken_file_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("photolift.toml");
        std::fs::write(&path, "chunk_size_kib = \"lots\"").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn derived_configs() {
        let config = AppConfig {
            max_bytes_per_window: 1024,
            requires_external_power: true,
            allowed_mime_types: vec![],
            ..AppConfig::default()
        };
        let upload = config.upload_config(true);
        assert!(upload.start_paused);
        assert!(upload.allowed_mime_types.is_empty());
        let background = config.background_config();
        assert_eq!(background.max_bytes_per_window, 1024);
        assert!(background.requires_external_power);
    }
}
