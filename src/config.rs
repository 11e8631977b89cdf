//! ==============================================================================
//! config.rs - Device Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `device.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceSection: identity and whether the device runs from the sd card.
//!     - FirebaseConfig: backend choice, project id, endpoints, credentials.
//!     - NetworkConfig: where to probe to decide the device is online.
//!     - CollectionsConfig: which firestore collections hold teachers/students.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub collections: CollectionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceSection {
    pub device_id: String,
    pub sd_mode: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rest,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FirebaseConfig {
    pub backend: Backend,
    pub project_id: String,
    pub firestore_url: String,
    pub database_url: String,
    pub auth_token: Option<String>,
    pub require_auth: bool,
    pub timeout_seconds: u64,
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub probe_host: String,
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectionsConfig {
    pub teachers: String,
    pub students: String,
    pub teacher_role: Option<String>,
    pub student_role: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// report failed rtdb overwrites on the console
    pub log_write_failures: bool,
}

impl DeviceConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: DeviceConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Where to look for the config file, in order
    ///
    /// an explicit path wins; otherwise `config/device.toml` and
    /// `../config/device.toml` are tried.
    pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from("config").join("device.toml"),
                PathBuf::from("..").join("config").join("device.toml"),
            ],
        }
    }

    /// Log level to start tracing with, read before tracing is up
    ///
    /// follows the same search as `load_or_default`, silently.
    pub fn startup_log_level(explicit: Option<&Path>) -> String {
        level_from(&Self::candidate_paths(explicit))
    }

    /// Load with default fallback
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        for path in &Self::candidate_paths(explicit) {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("[CONFIG] Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::warn!("[CONFIG] No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          DEVICE CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Device ID: {}", self.device.device_id);
        println!("│ SD Mode: {}", self.device.sd_mode);
        println!("│ Backend: {:?}", self.firebase.backend);
        println!("│ Project: {}", self.firebase.project_id);
        println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_id: "attendance-01".to_string(),
            sd_mode: false,
        }
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Rest,
            project_id: "attendance-demo".to_string(),
            firestore_url: "https://firestore.googleapis.com/v1".to_string(),
            database_url: "https://attendance-demo-default-rtdb.firebaseio.com".to_string(),
            auth_token: None,
            require_auth: false,
            timeout_seconds: 15,
            page_size: 300,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: "firestore.googleapis.com:443".to_string(),
            probe_timeout_ms: 2000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_seconds: 60 }
    }
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            teachers: "teachers".to_string(),
            students: "students".to_string(),
            teacher_role: None,
            student_role: Some("student".to_string()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_write_failures: true,
        }
    }
}

/// level from the first candidate that loads, else the default
fn level_from(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .filter(|path| path.exists())
        .find_map(|path| DeviceConfig::load(path).ok())
        .map(|config| config.logging.level)
        .unwrap_or_else(|| LoggingConfig::default().level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: DeviceConfig = toml::from_str(
            r#"
[device]
device_id = "gate-02"

[firebase]
backend = "memory"
auth_token = "abc"
"#,
        )
        .unwrap();

        assert_eq!(config.device.device_id, "gate-02");
        assert!(!config.device.sd_mode);
        assert_eq!(config.firebase.backend, Backend::Memory);
        assert_eq!(config.firebase.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.firebase.page_size, 300);
        assert_eq!(config.collections.student_role.as_deref(), Some("student"));
        assert!(config.logging.log_write_failures);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = DeviceConfig::load_or_default(Some(Path::new("does/not/exist.toml")));
        assert_eq!(config.polling.interval_seconds, 60);
        assert_eq!(config.collections.teachers, "teachers");
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let parsed: Result<DeviceConfig, _> = toml::from_str("[firebase]\nbackend = \"carrier-pigeon\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_startup_level_searches_like_load_or_default() {
        let dir = std::env::temp_dir().join(format!("attendance-sync-level-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let found = dir.join("device.toml");
        std::fs::write(&found, "[logging]\nlevel = \"debug\"\n").unwrap();

        // first candidate missing, second one present: same order as the default search
        let level = level_from(&[dir.join("missing.toml"), found.clone()]);
        let explicit = DeviceConfig::startup_log_level(Some(&found));
        let absent = DeviceConfig::startup_log_level(Some(Path::new("does/not/exist.toml")));

        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(level, "debug");
        assert_eq!(explicit, "debug");
        assert_eq!(absent, "info");
    }

    #[test]
    fn test_default_candidates_search_config_dirs() {
        let paths = DeviceConfig::candidate_paths(None);
        assert_eq!(paths[0], PathBuf::from("config").join("device.toml"));
        assert_eq!(paths.len(), 2);
    }
}
