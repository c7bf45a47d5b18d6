use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RelocError, Result};

/// Relocation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocateConfig {
    /// Registry access settings
    pub registry: RegistryConfig,

    /// Directory used to stage thick bundle content.
    /// When unset, the caller supplies a temporary directory.
    pub work_dir: Option<PathBuf>,

    /// Log level
    pub log_level: LogLevel,
}

impl RelocateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            RelocError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_yaml::from_str(&data).map_err(|e| {
            RelocError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Default config location (`~/.cnab-reloc/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".cnab-reloc").join("config.yaml"))
    }

    /// Load from an explicit path, or from the default location if it exists,
    /// or fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Registry access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Protocol used for registries not listed as insecure
    pub protocol: RegistryProtocol,

    /// Registry hosts reached over plain HTTP
    pub insecure_registries: Vec<String>,

    /// Per-registry credentials, keyed by registry host
    pub credentials: HashMap<String, RegistryCredential>,
}

impl RegistryConfig {
    /// Credentials configured for a registry host, if any.
    pub fn credential_for(&self, registry: &str) -> Option<&RegistryCredential> {
        self.credentials.get(registry)
    }
}

/// Registry transport protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryProtocol {
    Http,
    #[default]
    Https,
}

/// Username/password pair for a registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string for an `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RelocateConfig::default();
        assert_eq!(config.registry.protocol, RegistryProtocol::Https);
        assert!(config.registry.insecure_registries.is_empty());
        assert!(config.work_dir.is_none());
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_from_file_partial() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "registry:\n  insecure_registries: [\"localhost:5000\"]\n  credentials:\n    example.com:\n      username: alice\n      password: secret\nlog_level: debug\n",
        )
        .unwrap();

        let config = RelocateConfig::from_file(&path).unwrap();
        assert_eq!(config.registry.protocol, RegistryProtocol::Https);
        assert_eq!(config.registry.insecure_registries, vec!["localhost:5000"]);
        let cred = config.registry.credential_for("example.com").unwrap();
        assert_eq!(cred.username, "alice");
        assert_eq!(cred.password, "secret");
        assert!(config.registry.credential_for("ghcr.io").is_none());
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_from_file_missing() {
        let result = RelocateConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(RelocError::ConfigError(_))));
    }

    #[test]
    fn test_from_file_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "registry: [not, a, map]").unwrap();
        assert!(RelocateConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_load_explicit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "registry:\n  protocol: http\n").unwrap();
        let config = RelocateConfig::load(Some(&path)).unwrap();
        assert_eq!(config.registry.protocol, RegistryProtocol::Http);
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
        assert_eq!(LogLevel::Info.as_filter(), "info");
        assert_eq!(LogLevel::Error.as_filter(), "error");
    }
}
