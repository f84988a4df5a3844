//! Daemon configuration.
//!
//! A complete crate still needs a config layer even though spec.md scopes
//! CLI wiring/auth/logging out of the domain model (SPEC_FULL.md Section
//! 10). TOML-backed, following the teacher's `loop-core::config::Config`
//! shape (defaults via `Default`, flat key set), loaded with `toml` the
//! way the teacher loads its own text format with `dirs`/a file path.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: metadata-store/execution-backend endpoints and
/// reconciliation tuning (SPEC_FULL.md Section 10).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the metadata store (spec Section 6).
    pub store_base_url: String,
    /// Base URL of the execution backend (spec Section 6).
    pub backend_base_url: String,
    /// Bearer token presented to both the metadata store and the
    /// execution backend.
    pub auth_token: Option<String>,
    /// Seconds between reconciliation passes in the main loop.
    pub poll_interval_sec: u64,
    /// Caps shards submitted per reconciliation pass (spec Section 4.7);
    /// `None` means unbounded.
    pub maxcount: Option<usize>,
    /// Address the local control-plane API binds to. Loopback-only per
    /// SPEC_FULL.md Section 6.
    pub control_plane_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_base_url: "http://localhost:8000".to_string(),
            backend_base_url: "http://localhost:8001".to_string(),
            auth_token: None,
            poll_interval_sec: 30,
            maxcount: None,
            control_plane_addr: "127.0.0.1:4700".to_string(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Default path for the daemon's config file (`$XDG_CONFIG_HOME` or
    /// `~/.config`, under `metawfd/config.toml`), mirroring the teacher's
    /// `dirs`-based config path resolution.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("metawfd").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.store_base_url, "http://localhost:8000");
        assert_eq!(config.poll_interval_sec, 30);
        assert!(config.maxcount.is_none());
        assert_eq!(config.control_plane_addr, "127.0.0.1:4700");
    }

    #[test]
    fn from_file_parses_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
store_base_url = "https://metadata.example.org"
maxcount = 10
"#,
        )
        .unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store_base_url, "https://metadata.example.org");
        assert_eq!(config.maxcount, Some(10));
        assert_eq!(config.poll_interval_sec, 30);
    }

    #[test]
    fn from_file_errors_on_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
