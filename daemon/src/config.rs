//! Configuration loading and management

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::capture::{FilmFilter, SessionStore};
use crate::state::{Flow, SessionOptions};

/// Environment variable overriding the IPC socket path
pub const SOCKET_ENV: &str = "VINTAGE_BOOTH_SOCKET";

/// Name of the optional config file inside the data directory
pub const CONFIG_FILE: &str = "config.json";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Capture parameters per flow
    pub flows: BTreeMap<Flow, SessionOptions>,

    /// Resolution of the built-in test pattern source
    pub source: SourceConfig,

    /// Film look applied when developing
    pub filter: FilmFilter,

    /// Cap on stored pixel bytes, unbounded if unset
    pub storage_quota_bytes: Option<usize>,
}

/// Test pattern source resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 960,
        }
    }
}

/// On-disk overrides, every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    source: Option<SourceConfig>,
    filter: Option<FilmFilter>,
    storage_quota_bytes: Option<usize>,
    flows: BTreeMap<Flow, SessionOptions>,
}

impl Config {
    /// Load configuration from environment, config file and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let mut config = Self::from_home(Path::new(&home));

        let file = config.data_dir.join(CONFIG_FILE);
        if file.exists() {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            config
                .apply_file(&text)
                .with_context(|| format!("invalid config file {}", file.display()))?;
        }

        if let Ok(socket) = std::env::var(SOCKET_ENV) {
            config.socket_path = PathBuf::from(socket);
        }

        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `home`
    pub fn from_home(home: &Path) -> Self {
        let data_dir = home.join(".local").join("share").join("vintage-booth");
        let socket_path = data_dir.join("daemon.sock");

        Self {
            socket_path,
            data_dir,
            flows: Flow::ALL.iter().map(|f| (*f, f.default_options())).collect(),
            source: SourceConfig::default(),
            filter: FilmFilter::default(),
            storage_quota_bytes: None,
        }
    }

    /// Merge JSON overrides into this configuration
    pub fn apply_file(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = serde_json::from_str(text).context("failed to parse config JSON")?;

        if let Some(socket_path) = file.socket_path {
            self.socket_path = socket_path;
        }
        if let Some(source) = file.source {
            self.source = source;
        }
        if let Some(filter) = file.filter {
            self.filter = filter;
        }
        if let Some(quota) = file.storage_quota_bytes {
            self.storage_quota_bytes = Some(quota);
        }
        self.flows.extend(file.flows);
        Ok(())
    }

    /// Check that every flow preset can run
    pub fn validate(&self) -> Result<()> {
        for (flow, options) in &self.flows {
            options
                .validate()
                .map_err(|e| anyhow::anyhow!("flow {}: {}", flow, e))?;
        }
        Ok(())
    }

    /// Frame store honouring the configured quota
    pub fn session_store(&self) -> SessionStore {
        match self.storage_quota_bytes {
            Some(quota) => SessionStore::with_quota(quota),
            None => SessionStore::new(),
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::from_home(Path::new("/home/booth"));
        assert!(config.socket_path.to_string_lossy().contains("vintage-booth"));
        assert_eq!(config.flows.len(), 4);
        assert_eq!(config.flows[&Flow::Photobooth].total_shots, 4);
        assert_eq!(config.source, SourceConfig::default());
        assert_eq!(config.storage_quota_bytes, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_apply_file_overrides() {
        let mut config = Config::from_home(Path::new("/home/booth"));
        config
            .apply_file(
                r#"{
                    "socket_path": "/tmp/booth.sock",
                    "source": { "width": 640 },
                    "flows": { "photobooth": { "total_shots": 6, "countdown_seconds": 5 } }
                }"#,
            )
            .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/booth.sock"));
        assert_eq!(config.source.width, 640);
        assert_eq!(config.source.height, 960);

        let booth = config.flows[&Flow::Photobooth];
        assert_eq!(booth.total_shots, 6);
        assert_eq!(booth.countdown_seconds, 5);
        assert_eq!(booth.inter_shot_delay_ms, 3000);
        assert_eq!(config.flows[&Flow::FilmCamera].total_shots, 3);
    }

    #[test]
    fn test_storage_quota() {
        let mut config = Config::from_home(Path::new("/home/booth"));
        config.apply_file(r#"{"storage_quota_bytes": 8}"#).unwrap();
        assert_eq!(config.storage_quota_bytes, Some(8));

        let store = config.session_store();
        let frame = crate::capture::Frame::new(2, 2, vec![0; 16]).unwrap();
        assert!(store.set_item("filmPhotos", vec![frame]).is_err());
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let mut config = Config::from_home(Path::new("/home/booth"));
        assert!(config.apply_file(r#"{"sockets": "/tmp/x"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_shots() {
        let mut config = Config::from_home(Path::new("/home/booth"));
        config
            .apply_file(r#"{"flows": {"polaroid": {"total_shots": 0}}}"#)
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_dirs() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::from_home(home.path());
        config.ensure_dirs().unwrap();
        assert!(config.data_dir.is_dir());
    }
}
