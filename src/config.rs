//! Configuration for life-vault

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::rest::RestConfig;

/// Default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("life-vault")
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("life-vault")
        .join("config.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Entry catalog and key-value cache live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory shared with the widget process. Defaults to `<data_dir>/shared`
    #[serde(default)]
    pub shared_dir: Option<PathBuf>,

    /// Backend project URL. Without it the community feed runs offline
    #[serde(default)]
    pub backend_url: Option<String>,

    /// Publishable backend API key
    #[serde(default)]
    pub api_key: Option<String>,

    /// Name shown on shared posts
    #[serde(default = "default_nickname")]
    pub nickname: String,

    #[serde(default = "default_page_size")]
    pub feed_page_size: usize,

    #[serde(default = "default_free_limit")]
    pub favorites_free_limit: usize,

    /// Seed sample entries on first launch
    #[serde(default = "default_true")]
    pub seed_demo_data: bool,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_nickname() -> String {
    "Life Vault user".to_string()
}

fn default_page_size() -> usize {
    crate::remote::DEFAULT_PAGE_SIZE
}

fn default_free_limit() -> usize {
    crate::favorites::FREE_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            shared_dir: None,
            backend_url: None,
            api_key: None,
            nickname: default_nickname(),
            feed_page_size: default_page_size(),
            favorites_free_limit: default_free_limit(),
            seed_demo_data: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Load config from file, falling back to defaults when it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        match Self::load(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Entry catalog path
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vault.db")
    }

    /// Private key-value cache (session, favorites, pro flag)
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Widget snapshot directory
    pub fn shared_dir(&self) -> PathBuf {
        self.shared_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("shared"))
    }

    /// REST settings, if both URL and key are configured
    pub fn rest(&self) -> Option<RestConfig> {
        match (&self.backend_url, &self.api_key) {
            (Some(base_url), Some(api_key)) if !base_url.is_empty() && !api_key.is_empty() => {
                Some(RestConfig {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key: api_key.clone(),
                    nickname: self.nickname.clone(),
                    request_timeout: Duration::from_secs(self.request_timeout_secs),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("nickname = \"moss\"\nfeed_page_size = 20\n").unwrap();
        assert_eq!(config.nickname, "moss");
        assert_eq!(config.feed_page_size, 20);
        assert_eq!(config.favorites_free_limit, 8);
        assert!(config.seed_demo_data);
        assert!(config.rest().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            backend_url: Some("https://example.test/".to_string()),
            api_key: Some("key".to_string()),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.data_dir, dir.path());
        assert_eq!(loaded.shared_dir(), dir.path().join("shared"));
        assert_eq!(loaded.rest().unwrap().base_url, "https://example.test");
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.feed_page_size, 60);
    }
}
