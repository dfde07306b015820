//! Run configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, then values
//! from the command line. The CLI layer also carries `ANIMAP_*` environment
//! variables, which clap resolves before they reach here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::fetch_mode::FetchMode;

pub const CONFIG_DIR: &str = "animap";
pub const CONFIG_FILE: &str = "config.toml";
pub const CACHE_DB_FILE: &str = "animap.db";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub mal_client_id: String,
    pub tmdb_api_key: String,
    pub anidb_mode: FetchMode,
    pub tmdb_mode: FetchMode,
    pub discord_webhook_url: Option<String>,
    pub root_path: PathBuf,
    pub cache_dir: PathBuf,
    pub scrape_workers: usize,
    pub scrape_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub legacy_exact_match: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mal_client_id: String::new(),
            tmdb_api_key: String::new(),
            anidb_mode: FetchMode::Default,
            tmdb_mode: FetchMode::Default,
            discord_webhook_url: None,
            root_path: PathBuf::from("."),
            cache_dir: PathBuf::from("."),
            scrape_workers: 10,
            scrape_delay_ms: 5000,
            request_timeout_secs: 30,
            legacy_exact_match: true,
        }
    }
}

/// Values from the command line or environment. `None` keeps the lower layer.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub mal_client_id: Option<String>,
    pub tmdb_api_key: Option<String>,
    pub anidb_mode: Option<FetchMode>,
    pub tmdb_mode: Option<FetchMode>,
    pub discord_webhook_url: Option<String>,
    pub root_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

/// `$XDG_CONFIG_HOME/animap/config.toml`, else `~/.config/animap/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join(CONFIG_DIR).join(CONFIG_FILE));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid config file")
    }

    /// Load the file layer and apply overrides.
    ///
    /// An explicitly given path must exist. The default path is optional.
    pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&contents).with_context(|| format!("In {}", path.display()))?
            }
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    debug!(path = %path.display(), "loading config");
                    let contents = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read config {}", path.display()))?;
                    Self::from_toml(&contents).with_context(|| format!("In {}", path.display()))?
                }
                None => Self::default(),
            },
        };
        config.apply(overrides);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.mal_client_id {
            self.mal_client_id = v;
        }
        if let Some(v) = overrides.tmdb_api_key {
            self.tmdb_api_key = v;
        }
        if let Some(v) = overrides.anidb_mode {
            self.anidb_mode = v;
        }
        if let Some(v) = overrides.tmdb_mode {
            self.tmdb_mode = v;
        }
        if let Some(v) = overrides.discord_webhook_url {
            self.discord_webhook_url = Some(v);
        }
        if let Some(v) = overrides.root_path {
            self.root_path = v;
        }
        if let Some(v) = overrides.cache_dir {
            self.cache_dir = v;
        }
    }

    /// Settings a full pipeline run cannot start without.
    pub fn validate(&self) -> Result<()> {
        if self.mal_client_id.trim().is_empty() {
            bail!("mal_client_id is required (config file or ANIMAP_MAL_CLIENT_ID)");
        }
        if self.tmdb_mode != FetchMode::Skip && self.tmdb_api_key.trim().is_empty() {
            bail!("tmdb_api_key is required unless tmdb_mode is 'skip'");
        }
        if self.scrape_workers == 0 {
            bail!("scrape_workers must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.cache_dir.join(CACHE_DB_FILE)
    }

    pub fn scrape_delay(&self) -> Duration {
        Duration::from_millis(self.scrape_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scrape_workers, 10);
        assert_eq!(config.scrape_delay(), Duration::from_secs(5));
        assert!(config.legacy_exact_match);
        assert_eq!(config.cache_db_path(), PathBuf::from("./animap.db"));
    }

    #[test]
    fn test_toml_layer_keeps_defaults_for_missing_keys() {
        let config = Config::from_toml(
            r#"
            mal_client_id = "abc"
            tmdb_mode = "skip"
            scrape_delay_ms = 250
            legacy_exact_match = false
            "#,
        )
        .unwrap();
        assert_eq!(config.mal_client_id, "abc");
        assert_eq!(config.tmdb_mode, FetchMode::Skip);
        assert_eq!(config.anidb_mode, FetchMode::Default);
        assert_eq!(config.scrape_delay_ms, 250);
        assert_eq!(config.scrape_workers, 10);
        assert!(!config.legacy_exact_match);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("mal_client = \"typo\"").is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "mal_client_id = \"file\"\nroot_path = \"/from/file\"\n").unwrap();

        let config = Config::load(
            Some(&path),
            Overrides {
                mal_client_id: Some("cli".to_string()),
                anidb_mode: Some(FetchMode::All),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.mal_client_id, "cli");
        assert_eq!(config.root_path, PathBuf::from("/from/file"));
        assert_eq!(config.anidb_mode, FetchMode::All);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml")), Overrides::default()).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_err());
        config.mal_client_id = "id".to_string();
        assert!(config.validate().is_err());
        config.tmdb_api_key = "key".to_string();
        assert!(config.validate().is_ok());
        config.scrape_workers = 0;
        assert!(config.validate().is_err());
    }
}
