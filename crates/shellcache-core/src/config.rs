//! Cache manager configuration.
//!
//! The version tag, shell resource list and always-fresh matcher are
//! plain fields passed into the manager at construction. Hosts may persist
//! them as JSON at `~/.config/shellcache/config.json`.
//!
//! Bumping `version` is the cache invalidation mechanism: the next
//! activation deletes every bucket whose name differs from the new one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shellcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

const DEFAULT_SHELL_RESOURCES: [&str; 4] = ["/", "/index.html", "/styles.css", "/manifest.json"];

const DEFAULT_ALWAYS_FRESH: &str = "app.js";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub app_name: String,
    pub version: String,
    pub origin: String,
    pub shell_resources: Vec<String>,
    /// Trailing path of the resource that is never cached, e.g. `app.js`
    /// matches `/app.js` and `/static/app.js` but not `/webapp.js`.
    /// The query string is ignored.
    pub always_fresh: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            app_name: "notes".to_string(),
            version: "v1".to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            shell_resources: DEFAULT_SHELL_RESOURCES.iter().map(|s| s.to_string()).collect(),
            always_fresh: Some(DEFAULT_ALWAYS_FRESH.to_string()),
        }
    }
}

impl ManagerConfig {
    pub fn new(app_name: &str, version: &str, origin: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            version: version.to_string(),
            origin: origin.to_string(),
            ..Self::default()
        }
    }

    pub fn with_shell_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_always_fresh(mut self, pattern: Option<&str>) -> Self {
        self.always_fresh = pattern.map(str::to_string);
        self
    }

    /// Name of the one bucket that is current for this version.
    pub fn bucket_name(&self) -> String {
        format!("{}-{}", self.app_name, self.version)
    }

    pub fn origin_url(&self) -> Result<Url, CacheError> {
        Url::parse(&self.origin)
            .map_err(|e| CacheError::Config(format!("invalid origin '{}': {}", self.origin, e)))
    }

    /// Resolve a path (or absolute URL) against the origin
    pub fn resolve(&self, path: &str) -> Result<Url, CacheError> {
        self.origin_url()?
            .join(path)
            .map_err(|e| CacheError::Config(format!("cannot resolve '{}': {}", path, e)))
    }

    /// Resolved shell resources, in configured order.
    pub fn shell_urls(&self) -> Result<Vec<Url>, CacheError> {
        self.shell_resources.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn is_always_fresh(&self, url: &Url) -> bool {
        let pattern = match self.always_fresh.as_deref() {
            Some(p) => p.trim_start_matches('/'),
            None => return false,
        };
        if pattern.is_empty() {
            return false;
        }
        let path = url.path();
        path.strip_suffix(pattern)
            .is_some_and(|prefix| prefix.ends_with('/'))
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.app_name.trim().is_empty() {
            return Err(CacheError::Config("app_name must not be empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(CacheError::Config("version must not be empty".to_string()));
        }
        self.shell_urls()?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
