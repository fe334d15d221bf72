use crate::{RemoteError, DEFAULT_API_URL, DEFAULT_CDN_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_cdn_prefix() -> String {
    DEFAULT_CDN_PREFIX.to_owned()
}

fn default_site_url() -> String {
    "http://localhost/".to_owned()
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Interface new uploads are placed in.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_cdn_prefix")]
    pub cdn_prefix: String,
    /// Public URL of the site, sent as the permalink URL hint.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            interface: None,
            cdn_prefix: default_cdn_prefix(),
            site_url: default_site_url(),
            timeout_secs: default_timeout(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_owned());
        self
    }

    #[must_use]
    pub fn with_cdn_prefix(mut self, prefix: &str) -> Self {
        prefix.trim().trim_end_matches('/').clone_into(&mut self.cdn_prefix);
        self
    }

    #[must_use]
    pub fn with_site_url(mut self, site_url: &str) -> Self {
        site_url.clone_into(&mut self.site_url);
        self
    }

    /// Load config from `~/.config/imageshop/remote.json`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/imageshop/remote.json"))
}
