use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "RegistryConfig::default_url")]
    pub url: String,
    /// Per-hop timeout for upstream requests (seconds)
    #[serde(default = "RegistryConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "RegistryConfig::default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "RegistryConfig::default_redirect_quirks")]
    pub redirect_quirks: Vec<RedirectQuirkConfig>,
}

impl RegistryConfig {
    fn default_url() -> String {
        "https://registry.npmjs.org".to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_max_redirects() -> usize {
        5
    }

    fn default_redirect_quirks() -> Vec<RedirectQuirkConfig> {
        // Sends us to /packages/<name>, then redirects again to /packages/<name>/
        vec![RedirectQuirkConfig {
            host: "static-registry.nodesource.io".to_string(),
            path_prefix: "/packages/".to_string(),
            rule: QuirkRule::AppendTrailingSlash,
        }]
    }

    /// Registry base without trailing slashes.
    pub fn normalized(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(self.normalized())
            .with_context(|| format!("invalid registry url {}", self.url))
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            timeout_secs: Self::default_timeout_secs(),
            max_redirects: Self::default_max_redirects(),
            redirect_quirks: Self::default_redirect_quirks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuirkRule {
    AppendTrailingSlash,
}

/// A known upstream redirect oddity, keyed by host and path prefix.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RedirectQuirkConfig {
    pub host: String,
    pub path_prefix: String,
    pub rule: QuirkRule,
}
