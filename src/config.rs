use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub mod logging;
pub mod policy;
pub mod registry;
pub mod server;


pub use logging::LoggingConfig;
pub use policy::{CertificationFailureMode, PolicyConfig};
pub use registry::{QuirkRule, RedirectQuirkConfig, RegistryConfig};
pub use scoregate_certify::CertifierConfig as CertificationConfig;
pub use server::ServerConfig;

pub const DEFAULT_CONFIG_FILE: &str = "scoregate.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub certification: CertificationConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let candidate = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if candidate.exists() {
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read config {}", candidate.display()))?;
            let config: Config = toml::from_str(&raw)
                .with_context(|| format!("invalid config {}", candidate.display()))?;
            Ok(config)
        } else {
            tracing::warn!(
                path = %candidate.display(),
                "configuration file not found, using defaults"
            );
            Ok(Config::default())
        }
    }

    /// Applies command-line and environment overrides on top of the file.
    pub fn apply_overrides(
        &mut self,
        registry: Option<String>,
        port: Option<u16>,
        token: Option<String>,
    ) {
        if let Some(registry) = registry {
            self.registry.url = registry;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            self.certification.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_request_body_bytes == 0 {
            bail!("server.max_request_body_bytes must be greater than zero");
        }
        let registry = self.registry.base_url()?;
        if registry.scheme() != "https" && registry.scheme() != "http" {
            bail!("unsupported registry scheme {}", self.registry.url);
        }
        for quirk in &self.registry.redirect_quirks {
            if quirk.host.is_empty() {
                bail!("redirect quirk is missing a host");
            }
            if !quirk.path_prefix.starts_with('/') {
                bail!(
                    "redirect quirk path prefix {} must start with '/'",
                    quirk.path_prefix
                );
            }
        }
        if self
            .certification
            .token
            .as_deref()
            .is_none_or(|token| token.is_empty())
        {
            bail!("a certification token is required (set SCOREGATE_TOKEN or certification.token)");
        }
        Ok(())
    }
}
