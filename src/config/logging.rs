use serde::Deserialize;

/// `[logging]`; `RUST_LOG` takes precedence over `level` when set.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info,scoregate=debug`
    #[serde(default = "default_level")]
    pub level: String,
    /// One JSON object per event instead of human-readable lines
    #[serde(default)]
    pub json: bool,
    /// Include the emitting module in each line
    #[serde(default)]
    pub target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            target: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
