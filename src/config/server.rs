use serde::Deserialize;

/// Listener settings for the proxy itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Also the port written into rewritten `dist.tarball` URLs
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Largest inbound request body forwarded upstream; bigger ones get 413
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    14313
}

fn default_workers() -> usize {
    num_cpus::get()
}

// Publishes carry the base64 tarball inline
fn default_max_request_body_bytes() -> usize {
    64 * 1024 * 1024
}
