use std::time::Duration;

use async_trait::async_trait;
use rama::{
    Service,
    http::{Body, Request, Response, client::EasyHttpWebClient, layer::trace::TraceLayer},
    layer::Layer,
};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::ProxyError;

pub const UA: &str = concat!("scoregate/", env!("CARGO_PKG_VERSION"));

/// Transport used to reach the registry.
///
/// One call is one HTTP exchange: implementations must not follow redirects,
/// the rewrite pipeline does that itself.
#[async_trait]
pub trait UpstreamFetch: Send + Sync {
    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// Rama-based upstream HTTP client with a per-exchange timeout.
#[derive(Clone)]
pub struct UpstreamClient {
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &RegistryConfig) -> Self {
        tracing::info!(
            registry = %config.normalized(),
            timeout_secs = config.timeout_secs,
            max_redirects = config.max_redirects,
            "Upstream client initialized"
        );
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl UpstreamFetch for UpstreamClient {
    async fn fetch(&self, request: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let url = request.uri().to_string();
        let client = (TraceLayer::new_for_http(),).into_layer(EasyHttpWebClient::default());

        debug!(method = %request.method(), %url, "upstream request");

        match tokio::time::timeout(self.timeout, client.serve(request)).await {
            Ok(Ok(response)) => Ok(response.map(Body::new)),
            Ok(Err(err)) => Err(ProxyError::UpstreamTransport(format!("{url}: {err}"))),
            Err(_) => Err(ProxyError::UpstreamTimeout { url }),
        }
    }
}
