mod metadata;
mod playback;
mod quirks;
mod response;
mod rewrite;
mod route;
mod types;

use std::sync::Arc;
use std::time::Duration;

use rama::{
    Service,
    error::BoxError,
    http::{Body, Request, Response},
};
use scoregate_certify::Certifier;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    config::Config,
    error::ProxyError,
    gate::{self, GateDecision, Policy},
    upstream::{UpstreamClient, UpstreamFetch},
};

// Re-export public types
pub use metadata::rewrite_tarball_urls;
pub use playback::Playback;
pub use quirks::RedirectQuirks;
pub use response::NPM_NOTICE;
pub use rewrite::BodyTransform;
pub use route::{Route, RouteKind, RouteMatch};
pub use types::{ErrorReport, RequestContext};

const ERROR_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct GateProxy {
    config: Arc<Config>,
    /// Registry base without trailing slash
    registry: String,
    /// Path component of the registry base, e.g. `/npm`
    base_path: String,
    upstream: Arc<dyn UpstreamFetch>,
    certifier: Arc<dyn Certifier>,
    policy: Arc<dyn Policy>,
    quirks: RedirectQuirks,
    errors: broadcast::Sender<ErrorReport>,
}

impl GateProxy {
    pub fn new(config: Arc<Config>, certifier: Arc<dyn Certifier>, policy: Arc<dyn Policy>) -> Self {
        let upstream = Arc::new(UpstreamClient::new(&config.registry));
        Self::with_upstream(config, upstream, certifier, policy)
    }

    pub fn with_upstream(
        config: Arc<Config>,
        upstream: Arc<dyn UpstreamFetch>,
        certifier: Arc<dyn Certifier>,
        policy: Arc<dyn Policy>,
    ) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let base_path = config
            .registry
            .base_url()
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        Self {
            registry: config.registry.normalized().to_string(),
            base_path,
            quirks: RedirectQuirks::new(config.registry.redirect_quirks.clone()),
            config,
            upstream,
            certifier,
            policy,
            errors,
        }
    }

    /// Every request that ends in an error response is published here.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorReport> {
        self.errors.subscribe()
    }

    async fn handle(
        &self,
        req: Request<Body>,
        ctx: &mut RequestContext,
    ) -> Result<Response<Body>, ProxyError> {
        let target = rewrite::upstream_target(&self.registry, req.uri())?;
        let path = rewrite::registry_path(&self.base_path, &target).ok_or_else(|| {
            ProxyError::PathOutsideRegistry {
                path: req.uri().path().to_string(),
            }
        })?;
        let route = Route::classify(req.method(), path);
        ctx.route = route.kind();

        match route {
            Route::Favicon => response::respond_empty(),
            Route::Passthrough => {
                self.rewriter()
                    .rewrite(req, target, BodyTransform::Identity)
                    .await
            }
            Route::Metadata(_) => {
                let transform = BodyTransform::TarballUrls {
                    port: self.config.server.port,
                };
                self.rewriter().rewrite(req, target, transform).await
            }
            Route::Tarball(matched) => self.handle_tarball(&matched).await,
        }
    }

    async fn handle_tarball(&self, matched: &RouteMatch) -> Result<Response<Body>, ProxyError> {
        let location = gate::tarball_location(&self.registry, matched)
            .ok_or_else(|| ProxyError::Response("tarball route without a version".to_string()))?;
        let name = matched.full_name();
        let version = matched.version.as_deref().unwrap_or_default();

        let decision = gate::decide(
            self.certifier.as_ref(),
            self.policy.as_ref(),
            self.config.policy.on_certification_error,
            &name,
            version,
        )
        .await?;

        match decision {
            GateDecision::Allow => {
                info!(package = %name, %version, "tarball allowed");
                response::respond_redirect(&location)
            }
            GateDecision::Block(notice) => {
                info!(package = %name, %version, %notice, "tarball blocked");
                response::respond_blocked(&notice)
            }
        }
    }

    fn rewriter(&self) -> rewrite::Rewriter<'_> {
        rewrite::Rewriter {
            upstream: self.upstream.as_ref(),
            quirks: &self.quirks,
            max_redirects: self.config.registry.max_redirects,
            timeout: Duration::from_secs(self.config.registry.timeout_secs),
            max_body: self.config.server.max_request_body_bytes,
        }
    }

    fn report(&self, ctx: &RequestContext, err: &ProxyError) {
        // No subscribers is fine
        let _ = self.errors.send(ErrorReport {
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
            kind: err.kind(),
            status: err.status().as_u16(),
            message: err.to_string(),
        });
    }
}

impl Service<Request<Body>> for GateProxy {
    type Output = Response<Body>;
    type Error = BoxError;

    async fn serve(&self, req: Request<Body>) -> Result<Self::Output, Self::Error> {
        let mut ctx = RequestContext::from_request(&req);

        match self.handle(req, &mut ctx).await {
            Ok(resp) => {
                let response_code = resp.status().as_u16();
                let duration_ms = ctx.start.elapsed().as_millis();
                info!(
                    summary = %ctx.summary(),
                    route = %ctx.route,
                    response_code,
                    duration_ms,
                    "request handled"
                );
                Ok(resp)
            }
            Err(err) => {
                let duration_ms = ctx.start.elapsed().as_millis();
                error!(
                    summary = %ctx.summary(),
                    route = %ctx.route,
                    response_code = err.status().as_u16(),
                    duration_ms,
                    kind = err.kind(),
                    error = %err,
                    "request failed"
                );
                self.report(&ctx, &err);
                Ok(response::respond_error(&err))
            }
        }
    }
}
