use std::time::Instant;

use rama::http::{Body, Method, Request};

use super::route::RouteKind;

/// Request context for tracking request lifecycle
pub struct RequestContext {
    pub start: Instant,
    pub method: Method,
    pub path: String,
    pub route: RouteKind,
}

impl RequestContext {
    pub fn from_request(req: &Request<Body>) -> Self {
        Self {
            start: Instant::now(),
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            route: RouteKind::Passthrough,
        }
    }

    pub fn summary(&self) -> String {
        format!("{} {}", self.method.as_str(), self.path)
    }
}

/// A request that ended in an error response, published to subscribers of
/// [`GateProxy::subscribe_errors`](super::GateProxy::subscribe_errors).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub method: String,
    pub path: String,
    pub kind: &'static str,
    pub status: u16,
    pub message: String,
}
