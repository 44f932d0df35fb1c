//! Error kinds surfaced while proxying a single request.

use rama::http::StatusCode;
use scoregate_certify::CertifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request path {path} resolves outside the registry")]
    PathOutsideRegistry { path: String },

    #[error("request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("upstream request failed: {0}")]
    UpstreamTransport(String),

    #[error("upstream request to {url} timed out")]
    UpstreamTimeout { url: String },

    #[error("gave up after {limit} redirects (last: {url})")]
    TooManyRedirects { limit: usize, url: String },

    #[error("invalid upstream url {url}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("malformed upstream JSON: {0}")]
    MalformedUpstreamJson(String),

    #[error(transparent)]
    Certification(#[from] CertifyError),

    #[error("policy check failed: {0}")]
    PolicyPredicate(String),

    #[error("building response: {0}")]
    Response(String),
}

impl ProxyError {
    /// Status code returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PathOutsideRegistry { .. } => StatusCode::BAD_REQUEST,
            Self::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamTransport(_)
            | Self::TooManyRedirects { .. }
            | Self::InvalidUpstreamUrl { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::MalformedUpstreamJson(_)
            | Self::Certification(_)
            | Self::PolicyPredicate(_)
            | Self::Response(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-friendly label used in logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathOutsideRegistry { .. } => "path_outside_registry",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::UpstreamTransport(_) => "upstream_transport",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::TooManyRedirects { .. } => "too_many_redirects",
            Self::InvalidUpstreamUrl { .. } => "invalid_upstream_url",
            Self::MalformedUpstreamJson(_) => "malformed_upstream_json",
            Self::Certification(err) if err.is_timeout() => "certification_timeout",
            Self::Certification(_) => "certification",
            Self::PolicyPredicate(_) => "policy_predicate",
            Self::Response(_) => "response",
        }
    }
}
