use thiserror::Error;

/// Failures talking to the certification API.
///
/// Every variant is terminal for the current query: the client never retries.
#[derive(Debug, Error)]
pub enum CertifyError {
    #[error("certification token is not configured")]
    MissingToken,

    #[error("building certification client: {0}")]
    Client(String),

    #[error("certification request failed: {0}")]
    Transport(String),

    #[error("certification request timed out")]
    Timeout,

    #[error("certification API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("certification API error: {0}")]
    Graphql(String),

    #[error("malformed certification response: {0}")]
    Malformed(String),

    #[error("no certification data for {name}@{version}")]
    NotFound { name: String, version: String },

    #[error("undecodable value for check {check}: {reason}")]
    MalformedValue { check: String, reason: String },
}

impl CertifyError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
