mod client;
mod error;
mod types;

pub use client::{Certifier, CertifierConfig, DEFAULT_API_URL, GraphqlCertifier};
pub use error::CertifyError;
pub use types::{CertificationResult, CheckResult, SemverRange, Vulnerability};
