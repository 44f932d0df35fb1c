use serde::Deserialize;

/// What the gate does when the certification query itself fails.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificationFailureMode {
    /// Fail the request with a 5xx; the tarball is not served.
    #[default]
    Reject,
    /// Answer 404 with an `npm-notice` explaining the failure.
    Block,
    /// Serve the tarball as if the policy had allowed it.
    Allow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Minimum certification score accepted by the default policy
    #[serde(default = "PolicyConfig::default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub on_certification_error: CertificationFailureMode,
}

impl PolicyConfig {
    fn default_min_score() -> f64 {
        85.0
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_score: Self::default_min_score(),
            on_certification_error: CertificationFailureMode::default(),
        }
    }
}
