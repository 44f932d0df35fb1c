//! Tarball admission: certification lookup plus the injected policy.

use async_trait::async_trait;
use scoregate_certify::{CertificationResult, Certifier, CheckResult, Vulnerability};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CertificationFailureMode;
use crate::error::ProxyError;
use crate::proxy::RouteMatch;

/// Everything a policy gets to look at for one package version.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PolicyInput {
    /// Full name, `@scope/name` when scoped
    pub name: String,
    pub version: String,
    pub score: Option<f64>,
    pub results: Vec<CheckResult>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub license: Option<String>,
}

impl PolicyInput {
    /// Checks that did not pass.
    pub fn failing(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|check| !check.pass)
    }
}

impl From<CertificationResult> for PolicyInput {
    fn from(result: CertificationResult) -> Self {
        let license = result.license();
        Self {
            name: result.name,
            version: result.version,
            score: result.score,
            results: result.results,
            vulnerabilities: result.vulnerabilities,
            license,
        }
    }
}

/// Decides whether a package version may be installed.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn allow(&self, pkg: &PolicyInput) -> anyhow::Result<bool>;
}

/// Allows versions whose score reaches `min_score`; a missing score counts as 0.
#[derive(Debug, Clone)]
pub struct ScoreThreshold {
    pub min_score: f64,
}

impl ScoreThreshold {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }
}

#[async_trait]
impl Policy for ScoreThreshold {
    async fn allow(&self, pkg: &PolicyInput) -> anyhow::Result<bool> {
        let score = pkg.score.unwrap_or(0.0);
        info!(
            "{score:>3} {}@{} (license={})",
            pkg.name,
            pkg.version,
            pkg.license.as_deref().unwrap_or("unknown")
        );
        for check in pkg.failing() {
            info!(
                "    - {} (\"{}\"=\"{}\")",
                check.name,
                check.test,
                display_value(&check.value)
            );
        }
        Ok(score >= self.min_score)
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow,
    /// Carries the `npm-notice` text
    Block(String),
}

/// `<registry>/<scope>/<name>/-/<name>-<version>.tgz`, or the unscoped form.
pub fn tarball_location(registry: &str, matched: &RouteMatch) -> Option<String> {
    Some(format!("{}/{}", registry, matched.tarball_path()?))
}

pub fn score_notice(name: &str, score: Option<f64>) -> String {
    format!("{name} has score of {}", score.unwrap_or(0.0))
}

/// Runs certification then the policy for one tarball.
pub async fn decide(
    certifier: &dyn Certifier,
    policy: &dyn Policy,
    on_error: CertificationFailureMode,
    name: &str,
    version: &str,
) -> Result<GateDecision, ProxyError> {
    let certification = match certifier.certify(name, version).await {
        Ok(result) => result,
        Err(err) => {
            return match on_error {
                CertificationFailureMode::Reject => Err(err.into()),
                CertificationFailureMode::Block => {
                    warn!(package = %name, %version, error = %err, "certification failed, blocking");
                    let notice = format!("{name}@{version} could not be certified: {err}");
                    Ok(GateDecision::Block(notice.replace(['\r', '\n'], " ")))
                }
                CertificationFailureMode::Allow => {
                    warn!(package = %name, %version, error = %err, "certification failed, allowing");
                    Ok(GateDecision::Allow)
                }
            };
        }
    };

    let input = PolicyInput::from(certification);
    let allowed = policy
        .allow(&input)
        .await
        .map_err(|err| ProxyError::PolicyPredicate(format!("{err:#}")))?;

    if allowed {
        Ok(GateDecision::Allow)
    } else {
        Ok(GateDecision::Block(score_notice(&input.name, input.score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoregate_certify::CertifyError;
    use serde_json::json;

    /// Returns the stored result, or a timeout when empty.
    struct Fixed(Option<CertificationResult>);

    #[async_trait]
    impl Certifier for Fixed {
        async fn certify(
            &self,
            _name: &str,
            _version: &str,
        ) -> Result<CertificationResult, CertifyError> {
            self.0.clone().ok_or(CertifyError::Timeout)
        }
    }

    struct Failing;

    #[async_trait]
    impl Policy for Failing {
        async fn allow(&self, _pkg: &PolicyInput) -> anyhow::Result<bool> {
            anyhow::bail!("predicate exploded")
        }
    }

    fn certified(score: Option<f64>) -> CertificationResult {
        CertificationResult {
            name: "@scope/pkg".to_string(),
            version: "1.2.3".to_string(),
            score,
            results: vec![
                CheckResult {
                    name: "license".to_string(),
                    test: "spdx".to_string(),
                    pass: true,
                    severity: "NONE".to_string(),
                    value: json!("MIT"),
                },
                CheckResult {
                    name: "has_install_scripts".to_string(),
                    test: "scripts".to_string(),
                    pass: false,
                    severity: "HIGH".to_string(),
                    value: json!(true),
                },
            ],
            vulnerabilities: Vec::new(),
        }
    }

    #[test]
    fn policy_input_carries_license() {
        let input = PolicyInput::from(certified(Some(90.0)));
        assert_eq!(input.name, "@scope/pkg");
        assert_eq!(input.license.as_deref(), Some("MIT"));
        assert_eq!(input.results.len(), 2);
        assert_eq!(input.results[1].value, json!(true));
    }

    #[test]
    fn failing_skips_passed_checks() {
        let input = PolicyInput::from(certified(Some(90.0)));
        let names: Vec<_> = input.failing().map(|check| check.name.as_str()).collect();
        assert_eq!(names, vec!["has_install_scripts"]);
    }

    #[tokio::test]
    async fn threshold_compares_score() {
        let policy = ScoreThreshold::new(85.0);
        assert!(policy.allow(&certified(Some(85.0)).into()).await.unwrap());
        assert!(!policy.allow(&certified(Some(84.9)).into()).await.unwrap());
        assert!(!policy.allow(&certified(None).into()).await.unwrap());
    }

    #[test]
    fn location_for_scoped_and_unscoped() {
        let scoped = RouteMatch {
            scope: Some("@scope".to_string()),
            name: "pkg".to_string(),
            version: Some("1.2.3".to_string()),
        };
        assert_eq!(
            tarball_location("https://registry.npmjs.org", &scoped).as_deref(),
            Some("https://registry.npmjs.org/@scope/pkg/-/pkg-1.2.3.tgz")
        );
        let unscoped = RouteMatch {
            scope: None,
            name: "express".to_string(),
            version: Some("4.18.2".to_string()),
        };
        assert_eq!(
            tarball_location("http://reg:1234", &unscoped).as_deref(),
            Some("http://reg:1234/express/-/express-4.18.2.tgz")
        );
    }

    #[test]
    fn notice_contains_score() {
        assert_eq!(score_notice("pkg", Some(42.0)), "pkg has score of 42");
        assert_eq!(score_notice("pkg", Some(42.5)), "pkg has score of 42.5");
        assert_eq!(score_notice("pkg", None), "pkg has score of 0");
    }

    #[tokio::test]
    async fn blocks_below_threshold_with_notice() {
        let certifier = Fixed(Some(certified(Some(12.0))));
        let decision = decide(
            &certifier,
            &ScoreThreshold::new(85.0),
            CertificationFailureMode::Reject,
            "@scope/pkg",
            "1.2.3",
        )
        .await
        .unwrap();
        assert_eq!(
            decision,
            GateDecision::Block("@scope/pkg has score of 12".to_string())
        );
    }

    #[tokio::test]
    async fn policy_errors_become_predicate_errors() {
        let certifier = Fixed(Some(certified(Some(99.0))));
        let err = decide(
            &certifier,
            &Failing,
            CertificationFailureMode::Allow,
            "@scope/pkg",
            "1.2.3",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::PolicyPredicate(ref msg) if msg.contains("exploded")));
    }

    #[tokio::test]
    async fn certification_failure_modes() {
        let certifier = Fixed(None);
        let policy = ScoreThreshold::new(0.0);

        let err = decide(&certifier, &policy, CertificationFailureMode::Reject, "a", "1.0.0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "certification_timeout");

        let blocked = decide(&certifier, &policy, CertificationFailureMode::Block, "a", "1.0.0")
            .await
            .unwrap();
        assert!(matches!(blocked, GateDecision::Block(ref notice) if notice.starts_with("a@1.0.0")));

        let allowed = decide(&certifier, &policy, CertificationFailureMode::Allow, "a", "1.0.0")
            .await
            .unwrap();
        assert_eq!(allowed, GateDecision::Allow);
    }
}
