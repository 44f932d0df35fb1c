use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CertifyError;
use crate::types::{CertificationResult, RawVersion};

pub const DEFAULT_API_URL: &str = "https://api.nodesource.com/ncm2/api/v1";

const UA: &str = concat!("scoregate/", env!("CARGO_PKG_VERSION"));

const SCORE_QUERY: &str = r#"query getScore($name: String!, $version: String!) {
  package(name: $name) {
    versions(version: $version) {
      score
      results {
        severity
        pass
        name
        test
        value
      }
      vulnerabilities {
        id
        title
        semver {
          vulnerable
        }
        severity
      }
    }
  }
}"#;

/// Source of certification data for package versions.
#[async_trait]
pub trait Certifier: Send + Sync {
    async fn certify(&self, name: &str, version: &str)
    -> Result<CertificationResult, CertifyError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertifierConfig {
    #[serde(default = "CertifierConfig::default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "CertifierConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl CertifierConfig {
    fn default_api_url() -> String {
        DEFAULT_API_URL.to_string()
    }

    fn default_timeout_secs() -> u64 {
        10
    }
}

impl Default for CertifierConfig {
    fn default() -> Self {
        Self {
            api_url: Self::default_api_url(),
            token: None,
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// GraphQL client for the certification API.
///
/// Issues exactly one bearer-authenticated query per call. Failures are
/// returned as-is; retry policy belongs to the caller.
#[derive(Clone)]
pub struct GraphqlCertifier {
    client: Client,
    endpoint: String,
    token: String,
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'static str,
    variables: ScoreVariables<'a>,
}

#[derive(Serialize)]
struct ScoreVariables<'a> {
    name: &'a str,
    version: &'a str,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<ScoreData>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct ScoreData {
    package: Option<ScorePackage>,
}

#[derive(Deserialize)]
struct ScorePackage {
    versions: Option<Vec<RawVersion>>,
}

impl GraphqlCertifier {
    pub fn new(config: &CertifierConfig) -> Result<Self, CertifyError> {
        let token = config
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(CertifyError::MissingToken)?;

        let client = Client::builder()
            .user_agent(UA)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| CertifyError::Client(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.api_url.clone(),
            token,
        })
    }
}

#[async_trait]
impl Certifier for GraphqlCertifier {
    async fn certify(
        &self,
        name: &str,
        version: &str,
    ) -> Result<CertificationResult, CertifyError> {
        debug!(endpoint = %self.endpoint, name, version, "querying certification");

        let request = GraphqlRequest {
            query: SCORE_QUERY,
            variables: ScoreVariables { name, version },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CertifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: GraphqlResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                CertifyError::Timeout
            } else {
                CertifyError::Malformed(err.to_string())
            }
        })?;

        if let Some(errors) = payload.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<_> = errors.into_iter().map(|err| err.message).collect();
            return Err(CertifyError::Graphql(messages.join("; ")));
        }

        let package = payload
            .data
            .ok_or_else(|| CertifyError::Malformed("missing data".to_string()))?
            .package
            .ok_or_else(|| not_found(name, version))?;

        let first = package
            .versions
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| not_found(name, version))?;

        first.into_result(name, version)
    }
}

fn transport_error(err: reqwest::Error) -> CertifyError {
    if err.is_timeout() {
        CertifyError::Timeout
    } else {
        CertifyError::Transport(err.to_string())
    }
}

fn not_found(name: &str, version: &str) -> CertifyError {
    CertifyError::NotFound {
        name: name.to_string(),
        version: version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn certifier(server: &MockServer) -> GraphqlCertifier {
        GraphqlCertifier::new(&CertifierConfig {
            api_url: server.uri(),
            token: Some("secret".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn new_requires_token() {
        let err = GraphqlCertifier::new(&CertifierConfig::default()).err().unwrap();
        assert!(matches!(err, CertifyError::MissingToken));

        let empty = CertifierConfig {
            token: Some(String::new()),
            ..CertifierConfig::default()
        };
        assert!(matches!(
            GraphqlCertifier::new(&empty).err().unwrap(),
            CertifyError::MissingToken
        ));
    }

    #[test]
    fn default_config_targets_public_api() {
        let config = CertifierConfig::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, 10);
        assert!(config.token.is_none());
    }

    #[tokio::test]
    async fn certify_decodes_first_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "variables": { "name": "express", "version": "4.18.2" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "package": { "versions": [{
                    "score": 87,
                    "results": [
                        { "name": "license", "test": "spdx", "pass": true,
                          "severity": "NONE", "value": "\"MIT\"" },
                        { "name": "has_install_scripts", "test": "none", "pass": false,
                          "severity": "MEDIUM", "value": "true" }
                    ],
                    "vulnerabilities": [{
                        "id": "GHSA-1", "title": "Prototype pollution",
                        "severity": "HIGH", "semver": { "vulnerable": "<4.17.3" }
                    }]
                }]}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cert = certifier(&server).certify("express", "4.18.2").await.unwrap();

        assert_eq!(cert.name, "express");
        assert_eq!(cert.version, "4.18.2");
        assert_eq!(cert.score, Some(87.0));
        assert_eq!(cert.results.len(), 2);
        assert_eq!(cert.results[0].value, json!("MIT"));
        assert_eq!(cert.results[1].value, json!(true));
        assert_eq!(cert.license().as_deref(), Some("MIT"));
        assert_eq!(cert.vulnerabilities.len(), 1);
        assert_eq!(cert.vulnerabilities[0].semver.vulnerable, json!("<4.17.3"));
    }

    #[tokio::test]
    async fn certify_tolerates_missing_score() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "package": { "versions": [{
                    "score": null, "results": null, "vulnerabilities": null
                }]}}
            })))
            .mount(&server)
            .await;

        let cert = certifier(&server).certify("left-pad", "1.3.0").await.unwrap();
        assert!(cert.score.is_none());
        assert!(cert.results.is_empty());
        assert!(cert.vulnerabilities.is_empty());
    }

    #[tokio::test]
    async fn certify_surfaces_graphql_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "Not authorized" }]
            })))
            .mount(&server)
            .await;

        let err = certifier(&server).certify("express", "4.18.2").await.unwrap_err();
        assert!(matches!(err, CertifyError::Graphql(ref msg) if msg == "Not authorized"));
    }

    #[tokio::test]
    async fn certify_surfaces_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .expect(1)
            .mount(&server)
            .await;

        let err = certifier(&server).certify("express", "4.18.2").await.unwrap_err();
        match err {
            CertifyError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn certify_reports_unknown_versions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "package": { "versions": [] } }
            })))
            .mount(&server)
            .await;

        let err = certifier(&server).certify("express", "0.0.0").await.unwrap_err();
        assert!(matches!(err, CertifyError::NotFound { ref version, .. } if version == "0.0.0"));
    }

    #[tokio::test]
    async fn certify_rejects_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = certifier(&server).certify("express", "4.18.2").await.unwrap_err();
        assert!(matches!(err, CertifyError::Malformed(_)));
    }

    #[tokio::test]
    async fn certify_reports_connection_failure() {
        let server = MockServer::start().await;
        let certifier = certifier(&server);
        drop(server);

        let err = certifier.certify("express", "4.18.2").await.unwrap_err();
        assert!(matches!(err, CertifyError::Transport(_)));
    }
}
