use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::CertifyError;

/// Certification data for one package version.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CertificationResult {
    pub name: String,
    pub version: String,
    pub score: Option<f64>,
    pub results: Vec<CheckResult>,
    pub vulnerabilities: Vec<Vulnerability>,
}

impl CertificationResult {
    /// Value of the first `license` check that isn't `"unknown"`.
    pub fn license(&self) -> Option<String> {
        let result = self
            .results
            .iter()
            .find(|result| result.name == "license" && result.value != "unknown")?;
        match &result.value {
            JsonValue::Null => None,
            JsonValue::String(license) => Some(license.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A single automated check with its decoded value.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub test: String,
    pub pass: bool,
    pub severity: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vulnerability {
    pub id: Option<String>,
    pub title: Option<String>,
    pub severity: Option<String>,
    #[serde(default)]
    pub semver: SemverRange,
}

/// Affected-version data as reported by the API (a range string or a flag).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemverRange {
    #[serde(default)]
    pub vulnerable: JsonValue,
}

// Wire shapes for `package.versions[0]`

#[derive(Debug, Deserialize)]
pub(crate) struct RawVersion {
    pub score: Option<f64>,
    pub results: Option<Vec<RawCheckResult>>,
    pub vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawCheckResult {
    pub name: String,
    pub test: Option<String>,
    #[serde(default)]
    pub pass: bool,
    pub severity: Option<String>,
    pub value: Option<String>,
}

impl RawCheckResult {
    /// `value` is a JSON document encoded as a string.
    pub(crate) fn decode(self) -> Result<CheckResult, CertifyError> {
        let value = match self.value.as_deref() {
            None => JsonValue::Null,
            Some(raw) => {
                serde_json::from_str(raw).map_err(|err| CertifyError::MalformedValue {
                    check: self.name.clone(),
                    reason: err.to_string(),
                })?
            }
        };
        Ok(CheckResult {
            name: self.name,
            test: self.test.unwrap_or_default(),
            pass: self.pass,
            severity: self.severity.unwrap_or_default(),
            value,
        })
    }
}

impl RawVersion {
    pub(crate) fn into_result(
        self,
        name: &str,
        version: &str,
    ) -> Result<CertificationResult, CertifyError> {
        let results = self
            .results
            .unwrap_or_default()
            .into_iter()
            .map(RawCheckResult::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CertificationResult {
            name: name.to_string(),
            version: version.to_string(),
            score: self.score,
            results,
            vulnerabilities: self.vulnerabilities.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(name: &str, value: JsonValue) -> CheckResult {
        CheckResult {
            name: name.to_string(),
            test: String::new(),
            pass: true,
            severity: "NONE".to_string(),
            value,
        }
    }

    fn certification(results: Vec<CheckResult>) -> CertificationResult {
        CertificationResult {
            name: "express".to_string(),
            version: "4.18.2".to_string(),
            score: Some(90.0),
            results,
            vulnerabilities: Vec::new(),
        }
    }

    #[test]
    fn license_skips_unknown_values() {
        let cert = certification(vec![
            check("license", json!("unknown")),
            check("license", json!("MIT")),
        ]);
        assert_eq!(cert.license().as_deref(), Some("MIT"));
    }

    #[test]
    fn license_absent_without_license_check() {
        let cert = certification(vec![check("has_tests", json!(true))]);
        assert!(cert.license().is_none());
    }

    #[test]
    fn license_renders_structured_values() {
        let cert = certification(vec![check("license", json!({"spdx": "ISC"}))]);
        assert_eq!(cert.license().as_deref(), Some(r#"{"spdx":"ISC"}"#));
    }

    #[test]
    fn decode_parses_json_encoded_value() {
        let raw = RawCheckResult {
            name: "disk_usage".to_string(),
            test: Some("size < 1MB".to_string()),
            pass: false,
            severity: Some("LOW".to_string()),
            value: Some(r#"{"bytes":2048}"#.to_string()),
        };
        let decoded = raw.decode().unwrap();
        assert_eq!(decoded.value, json!({"bytes": 2048}));
        assert_eq!(decoded.test, "size < 1MB");
        assert!(!decoded.pass);
    }

    #[test]
    fn decode_missing_value_is_null() {
        let raw = RawCheckResult {
            name: "readme".to_string(),
            test: None,
            pass: true,
            severity: None,
            value: None,
        };
        assert_eq!(raw.decode().unwrap().value, JsonValue::Null);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let raw = RawCheckResult {
            name: "license".to_string(),
            test: None,
            pass: true,
            severity: None,
            value: Some("MIT".to_string()),
        };
        let err = raw.decode().unwrap_err();
        assert!(matches!(err, CertifyError::MalformedValue { ref check, .. } if check == "license"));
    }
}
