//! Tarball URL rewriting for package metadata documents.

use serde_json::Value as JsonValue;
use tracing::warn;
use url::Url;

use crate::error::ProxyError;

/// Points every `dist.tarball` in a metadata document at this proxy.
///
/// Packuments carry one `dist` per entry of `versions`; version documents
/// (`/<name>/<version>`) carry a single top-level `dist`.
pub fn rewrite_tarball_urls(body: &[u8], port: u16) -> Result<Vec<u8>, ProxyError> {
    let mut metadata: JsonValue = serde_json::from_slice(body)
        .map_err(|err| ProxyError::MalformedUpstreamJson(err.to_string()))?;

    if let Some(versions) = metadata.get_mut("versions").and_then(|v| v.as_object_mut()) {
        for version_data in versions.values_mut() {
            rewrite_dist(version_data, port);
        }
    } else {
        rewrite_dist(&mut metadata, port);
    }

    serde_json::to_vec(&metadata).map_err(|err| ProxyError::MalformedUpstreamJson(err.to_string()))
}

fn rewrite_dist(document: &mut JsonValue, port: u16) {
    let Some(dist) = document.get_mut("dist").and_then(|d| d.as_object_mut()) else {
        return;
    };
    let Some(tarball) = dist.get("tarball").and_then(|t| t.as_str()) else {
        return;
    };
    match local_tarball_url(tarball, port) {
        Some(local) => {
            dist.insert("tarball".to_string(), JsonValue::String(local));
        }
        None => warn!(tarball, "leaving unrewritable tarball url untouched"),
    }
}

/// Same path, but `http://localhost:<port>`.
fn local_tarball_url(tarball: &str, port: u16) -> Option<String> {
    let mut url = Url::parse(tarball).ok()?;
    url.set_scheme("http").ok()?;
    url.set_host(Some("localhost")).ok()?;
    url.set_port(Some(port)).ok()?;
    Some(url.to_string())
}
