//! Upstream fetch loop: redirect following, header rewriting and replay.

use std::time::Duration;

use base64::Engine;
use bytes::{Bytes, BytesMut};
use percent_encoding::percent_decode_str;
use rama::http::{
    Body, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri,
    body::util::BodyExt, header,
};
use tracing::debug;
use url::Url;

use super::metadata::rewrite_tarball_urls;
use super::playback::Playback;
use super::quirks::RedirectQuirks;
use crate::error::ProxyError;
use crate::upstream::{UA, UpstreamFetch};

/// What happens to a successful upstream body before it reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyTransform {
    Identity,
    /// Point `dist.tarball` entries at `http://localhost:<port>`
    TarballUrls { port: u16 },
}

pub struct Rewriter<'a> {
    pub upstream: &'a dyn UpstreamFetch,
    pub quirks: &'a RedirectQuirks,
    pub max_redirects: usize,
    /// Deadline for buffering an upstream body that gets rewritten
    pub timeout: Duration,
    /// Cap on the inbound request body
    pub max_body: usize,
}

/// Joins the request path onto the registry base. Dot segments are resolved
/// here, so the result is what upstream will actually be asked for.
pub fn upstream_target(registry: &str, uri: &Uri) -> Result<Url, ProxyError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let raw = format!("{registry}{path_and_query}");
    Url::parse(&raw).map_err(|err| ProxyError::InvalidUpstreamUrl {
        url: raw.clone(),
        reason: err.to_string(),
    })
}

/// Path of `target` relative to the registry base path, or `None` when dot
/// segments climbed out of it.
pub fn registry_path<'u>(base_path: &str, target: &'u Url) -> Option<&'u str> {
    let rest = target.path().strip_prefix(base_path.trim_end_matches('/'))?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

impl Rewriter<'_> {
    pub async fn rewrite(
        &self,
        request: Request<Body>,
        mut target: Url,
        transform: BodyTransform,
    ) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = read_limited(&parts.headers, body, self.max_body).await?;

        let mut hops = 0;
        let response = loop {
            let upstream_req = build_upstream_request(&parts.method, &parts.headers, &body, &target)?;
            let response = self.upstream.fetch(upstream_req).await?;
            let status = response.status();

            if status != StatusCode::MOVED_PERMANENTLY && status != StatusCode::FOUND {
                break response;
            }
            let Some(location) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                break response;
            };

            let next = target
                .join(location)
                .map_err(|err| ProxyError::InvalidUpstreamUrl {
                    url: location.to_string(),
                    reason: err.to_string(),
                })?;
            let next = self.quirks.apply(next);

            hops += 1;
            if hops > self.max_redirects {
                return Err(ProxyError::TooManyRedirects {
                    limit: self.max_redirects,
                    url: next.to_string(),
                });
            }
            debug!(from = %target, to = %next, %status, hops, "following upstream redirect");
            target = next;
        };

        let status = response.status();
        if status.as_u16() >= 400 || status == StatusCode::NOT_MODIFIED {
            return Ok(Playback::new(response).all());
        }

        match transform {
            BodyTransform::Identity => Ok(Playback::new(response).all()),
            BodyTransform::TarballUrls { port } => {
                let mut playback = Playback::new(response).status().headers();
                let raw = tokio::time::timeout(self.timeout, playback.take_body().collect())
                    .await
                    .map_err(|_| ProxyError::UpstreamTimeout {
                        url: target.to_string(),
                    })?
                    .map_err(|err| {
                        ProxyError::UpstreamTransport(format!("{target}: reading body: {err}"))
                    })?
                    .to_bytes();
                let rewritten = rewrite_tarball_urls(&raw, port)?;
                Ok(playback.body_from(rewritten))
            }
        }
    }
}

/// Buffers the inbound body, failing once it grows past `limit` bytes.
async fn read_limited(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(ProxyError::RequestTooLarge { limit });
    }

    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame
            .map_err(|err| ProxyError::UpstreamTransport(format!("reading request body: {err}")))?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if buf.len() + data.len() > limit {
            return Err(ProxyError::RequestTooLarge { limit });
        }
        buf.extend_from_slice(&data);
    }
    Ok(buf.freeze())
}

fn build_upstream_request(
    method: &Method,
    source: &HeaderMap,
    body: &Bytes,
    target: &Url,
) -> Result<Request<Body>, ProxyError> {
    let mut url = target.clone();
    let credentials = take_userinfo(&mut url);

    let invalid = |reason: String| ProxyError::InvalidUpstreamUrl {
        url: url.to_string(),
        reason,
    };
    let uri: Uri = url.as_str().parse().map_err(|err| invalid(format!("{err}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut request = Request::new(Body::from(body.clone()));
    *request.method_mut() = method.clone();
    *request.uri_mut() = uri;

    let headers = request.headers_mut();
    copy_request_headers(source, headers);
    headers.insert(
        header::HOST,
        HeaderValue::from_str(&authority).map_err(|err| invalid(err.to_string()))?,
    );
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    if !body.is_empty() {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }
    if !headers.contains_key(header::USER_AGENT) {
        headers.insert(header::USER_AGENT, HeaderValue::from_static(UA));
    }
    if let Some(credentials) = credentials {
        let value = format!("Basic {credentials}");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|err| invalid(err.to_string()))?,
        );
    }

    Ok(request)
}

/// Removes `user:pass@` from `url`, returning it base64-encoded for basic auth.
fn take_userinfo(url: &mut Url) -> Option<String> {
    if url.username().is_empty() && url.password().is_none() {
        return None;
    }
    let user = percent_decode_str(url.username()).decode_utf8_lossy().into_owned();
    let pass = url
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    // Only fails for cannot-be-a-base URLs, which never reach here
    let _ = url.set_username("");
    let _ = url.set_password(None);
    Some(base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}")))
}

fn copy_request_headers(source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source.iter() {
        if is_hop_header(name)
            || is_cdn_header(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        target.append(name, value.clone());
    }
}

/// Cloudflare request headers (`cf-ray`, `cf-connecting-ip`, ...).
fn is_cdn_header(name: &HeaderName) -> bool {
    name.as_str().starts_with("cf")
}

fn is_hop_header(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::KEEP_ALIVE
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
}
