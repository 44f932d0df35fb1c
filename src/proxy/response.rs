use rama::http::{Body, Response, StatusCode, header};

use crate::error::ProxyError;

/// Custom header npm clients print to the user.
pub const NPM_NOTICE: &str = "npm-notice";

/// Responds with plain text
pub fn respond_text(status: StatusCode, body: &str) -> Result<Response<Body>, ProxyError> {
    Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        )
        .body(Body::from(body.to_owned()))
        .map_err(|err| ProxyError::Response(err.to_string()))
}

/// Empty 200, used for `/favicon.ico`
pub fn respond_empty() -> Result<Response<Body>, ProxyError> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .map_err(|err| ProxyError::Response(err.to_string()))
}

/// 307 to `location`, with the target repeated in the body for clients that
/// don't follow redirects.
pub fn respond_redirect(location: &str) -> Result<Response<Body>, ProxyError> {
    let mut response = respond_text(StatusCode::TEMPORARY_REDIRECT, location)?;
    let value = header::HeaderValue::from_str(location)
        .map_err(|err| ProxyError::Response(err.to_string()))?;
    response.headers_mut().insert(header::LOCATION, value);
    Ok(response)
}

/// 404 carrying the rejection reason in `npm-notice`.
pub fn respond_blocked(notice: &str) -> Result<Response<Body>, ProxyError> {
    let value = header::HeaderValue::from_str(notice)
        .map_err(|err| ProxyError::Response(err.to_string()))?;
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(NPM_NOTICE, value)
        .body(Body::empty())
        .map_err(|err| ProxyError::Response(err.to_string()))
}

/// Plain-text 5xx for a failed request; the message is informational only.
pub fn respond_error(err: &ProxyError) -> Response<Body> {
    let mut response = Response::new(Body::from(err.to_string()));
    *response.status_mut() = err.status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
