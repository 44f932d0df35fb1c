use rama::http::{Body, HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};

/// Headers that stop being true once the body has been buffered or rewritten.
fn is_excluded(name: &HeaderName) -> bool {
    name == header::CONTENT_LENGTH
        || name == header::CONTENT_ENCODING
        || name == header::TRANSFER_ENCODING
}

/// Plays one upstream response back onto a fresh client response.
///
/// `status()` and `headers()` copy from the source; `body()` streams the
/// source body, `body_from()` substitutes an explicit buffer.
pub struct Playback {
    source: Response<Body>,
    status: StatusCode,
    headers: HeaderMap,
}

impl Playback {
    pub fn new(source: Response<Body>) -> Self {
        Self {
            source,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    pub fn status(mut self) -> Self {
        self.status = self.source.status();
        self
    }

    pub fn headers(mut self) -> Self {
        for (name, value) in self.source.headers() {
            if is_excluded(name) {
                continue;
            }
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Detaches the source body, e.g. to buffer and rewrite it.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(self.source.body_mut(), Body::empty())
    }

    pub fn body(mut self) -> Response<Body> {
        let body = self.take_body();
        self.finish(body)
    }

    /// Writes `buf` as the body with a matching `content-length`.
    pub fn body_from(mut self, buf: Vec<u8>) -> Response<Body> {
        self.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(buf.len()));
        self.finish(Body::from(buf))
    }

    pub fn all(self) -> Response<Body> {
        self.status().headers().body()
    }

    fn finish(self, body: Body) -> Response<Body> {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rama::http::body::util::BodyExt;

    fn upstream(status: StatusCode, body: &'static str) -> Response<Body> {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, "999")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::ETAG, "\"abc\"")
            .header(header::SET_COOKIE, "a=1")
            .header(header::SET_COOKIE, "b=2")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        response.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    #[tokio::test]
    async fn all_replays_status_headers_and_body() {
        let response = Playback::new(upstream(StatusCode::NOT_FOUND, "{\"error\":\"nope\"}")).all();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[header::ETAG], "\"abc\"");
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_bytes(response).await, b"{\"error\":\"nope\"}");
    }

    #[tokio::test]
    async fn not_modified_body_is_untouched() {
        let response = Playback::new(upstream(StatusCode::NOT_MODIFIED, "")).all();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn body_from_sets_new_length() {
        let mut playback = Playback::new(upstream(StatusCode::OK, "old")).status().headers();
        let original = playback.take_body().collect().await.unwrap().to_bytes();
        assert_eq!(&original[..], b"old");

        let response = playback.body_from(b"rewritten".to_vec());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "9");
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(body_bytes(response).await, b"rewritten");
    }

    #[test]
    fn unset_status_defaults_to_ok() {
        let response = Playback::new(upstream(StatusCode::IM_A_TEAPOT, "")).body();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().is_empty());
    }
}
