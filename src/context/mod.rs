//! Per-request context handed to route handlers.

use serde::de::DeserializeOwned;

use crate::http::Request;

/// Wraps the incoming [`Request`] with the helpers handlers need.
pub struct Context {
    request: Request,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Shorthand for [`Request::query_param`].
    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }

    /// Decodes the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.request.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Body {
        id: String,
    }

    fn context(raw: &[u8]) -> Context {
        Context::new(Request::parse(raw).unwrap())
    }

    #[test]
    fn decodes_json_body() {
        let ctx = context(b"POST /enqueue HTTP/1.1\r\nContent-Length: 10\r\n\r\n{\"id\":\"a\"}");
        assert_eq!(ctx.json::<Body>().unwrap(), Body { id: "a".into() });
    }

    #[test]
    fn invalid_json_is_an_error() {
        let ctx = context(b"POST /enqueue HTTP/1.1\r\nContent-Length: 7\r\n\r\ninvalid");
        assert!(ctx.json::<Body>().is_err());
    }

    #[test]
    fn query_lookup() {
        let ctx = context(b"GET /status?id=42 HTTP/1.1\r\n\r\n");
        assert_eq!(ctx.query("id"), Some("42"));
        assert_eq!(ctx.request().path(), "/status");
    }
}
