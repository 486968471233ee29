//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header")]
    InvalidContentLength,
}

/// A parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use taskpool::http::{Method, Request};
///
/// let raw = b"GET /status?id=job%201 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let request = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.path(), "/status");
/// assert_eq!(request.query_param("id"), Some("job 1"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: HashMap<String, String>,
    body: Bytes,
    head_len: usize,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses the request at the start of `buf`, including its body.
    ///
    /// The body is the `Content-Length` bytes following the header block;
    /// anything after that belongs to the next request on the connection.
    /// Use [`encoded_len`](Self::encoded_len) to know how much of `buf` was
    /// consumed.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: headers or body are not fully buffered yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a number
    ///   or is too large to address.
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let (mut request, body_offset) = Self::parse_head(buf)?;

        let content_length = match request.headers.get("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength)?,
            None => 0,
        };
        let end = body_offset
            .checked_add(content_length)
            .ok_or(RequestError::InvalidContentLength)?;
        if buf.len() < end {
            return Err(RequestError::Incomplete);
        }
        request.body = Bytes::copy_from_slice(&buf[body_offset..end]);
        Ok(request)
    }

    /// Parses only the header block, returning the request (with an empty
    /// body) and the offset at which the body starts.
    pub fn parse_head(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw.method {
            Some(m) => m.parse::<Method>().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = raw
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), parse_query_string(query)),
            None => (target.to_owned(), HashMap::new()),
        };

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                body: Bytes::new(),
                head_len: body_offset,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Decoded query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Bytes this request occupied on the wire: header block plus body.
    pub fn encoded_len(&self) -> usize {
        self.head_len + self.body.len()
    }

    /// Returns `true` if the connection should stay open after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 only with an explicit
    /// `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }
}

// `key=value&key2=value2`, with `+` and `%XX` decoded. Undecodable escapes
// are kept literally.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/healthz");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert!(req.body().is_empty());
    }

    #[test]
    fn query_values_are_decoded() {
        let raw = b"GET /status?id=a%2Fb+c&x HTTP/1.1\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("id"), Some("a/b c"));
        assert_eq!(req.query_param("x"), Some(""));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn malformed_escape_is_kept() {
        assert_eq!(decode_component("100%"), "100%");
        assert_eq!(decode_component("%zz1"), "%zz1");
        assert_eq!(decode_component("%+1"), "% 1");
        assert_eq!(decode_component("%C3%A9"), "é");
    }

    #[test]
    fn incomplete_headers() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn incomplete_body() {
        let raw = b"POST /enqueue HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST /enqueue HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(&req.body()[..], b"hello");
        assert_eq!(&raw[req.encoded_len()..], b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn oversized_content_length_is_rejected() {
        let raw = b"POST /enqueue HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nx";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength)
        ));
    }

    #[test]
    fn bad_content_length() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::InvalidContentLength)
        ));
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse_head(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse_head(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse_head(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.is_keep_alive());
    }
}
