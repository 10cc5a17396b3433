use crate::{
    errors::ErrorKind,
    http::{
        query::{Cookies, Query},
        types::{self, Header, Method, Version},
    },
    limits::ReqLimits,
    media::Upload,
};
use memchr::memchr;
use serde::de::DeserializeOwned;
use std::{any::Any, fmt, net::SocketAddr};

/// A decoded HTTP request.
///
/// Created by the server once the header block of a connection has been
/// read, then passed by mutable reference through the middleware chain and
/// into the route [`Handler`](crate::Handler).
///
/// # Input data requirements
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`)
///
/// ## First line
///
/// ```text
/// [METHOD] SP [TARGET] SP [VERSION] CRLF
/// ```
/// - `[METHOD]`: see [Method](crate::Method)
/// - `[TARGET]`: path, optionally followed by `?` and a query string
/// - `[VERSION]`: `HTTP/1.0` or `HTTP/1.1`
///
/// A first line that does not have exactly these three parts is answered
/// with `400 Bad Request`; another `HTTP/x.y` version with `505`.
///
/// ## Header
///
/// ```text
/// [NAME] ":" [VALUE] CRLF
/// ```
/// The name keeps its casing but is looked up case-insensitively. Leading
/// spaces of the value are dropped. Lines without a colon are ignored.
///
/// ## Body
///
/// Only bodies with a `Content-Length` header are read; chunked encoding is
/// not supported and a body without `Content-Length` is treated as absent.
///
/// | `Content-Type`            | Body storage                                 |
/// |---------------------------|----------------------------------------------|
/// | absent                    | in memory, see [`body`](Request::body)       |
/// | `application/json`        | in memory, see [`body`](Request::body)       |
/// | anything else             | temporary file, see [`upload`](Request::upload) |
pub struct Request {
    method: Method,
    path: String,
    version: Version,

    headers: Vec<Header>,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    pub(crate) params: Vec<(String, String)>,

    content_length: usize,
    body: Option<Vec<u8>>,
    upload: Option<Upload>,

    client_ip: String,
    client_addr: SocketAddr,

    error: Option<String>,
    context: Option<Box<dyn Any + Send + Sync>>,
    pub(crate) recovery_armed: bool,
    pub(crate) handler_invoked: bool,
}

impl Request {
    /// Decodes a header block (terminator included).
    pub(crate) fn decode(
        head: &[u8],
        client_addr: SocketAddr,
        limits: &ReqLimits,
        trust_forwarded_for: bool,
    ) -> Result<Self, ErrorKind> {
        let text = simdutf8::basic::from_utf8(head).map_err(|_| ErrorKind::BadRequest)?;
        let text = text.strip_suffix("\r\n\r\n").unwrap_or(text);

        let mut lines = text.split("\r\n");
        let (method, target, version) = parse_first_line(lines.next().unwrap_or_default())?;

        let mut headers = Vec::with_capacity(limits.max_headers.min(32));
        for line in lines.take(limits.max_headers) {
            if let Some(header) = parse_header(line) {
                headers.push(header);
            }
        }

        let (path, query_str) = match memchr(b'?', target.as_bytes()) {
            Some(index) => (&target[..index], Some(&target[index + 1..])),
            None => (target, None),
        };

        let mut request = Request {
            method,
            path: path.to_owned(),
            version,

            headers,
            query: Vec::new(),
            cookies: Vec::new(),
            params: Vec::new(),

            content_length: 0,
            body: None,
            upload: None,

            client_ip: String::new(),
            client_addr,

            error: None,
            context: None,
            recovery_armed: false,
            handler_invoked: false,
        };

        if let Some(query) = query_str {
            Query::parse_into(&mut request.query, query, limits.max_query_params);
        }

        if let Some(cookie) = find_header(&request.headers, "cookie") {
            let mut cookies = Vec::new();
            Cookies::parse_into(&mut cookies, cookie, limits.max_cookies);
            request.cookies = cookies;
        }

        request.content_length = find_header(&request.headers, "content-length")
            .and_then(|value| types::slice_to_usize(value.trim().as_bytes()))
            .unwrap_or(0);

        request.client_ip = find_header(&request.headers, "x-forwarded-for")
            .filter(|_| trust_forwarded_for)
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| client_addr.ip().to_string());

        Ok(request)
    }

    #[inline]
    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.body = Some(body);
    }

    #[inline]
    pub(crate) fn set_upload(&mut self, upload: Upload) {
        self.upload = Some(upload);
    }

    #[inline]
    pub(crate) fn take_upload(&mut self) -> Option<Upload> {
        self.upload.take()
    }
}

#[inline]
fn parse_first_line(line: &str) -> Result<(Method, &str, Version), ErrorKind> {
    let mut parts = line.split(' ');

    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ErrorKind::BadRequest);
    };

    if method.is_empty() || !(target.starts_with('/') || target == "*") {
        return Err(ErrorKind::BadRequest);
    }

    Ok((
        Method::from_bytes(method.as_bytes())?,
        target,
        Version::from_bytes(version.as_bytes())?,
    ))
}

#[inline]
fn parse_header(line: &str) -> Option<Header> {
    let colon = memchr(b':', line.as_bytes()).filter(|index| *index > 0)?;

    Some(Header {
        name: line[..colon].to_owned(),
        value: line[colon + 1..].trim_start_matches(' ').to_owned(),
    })
}

#[inline]
fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request path without the query string.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Protocol label of the request line (e.g. `"HTTP/1.1"`).
    #[inline(always)]
    pub const fn protocol(&self) -> &'static str {
        self.version.as_str()
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// All headers in the order they were received.
    #[inline(always)]
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    #[inline(always)]
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    #[inline(always)]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Value of `Content-Length`, or `0` when absent or not a number.
    #[inline(always)]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    /// First query parameter with the given name.
    #[inline]
    pub fn query(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    /// All query parameters, in order, duplicates included.
    #[inline(always)]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Path parameter captured by the matched route template.
    ///
    /// # Examples
    /// ```no_run
    /// use ember_web::{Method, Request, Response, Server, StatusCode};
    ///
    /// # fn main() {
    /// let builder = Server::builder().route(Method::Get, "/users/{id}", |req: &mut Request| {
    ///     let id = req.param("id").unwrap_or_default().to_owned();
    ///     Response::text(StatusCode::Ok, id)
    /// });
    /// # }
    /// ```
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        lookup(&self.params, name)
    }

    #[inline(always)]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    #[inline]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name)
    }

    #[inline(always)]
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    /// In-memory request body, if one was sent and not streamed to disk.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// In-memory body as text, if it is valid UTF-8.
    #[inline]
    pub fn body_str(&self) -> Option<&str> {
        self.body().and_then(|body| std::str::from_utf8(body).ok())
    }

    /// Deserializes the in-memory body as JSON.
    #[inline]
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.body().unwrap_or_default())
    }

    /// Descriptor of a body streamed to a temporary file.
    ///
    /// The file is left in place when the request ends; removing it is up to
    /// the handler.
    #[inline(always)]
    pub fn upload(&self) -> Option<&Upload> {
        self.upload.as_ref()
    }

    /// Client IP, derived once per connection.
    #[inline(always)]
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    /// Message stored by a failed validation, or by [`set_error`](Self::set_error).
    #[inline(always)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[inline]
    pub fn set_error<T: Into<String>>(&mut self, message: T) {
        self.error = Some(message.into());
    }

    /// Stores application data for later middleware or the handler,
    /// replacing any previous value.
    #[inline]
    pub fn set_context<T: Any + Send + Sync>(&mut self, value: T) {
        self.context = Some(Box::new(value));
    }

    #[inline]
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref()
    }

    #[inline]
    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_mut()?.downcast_mut()
    }
}

#[inline]
fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("params", &self.params)
            .field("cookies", &self.cookies)
            .field("content_length", &self.content_length)
            .field("upload", &self.upload)
            .field("client_ip", &self.client_ip)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Request {
    pub(crate) fn parse(raw: &str) -> Request {
        let head_end = raw.find("\r\n\r\n").map(|i| i + 4).unwrap_or(raw.len());
        let mut req = Request::decode(
            raw[..head_end].as_bytes(),
            "127.0.0.1:40000".parse().unwrap(),
            &ReqLimits::default(),
            false,
        )
        .unwrap();

        if head_end < raw.len() {
            req.set_body(raw.as_bytes()[head_end..].to_vec());
        }
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> Result<Request, ErrorKind> {
        decode_with(raw, &ReqLimits::default(), false)
    }

    fn decode_with(raw: &str, limits: &ReqLimits, trust: bool) -> Result<Request, ErrorKind> {
        Request::decode(
            raw.as_bytes(),
            "10.0.0.7:5555".parse().unwrap(),
            limits,
            trust,
        )
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = [
            ("GET / HTTP/1.1\r\n\r\n",                      Method::Get,    "/",           Version::Http11, 0),
            ("GET /api/users/7 HTTP/1.0\r\n\r\n",           Method::Get,    "/api/users/7", Version::Http10, 0),
            ("POST /upload?x=1 HTTP/1.1\r\nContent-Length: 13\r\n\r\n",
                                                             Method::Post,   "/upload",     Version::Http11, 13),
            ("DELETE /a HTTP/1.1\r\ncontent-length:  4 \r\n\r\n",
                                                             Method::Delete, "/a",          Version::Http11, 4),
            ("PUT /a HTTP/1.1\r\nContent-Length: x\r\n\r\n", Method::Put,    "/a",          Version::Http11, 0),
            ("OPTIONS * HTTP/1.1\r\n\r\n",                   Method::Options, "*",          Version::Http11, 0),
        ];

        for (raw, method, path, version, content_length) in cases {
            let req = decode(raw).unwrap();

            assert_eq!(req.method(), method, "{raw:?}");
            assert_eq!(req.path(), path, "{raw:?}");
            assert_eq!(req.version(), version, "{raw:?}");
            assert_eq!(req.content_length(), content_length, "{raw:?}");
        }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = [
            ("\r\n\r\n",                         ErrorKind::BadRequest),
            ("GET\r\n\r\n",                      ErrorKind::BadRequest),
            ("GET /\r\n\r\n",                    ErrorKind::BadRequest),
            ("GET / HTTP/1.1 extra\r\n\r\n",     ErrorKind::BadRequest),
            (" GET / HTTP/1.1\r\n\r\n",          ErrorKind::BadRequest),
            ("GET api HTTP/1.1\r\n\r\n",         ErrorKind::BadRequest),
            ("FETCH / HTTP/1.1\r\n\r\n",         ErrorKind::InvalidMethod),
            ("GET / HTTP/2\r\n\r\n",             ErrorKind::UnsupportedVersion),
            ("GET / SPDY\r\n\r\n",               ErrorKind::BadRequest),
        ];

        for (raw, expected) in cases {
            assert_eq!(decode(raw).unwrap_err(), expected, "{raw:?}");
        }

        let invalid_utf8 = b"GET /\xFF HTTP/1.1\r\n\r\n";
        assert_eq!(
            Request::decode(invalid_utf8, "10.0.0.7:1".parse().unwrap(), &ReqLimits::default(), false)
                .unwrap_err(),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn parse_headers() {
        let req = decode(
            "GET / HTTP/1.1\r\nHost: example.com\r\nX-Empty:\r\nno colon here\r\nX-Spaced:    value  \r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.headers().len(), 3);
        assert_eq!(req.header("host"), Some("example.com"));
        assert_eq!(req.header("HOST"), Some("example.com"));
        assert_eq!(req.headers()[0].name, "Host");
        assert_eq!(req.header("x-empty"), Some(""));
        assert_eq!(req.header("x-spaced"), Some("value  "));
        assert_eq!(req.header("missing"), None);
    }

    #[test]
    fn header_limit_truncates() {
        let limits = ReqLimits {
            max_headers: 2,
            ..ReqLimits::default()
        };
        let req = decode_with("GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n", &limits, false).unwrap();

        assert_eq!(req.headers().len(), 2);
        assert_eq!(req.header("c"), None);
    }

    #[test]
    fn query_and_cookies() {
        let req = decode(
            "GET /search?q=rust&page=2&flag&q=web HTTP/1.1\r\nCookie: sid=abc; theme=dark\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.path(), "/search");
        assert_eq!(req.query("q"), Some("rust"));
        assert_eq!(req.query("page"), Some("2"));
        assert_eq!(req.query("flag"), None);
        assert_eq!(req.query_pairs().len(), 3);

        assert_eq!(req.cookie("sid"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookies().len(), 2);
    }

    #[test]
    fn client_ip() {
        let raw = "GET / HTTP/1.1\r\nX-Forwarded-For: 203.0.113.9, 10.0.0.1\r\n\r\n";

        assert_eq!(decode(raw).unwrap().client_ip(), "10.0.0.7");
        assert_eq!(
            decode_with(raw, &ReqLimits::default(), true).unwrap().client_ip(),
            "203.0.113.9"
        );
        assert_eq!(
            decode_with("GET / HTTP/1.1\r\n\r\n", &ReqLimits::default(), true)
                .unwrap()
                .client_ip(),
            "10.0.0.7"
        );
    }

    #[test]
    fn body_and_context() {
        let mut req = Request::parse("POST /j HTTP/1.1\r\nContent-Length: 11\r\n\r\n{\"a\": true}");

        assert_eq!(req.body_str(), Some("{\"a\": true}"));
        let value: serde_json::Value = req.json().unwrap();
        assert_eq!(value["a"], true);

        assert!(req.context::<u32>().is_none());
        req.set_context(41u32);
        *req.context_mut::<u32>().unwrap() += 1;
        assert_eq!(req.context::<u32>(), Some(&42));
        assert!(req.context::<String>().is_none());

        assert_eq!(req.error(), None);
        req.set_error("boom");
        assert_eq!(req.error(), Some("boom"));
    }
}
