//! HTTP response builder and wire encoder.

use crate::{
    cors::Cors,
    http::types::{djb2, mime, StatusCode},
    media, BodyWriter, WriteBuffer,
};
use serde::Serialize;
use std::{borrow::Cow, io::Write, path::Path, rc::Rc, sync::Arc};

/// HTTP response returned by a [`Handler`](crate::Handler) or written by a
/// [`Middleware`](crate::Middleware).
///
/// A response owns its status, `Content-Type`, extra header lines and body.
/// The server adds `Content-Length`, `ETag`, `Connection: close` and, for an
/// allowed origin, the CORS headers when the response is sent.
///
/// # Examples
/// ```
/// use ember_web::{Response, StatusCode};
///
/// let resp = Response::new(StatusCode::Ok)
///     .content_type("text/html")
///     .header("x-custom-id", 128)
///     .header("x-cache-enabled", true)
///     .with_body("<h1>Hello World</h1>");
///
/// assert_eq!(resp.status(), StatusCode::Ok);
/// assert_eq!(resp.body(), b"<h1>Hello World</h1>");
/// ```
///
/// Helpers cover the common shapes:
/// ```
/// use ember_web::{Response, StatusCode};
///
/// let resp = Response::error(StatusCode::BadRequest, "field 'name' is required");
/// assert_eq!(resp.body(), br#"{"error": "field 'name' is required"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    content_type: Cow<'static, str>,
    headers: Vec<u8>,
    body: Vec<u8>,
}

impl Response {
    /// Empty `text/plain` response with the given status.
    #[inline]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: Cow::Borrowed(mime::TEXT),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets the `Content-Type` header.
    #[inline]
    pub fn content_type<T: Into<Cow<'static, str>>>(mut self, value: T) -> Self {
        self.content_type = value.into();
        self
    }

    /// Adds a header line.
    ///
    /// PLEASE DO NOT ADD THE FOLLOWING HEADINGS:
    /// - `content-type` - use [`content_type()`](Response::content_type)
    /// - `content-length`, `etag`, `connection` - written by the server
    #[inline]
    pub fn header<N: WriteBuffer, V: WriteBuffer>(mut self, name: N, value: V) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replaces the body.
    #[inline]
    pub fn with_body<T: WriteBuffer>(mut self, data: T) -> Self {
        self.set_body(data);
        self
    }

    /// Writes the body via closure, replacing any previous body.
    ///
    /// # Examples
    /// Using [`write!`]:
    /// ```
    /// use ember_web::{Response, StatusCode};
    /// use std::io::Write;
    ///
    /// let resp = Response::new(StatusCode::Ok)
    ///     .content_type("application/json")
    ///     .body_with(|writer| {
    ///         let _ = write!(writer, r#"{{"status": "ok", "count": {}}}"#, 3);
    ///     });
    ///
    /// assert_eq!(resp.body(), br#"{"status": "ok", "count": 3}"#);
    /// ```
    /// Using [`WriteBuffer`]:
    /// ```
    /// use ember_web::{Response, StatusCode};
    ///
    /// let resp = Response::new(StatusCode::Ok).body_with(|writer| {
    ///     writer.write("lib: ");
    ///     writer.write("ember_web");
    ///     writer.write(b", answer: ");
    ///     writer.write(42);
    /// });
    ///
    /// assert_eq!(resp.body(), b"lib: ember_web, answer: 42");
    /// ```
    #[inline]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(mut self, f: F) -> Self {
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self
    }
}

/// In-place mutation, for middleware working on `&mut Response`.
impl Response {
    #[inline]
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn set_content_type<T: Into<Cow<'static, str>>>(&mut self, value: T) -> &mut Self {
        self.content_type = value.into();
        self
    }

    #[inline]
    pub fn set_header<N: WriteBuffer, V: WriteBuffer>(&mut self, name: N, value: V) -> &mut Self {
        name.write_to(&mut self.headers);
        self.headers.extend_from_slice(b": ");
        value.write_to(&mut self.headers);
        self.headers.extend_from_slice(b"\r\n");
        self
    }

    #[inline]
    pub fn set_body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.body.clear();
        data.write_to(&mut self.body);
        self
    }
}

// Helpers
impl Response {
    /// `application/json` response with a pre-serialized body.
    #[inline]
    pub fn json<T: WriteBuffer>(status: StatusCode, body: T) -> Self {
        Self::new(status).content_type(mime::JSON).with_body(body)
    }

    /// `application/json` response serialized with `serde_json`.
    ///
    /// A value that fails to serialize yields `500` with an error body.
    ///
    /// # Examples
    /// ```
    /// use ember_web::{Response, StatusCode};
    ///
    /// let resp = Response::json_value(StatusCode::Created, &serde_json::json!({"id": 7}));
    /// assert_eq!(resp.body(), br#"{"id":7}"#);
    /// ```
    pub fn json_value<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::json(status, body),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize response body");
                Self::error(StatusCode::InternalServerError, "internal server error")
            }
        }
    }

    /// JSON error response: `{"error": "<message>"}`.
    #[inline]
    pub fn error(status: StatusCode, message: &str) -> Self {
        Self::new(status)
            .content_type(mime::JSON)
            .body_with(|writer| {
                writer.write(br#"{"error": "#);
                let _ = serde_json::to_writer(&mut *writer, message);
                writer.write(b"}");
            })
    }

    #[inline]
    pub fn text<T: WriteBuffer>(status: StatusCode, body: T) -> Self {
        Self::new(status).with_body(body)
    }

    #[inline]
    pub fn html<T: WriteBuffer>(status: StatusCode, body: T) -> Self {
        Self::new(status).content_type(mime::HTML).with_body(body)
    }

    /// `204 No Content` with an empty body.
    #[inline]
    pub fn no_content() -> Self {
        Self::new(StatusCode::NoContent)
    }

    /// Serves a file, with the `Content-Type` guessed from its extension.
    ///
    /// A file that cannot be read yields `404` with an error body.
    pub async fn file<P: AsRef<Path>>(status: StatusCode, path: P) -> Self {
        let path = path.as_ref();

        match tokio::fs::read(path).await {
            Ok(body) => Self::new(status)
                .content_type(media::content_type_for_path(path))
                .with_body(body),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "file not served");
                Self::error(StatusCode::NotFound, "not found")
            }
        }
    }
}

// Getters
impl Response {
    #[inline(always)]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    #[inline(always)]
    pub fn mime(&self) -> &str {
        &self.content_type
    }

    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// `ETag` value for the current body: the djb2 hash as 8 hex digits.
    #[inline]
    pub fn etag(&self) -> String {
        format!("\"{:08x}\"", djb2(&self.body))
    }

    /// Puts the header lines of `earlier` (set by middleware) in front of ours.
    #[inline]
    pub(crate) fn inherit_headers(&mut self, earlier: Response) {
        if !earlier.headers.is_empty() {
            let mut headers = earlier.headers;
            headers.append(&mut self.headers);
            self.headers = headers;
        }
    }

    /// Encodes the status line and header block, blank line included.
    pub(crate) fn encode_head(&self, cors: Option<(&Cors, &str)>) -> Vec<u8> {
        let mut head = Vec::with_capacity(128 + self.headers.len());

        head.extend_from_slice(self.status.first_line());
        head.extend_from_slice(b"Content-Type: ");
        head.extend_from_slice(self.content_type.as_bytes());
        head.extend_from_slice(b"\r\nContent-Length: ");
        self.body.len().write_to(&mut head);
        let _ = write!(head, "\r\nETag: \"{:08x}\"\r\n", djb2(&self.body));

        head.extend_from_slice(&self.headers);
        head.extend_from_slice(b"Connection: close\r\n");

        if let Some((cors, origin)) = cors {
            cors.write_headers(origin, &mut head);
        }

        head.extend_from_slice(b"\r\n");
        head
    }
}

#[inline]
const fn number_to_bytes(mut n: u128) -> ([u8; 39], usize) {
    let mut buffer = [b'0'; 39];
    let mut i = 39;

    if n == 0 {
        return (buffer, 38);
    }

    while n > 0 {
        i -= 1;
        buffer[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }

    (buffer, i)
}

pub mod write {
    use super::*;

    /// Writer for constructing a response body.
    /// Used in [body_with](Response::body_with).
    ///
    /// Accepts anything implementing [WriteBuffer], and also implements
    /// [std::io::Write] for `write!` and serializers.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the response body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Trait for writing data to a [`Response`] header or body.
    ///
    /// Implemented for strings, bytes, booleans, `char` and integer types.
    /// Floating-point numbers are left out on purpose; format them to a
    /// string with the precision you need.
    ///
    /// # Example
    /// ```
    /// use ember_web::{Response, StatusCode, WriteBuffer};
    ///
    /// struct UserId(u64);
    ///
    /// impl WriteBuffer for UserId {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         buffer.extend_from_slice(b"user-");
    ///         self.0.write_to(buffer);
    ///     }
    /// }
    ///
    /// let resp = Response::text(StatusCode::Ok, UserId(42));
    /// assert_eq!(resp.body(), b"user-42");
    /// ```
    pub trait WriteBuffer {
        /// Writes the value's representation directly to the buffer.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (bytes, $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let closure = $conn;
                    closure(self, buffer);
                }
            })*
        };
        (number($type:ty), $conn:expr => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    $conn(*self as $type, buffer);
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl_write_buffer! {
        bytes, |value: &str, buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value.as_bytes());
        } => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes, |value: &[u8], buffer: &mut Vec<u8>| {
            buffer.extend_from_slice(value);
        } => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }
    impl_write_buffer! {
        number(u128), write_unsigned => u8, u16, u32, u64, u128, usize
    }
    impl_write_buffer! {
        number(i128), write_signed => i8, i16, i32, i64, i128, isize
    }
    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
    impl WriteBuffer for char {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            let mut buf = [0u8; 4];
            buffer.extend_from_slice(self.encode_utf8(&mut buf).as_bytes());
        }
    }

    #[inline(always)]
    fn write_unsigned(value: u128, buffer: &mut Vec<u8>) {
        let (arr, start) = number_to_bytes(value);
        buffer.extend_from_slice(&arr[start..]);
    }

    #[inline(always)]
    fn write_signed(value: i128, buffer: &mut Vec<u8>) {
        if value < 0 {
            buffer.push(b'-');
        }

        let (arr, start) = number_to_bytes(value.unsigned_abs());
        buffer.extend_from_slice(&arr[start..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_op(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn encode_head() {
        let resp = Response::new(StatusCode::Ok)
            .header("x-id", 7)
            .with_body("Hello, world!");

        assert_eq!(
            str_op(&resp.encode_head(None)),
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 13\r\n\
                 ETag: \"{:08x}\"\r\nx-id: 7\r\nConnection: close\r\n\r\n",
                djb2(b"Hello, world!")
            )
        );
    }

    #[test]
    fn encode_head_with_cors() {
        let cors = Cors::new().allow_origin("https://app.example");
        let resp = Response::no_content();
        let head = resp.encode_head(Some((&cors, "https://app.example")));
        let head = str_op(&head);

        assert!(head.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(head.contains("Content-Length: 0\r\n"));
        assert!(head.contains("Access-Control-Allow-Origin: https://app.example\r\n"));
        assert!(head.contains("Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS\r\n"));
        assert!(head.contains("Access-Control-Allow-Headers: Content-Type\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn etag() {
        let first = Response::text(StatusCode::Ok, "body");
        let same = Response::json(StatusCode::Created, "body");
        let other = Response::text(StatusCode::Ok, "bodz");

        assert_eq!(first.etag(), same.etag());
        assert_ne!(first.etag(), other.etag());
        assert_eq!(first.etag().len(), 10);
        assert_eq!(Response::no_content().etag(), format!("\"{:08x}\"", 5381));
    }

    #[test]
    fn helpers() {
        #[rustfmt::skip]
        let cases = [
            (Response::json(StatusCode::Ok, r#"{"a":1}"#),           200, mime::JSON, r#"{"a":1}"#),
            (Response::error(StatusCode::NotFound, "not found"),     404, mime::JSON, r#"{"error": "not found"}"#),
            (Response::error(StatusCode::BadRequest, "say \"hi\""),  400, mime::JSON, r#"{"error": "say \"hi\""}"#),
            (Response::text(StatusCode::Ok, 42),                     200, mime::TEXT, "42"),
            (Response::html(StatusCode::Ok, "<p>"),                  200, mime::HTML, "<p>"),
            (Response::no_content(),                                 204, mime::TEXT, ""),
        ];

        for (resp, code, content_type, body) in cases {
            assert_eq!(resp.status().as_u16(), code);
            assert_eq!(resp.mime(), content_type);
            assert_eq!(str_op(resp.body()), body);
        }
    }

    #[test]
    fn json_value() {
        #[derive(Serialize)]
        struct User<'a> {
            name: &'a str,
            age: u8,
        }

        let resp = Response::json_value(StatusCode::Created, &User { name: "Ann", age: 30 });
        assert_eq!(resp.status(), StatusCode::Created);
        assert_eq!(str_op(resp.body()), r#"{"name":"Ann","age":30}"#);
    }

    #[test]
    fn in_place_mutation() {
        let mut resp = Response::text(StatusCode::Ok, "first");
        resp.set_status(StatusCode::Accepted)
            .set_content_type(mime::JSON)
            .set_header("x-flag", true)
            .set_body(-12);

        assert_eq!(resp.status(), StatusCode::Accepted);
        assert_eq!(resp.mime(), mime::JSON);
        assert_eq!(resp.body(), b"-12");
        assert!(str_op(&resp.encode_head(None)).contains("x-flag: true\r\n"));
    }

    #[test]
    fn write_buffer_values() {
        #[rustfmt::skip]
        let cases: [(&dyn WriteBuffer, &str); 8] = [
            (&"text",        "text"),
            (&0u8,           "0"),
            (&u128::MAX,     "340282366920938463463374607431768211455"),
            (&i64::MIN,      "-9223372036854775808"),
            (&false,         "false"),
            (&'ж',           "ж"),
            (&[35u8, 33],    "#!"),
            (&vec![43u8],    "+"),
        ];

        for (value, expected) in cases {
            let mut buffer = Vec::new();
            value.write_to(&mut buffer);
            assert_eq!(str_op(&buffer), expected);
        }
    }

    #[tokio::test]
    async fn file() {
        let path = std::env::temp_dir().join(format!("ember_web_{}.html", fastrand::u64(..)));
        tokio::fs::write(&path, "<h1>hi</h1>").await.unwrap();

        let resp = Response::file(StatusCode::Ok, &path).await;
        assert_eq!(resp.status(), StatusCode::Ok);
        assert_eq!(resp.mime(), "text/html");
        assert_eq!(resp.body(), b"<h1>hi</h1>");

        tokio::fs::remove_file(&path).await.unwrap();

        let resp = Response::file(StatusCode::Ok, &path).await;
        assert_eq!(resp.status(), StatusCode::NotFound);
    }
}
