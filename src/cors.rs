/// Cross-origin resource sharing policy.
///
/// When the request's `Origin` header exactly matches one of the allowed
/// origins, every response on that connection carries:
///
/// ```text
/// Access-Control-Allow-Origin: <origin>
/// Access-Control-Allow-Methods: <methods>
/// Access-Control-Allow-Headers: <headers>
/// ```
///
/// `OPTIONS` requests are answered by the server with `204 No Content`
/// before routing, so preflights never reach middleware or handlers.
///
/// # Examples
/// ```
/// use ember_web::Cors;
///
/// let cors = Cors::new()
///     .allow_origin("https://app.example")
///     .methods("GET, POST");
///
/// assert_eq!(cors.allowed_origin(Some("https://app.example")), Some("https://app.example"));
/// assert_eq!(cors.allowed_origin(Some("https://evil.example")), None);
/// assert_eq!(cors.allowed_origin(None), None);
/// ```
#[derive(Debug, Clone)]
pub struct Cors {
    origins: Vec<String>,
    methods: String,
    headers: String,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
            methods: "GET, POST, PUT, DELETE, OPTIONS".to_owned(),
            headers: "Content-Type".to_owned(),
        }
    }
}

impl Cors {
    /// Policy with no allowed origins and the default method and header lists.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an origin; comparison is exact and case-sensitive.
    #[inline]
    pub fn allow_origin<T: Into<String>>(mut self, origin: T) -> Self {
        self.origins.push(origin.into());
        self
    }

    #[inline]
    pub fn methods<T: Into<String>>(mut self, methods: T) -> Self {
        self.methods = methods.into();
        self
    }

    #[inline]
    pub fn headers<T: Into<String>>(mut self, headers: T) -> Self {
        self.headers = headers.into();
        self
    }

    /// Returns the request origin if it is allowed.
    #[inline]
    pub fn allowed_origin<'a>(&self, origin: Option<&'a str>) -> Option<&'a str> {
        origin.filter(|origin| self.origins.iter().any(|allowed| allowed == origin))
    }

    pub(crate) fn write_headers(&self, origin: &str, buffer: &mut Vec<u8>) {
        for (name, value) in [
            ("Access-Control-Allow-Origin", origin),
            ("Access-Control-Allow-Methods", self.methods.as_str()),
            ("Access-Control-Allow-Headers", self.headers.as_str()),
        ] {
            buffer.extend_from_slice(name.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }
    }
}
