use crate::{http::response::Response, StatusCode};
use std::{io, net::SocketAddr, path::PathBuf};

/// Errors returned while building or starting a [`Server`](crate::Server).
///
/// Per-request failures never surface here: they are answered on the
/// connection that caused them and the server keeps running.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Creating, binding or listening on the socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The listener could not be handed to the runtime or queried.
    #[error("listener error: {0}")]
    Listener(#[source] io::Error),

    /// Neither [`bind`](crate::ServerBuilder::bind) nor
    /// [`listener`](crate::ServerBuilder::listener) was called.
    #[error("the `bind` or `listener` method must be called before `build`")]
    MissingListener,

    /// [`ServerLimits::max_connections`](crate::limits::ServerLimits::max_connections)
    /// is zero or above what the admission gate can count.
    #[error("max_connections must be between 1 and {max}, got {value}")]
    MaxConnections { value: usize, max: usize },

    /// A translation directory or file could not be read or parsed.
    #[error("failed to load translations from {path}: {reason}")]
    Translations { path: PathBuf, reason: String },
}

/// Per-request failures, each mapped to the response sent before closing.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    BadRequest,
    InvalidMethod,
    UnsupportedVersion,

    HeadersTooLarge,
    BodyTooLarge,

    Timeout,
    ConnectionClosed,

    NotFound,
    Upload,

    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $json:literal; )*) => {
        /// Returns the status and JSON body sent for this error, or `None`
        /// when the connection is closed without a response.
        pub(crate) const fn as_http(&self) -> Option<(StatusCode, &'static str)> {
            match self {
                $( Self::$name { .. } => Some((StatusCode::$status, $json)), )*
                Self::ConnectionClosed | Self::Io(_) => None,
            }
        }
    };
}

impl ErrorKind {
    http_errors! {
        BadRequest: BadRequest => r#"{"error": "bad request"}"#;
        InvalidMethod: BadRequest => r#"{"error": "invalid method"}"#;
        UnsupportedVersion: HttpVersionNotSupported => r#"{"error": "http version not supported"}"#;

        HeadersTooLarge: RequestHeaderFieldsTooLarge => r#"{"error": "request headers too large"}"#;
        BodyTooLarge: PayloadTooLarge => r#"{"error": "request body too large"}"#;

        Timeout: RequestTimeout => r#"{"error": "read timeout"}"#;

        NotFound: NotFound => r#"{"error": "not found"}"#;
        Upload: InternalServerError => r#"{"error": "upload failed"}"#;
    }

    #[inline]
    pub(crate) fn into_response(self) -> Option<Response> {
        self.as_http()
            .map(|(status, json)| Response::json(status, json))
    }
}

impl std::error::Error for ErrorKind {}
impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionClosed,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
