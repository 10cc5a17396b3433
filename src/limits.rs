//! Server configuration limits and timeouts
//!
//! Every struct here follows the same pattern: public fields with documented
//! defaults, an [`Default`] implementation, and a hidden `_priv` field that
//! forces callers to finish struct literals with `..Default::default()`.
//!
//! # Examples
//!
//! ```no_run
//! use ember_web::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_web::Error> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .server_limits(ServerLimits {
//!             max_connections: 1024, // More concurrent clients
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             buffer_size: 64 * 1024, // Larger JSON bodies
//!             ..ReqLimits::default()
//!         })
//!         .build()?
//!         .launch()
//!         .await;
//!
//!     Ok(())
//! }
//! ```

use std::{path::PathBuf, time::Duration};

/// Controls admission and listener behaviour.
///
/// # Connection management
/// ```text
///   [--------------]        [------------]        [------------------]
///   [ Wait permit  ] =====> [ Tcp accept ] =====> [ Spawn connection ]
///   [--------------]        [------------]        [------------------]
///          /\                                              ||
///          ||                 permit dropped               ||
///          \\==============================================//
/// ```
///
/// The accept loop only calls `accept` after taking a permit, so at most
/// `max_connections` connections are handled at once. Further clients wait
/// in the kernel backlog instead of being polled for.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of connections handled concurrently (default: `255`).
    ///
    /// Must be at least 1; [`build`](crate::ServerBuilder::build) rejects 0
    /// and values the admission gate cannot count with
    /// [`Error::MaxConnections`](crate::Error::MaxConnections).
    pub max_connections: usize,

    /// Listen backlog passed to the socket when the server binds itself
    /// with [`bind`](crate::ServerBuilder::bind) (default: `128`).
    pub backlog: u32,

    /// Maximum number of registered middlewares (default: `32`).
    ///
    /// Middlewares registered after the limit is reached are dropped with a
    /// warning when the server is built.
    pub max_middlewares: usize,

    /// Take the client IP from the first `X-Forwarded-For` entry when the
    /// header is present (default: `false`).
    ///
    /// Only enable this behind a proxy you control: the header is supplied by
    /// the client and affects [`RateLimiter`](crate::middleware::RateLimiter)
    /// keys and access log lines.
    pub trust_forwarded_for: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 255,
            backlog: 128,
            max_middlewares: 32,
            trust_forwarded_for: false,

            _priv: (),
        }
    }
}

/// Connection-level timeouts
///
/// Each connection carries exactly one request, so these bound the whole
/// lifetime of a client on the server.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to wait for the first bytes of a request (default: `90 seconds`)
    ///
    /// A client that connects and stays silent is answered with
    /// `408 Request Timeout` once this elapses.
    pub idle_timeout: Duration,

    /// Maximum time a single socket read may take once the request has
    /// started (default: `300 seconds`)
    ///
    /// Applies to the header block, the in-memory body and every chunk of a
    /// streamed upload.
    pub read_timeout: Duration,

    /// Maximum time a single socket write may take (default: `300 seconds`)
    pub write_timeout: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(90),
            read_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(300),

            _priv: (),
        }
    }
}

/// HTTP request parsing limits
///
/// # Memory
///
/// Each connection allocates one read buffer of `buffer_size` bytes. The
/// header block and any in-memory body must fit in it together:
///
/// ```text
/// | request line | headers ... | \r\n\r\n | body (Content-Length) |
/// |<------------------------ buffer_size ------------------------>|
/// ```
///
/// Non-JSON bodies do not count against the buffer: they are streamed to a
/// temporary file in chunks of `file_chunk` bytes.
///
/// # Counts
///
/// The `max_*` fields cap how many items are kept. Extra headers, cookies and
/// query parameters are ignored; a route template with more placeholders than
/// `max_params` never matches.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Size of the per-connection read buffer (default: `16 KB`)
    ///
    /// A header block that does not fit is answered with `431`, a body that
    /// does not fit with `413`.
    pub buffer_size: usize,

    /// Maximum number of headers kept per request (default: `128`)
    pub max_headers: usize,
    /// Maximum number of path parameters captured per route (default: `64`)
    pub max_params: usize,
    /// Maximum number of cookies kept per request (default: `64`)
    pub max_cookies: usize,
    /// Maximum number of query parameters kept per request (default: `64`)
    pub max_query_params: usize,

    /// Directory for streamed uploads (default: [`std::env::temp_dir`])
    pub upload_dir: PathBuf,
    /// Chunk size used while streaming an upload to disk (default: `64 KB`)
    pub file_chunk: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,

            max_headers: 128,
            max_params: 64,
            max_cookies: 64,
            max_query_params: 64,

            upload_dir: std::env::temp_dir(),
            file_chunk: 64 * 1024,

            _priv: (),
        }
    }
}
