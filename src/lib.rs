//! ember_web - embeddable HTTP/1.1 server engine
//!
//! A small server to build JSON APIs on: templated routes, a middleware
//! pipeline, CORS, per-client rate limiting, panic recovery, streamed file
//! uploads, per-day access logs, and JSON body validation with translated
//! messages.
//!
//! # Model
//!
//! - **One request per connection** - every response carries
//!   `Connection: close`; there is no keep-alive and no chunked encoding
//! - **One task per connection** - admission is bounded by
//!   [`ServerLimits::max_connections`](limits::ServerLimits::max_connections)
//! - **Pipeline** - middleware run in registration order, then the first
//!   matching route; a middleware may answer on its own with [`Flow::Abort`]
//! - **Uploads** - any typed, non-JSON body is streamed to a file instead of
//!   memory, see [`Request::upload`]
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use ember_web::{Method, Request, Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_web::Error> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .route(Method::Get, "/", |_: &mut Request| {
//!             Response::text(StatusCode::Ok, "Hello world!")
//!         })
//!         .build()?
//!         .launch()
//!         .await;
//!
//!     Ok(())
//! }
//! ```
//! Something in between :) :
//! ```no_run
//! use ember_web::{
//!     middleware::{RateLimiter, Recovery},
//!     Cors, Method, Request, Response, Server, StatusCode,
//! };
//! use std::time::Duration;
//!
//! fn user(req: &mut Request) -> Response {
//!     match req.param("id").and_then(|id| id.parse::<u32>().ok()) {
//!         Some(id) => Response::json(StatusCode::Ok, format!(r#"{{"id": {id}}}"#)),
//!         None => Response::error(StatusCode::BadRequest, "invalid id"),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_web::Error> {
//!     Server::builder()
//!         .bind("127.0.0.1:8080".parse().unwrap())
//!         .middleware(Recovery)
//!         .middleware(RateLimiter::new(100, Duration::from_secs(60)))
//!         .cors(Cors::new().allow_origin("http://localhost:3000"))
//!         .group("/api", |api| {
//!             api.route(Method::Get, "/users/{id}", user)
//!                 .route(Method::Get, "/health", |_: &mut Request| Response::no_content())
//!         })
//!         .build()?
//!         .launch()
//!         .await;
//!
//!     Ok(())
//! }
//! ```
//! Advanced configuration:
//! ```no_run
//! use ember_web::{
//!     limits::{ConnLimits, ReqLimits, ServerLimits},
//!     AccessLog, Method, Request, Response, Server,
//! };
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_web::Error> {
//!     Server::builder()
//!         .bind("0.0.0.0:8080".parse().unwrap())
//!         .route(Method::Get, "/", |_: &mut Request| Response::no_content())
//!         .access_log(AccessLog::new("logs"))
//!         .server_limits(ServerLimits {
//!             max_connections: 1024,     // Higher concurrency
//!             trust_forwarded_for: true, // Behind a reverse proxy
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             buffer_size: 64 * 1024, // Larger in-memory bodies
//!             upload_dir: "/var/tmp/uploads".into(),
//!             ..ReqLimits::default()
//!         })
//!         .build()?
//!         .launch_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! Events are emitted with [`tracing`]; install any subscriber to see them.
//! Startup is `info`, per-request summaries are `debug`, rate limiting and
//! accept failures are `warn`, recovered panics and upload failures are
//! `error`.

pub(crate) mod http {
    pub mod query;
    pub(crate) mod reader;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod access_log;
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub(crate) mod cors;
pub(crate) mod errors;
pub(crate) mod router;

pub mod i18n;
pub mod limits;
pub mod media;
pub mod middleware;
pub mod validation;

pub use crate::{
    cors::Cors,
    errors::Error,
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Response,
        },
        types::{mime, Header, Method, StatusCode, Version},
    },
    i18n::Translations,
    media::Upload,
    middleware::{Flow, Middleware},
    router::RouteGroup,
    server::{
        access_log::AccessLog,
        server_impl::{Handler, Server, ServerBuilder},
    },
    validation::{Field, Schema},
};
