use crate::{
    cors::Cors,
    errors::Error,
    limits::{ConnLimits, ReqLimits, ServerLimits},
    middleware::{Middleware, Pipeline},
    router::{RouteGroup, Router},
    server::{
        access_log::{AccessLog, AccessLogger},
        connection,
    },
    Method, Request, Response,
};
use futures_util::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, info, warn};

/// A trait for handling routed HTTP requests.
///
/// The request is passed by mutable reference: middleware may already have
/// stored data in it with [`set_context`](Request::set_context), and the
/// handler may take it back out.
///
/// Plain functions and closures taking `&mut Request` and returning a
/// [`Response`] are handlers. For asynchronous work, implement the trait
/// with an `async fn`.
///
/// # Examples
///
/// Closure handler
/// ```
/// use ember_web::{Method, Request, Response, Server, StatusCode};
///
/// let builder = Server::builder().route(Method::Get, "/hello/{name}", |req: &mut Request| {
///     let name = req.param("name").unwrap_or("world");
///     Response::text(StatusCode::Ok, format!("Hello, {name}!"))
/// });
/// ```
/// Asynchronous handler with shared state
/// ```
/// use ember_web::{Handler, Request, Response, StatusCode};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     async fn handle(&self, _: &mut Request) -> Response {
///         let n = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///         Response::text(StatusCode::Ok, n)
///     }
/// }
/// ```
pub trait Handler
where
    Self: Send + Sync + 'static,
{
    /// Produces the response for a request.
    ///
    /// A panic here drops the connection without a response, unless
    /// [`Recovery`](crate::middleware::Recovery) is registered.
    fn handle(&self, request: &mut Request) -> impl Future<Output = Response> + Send;
}

impl<F> Handler for F
where
    F: Fn(&mut Request) -> Response + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &mut Request) -> impl Future<Output = Response> + Send {
        std::future::ready(self(request))
    }
}

/// Object-safe form of [`Handler`], stored in the route table.
pub(crate) trait DynHandler: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Response>;
}

impl<H: Handler> DynHandler for H {
    #[inline]
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Response> {
        Box::pin(self.handle(request))
    }
}

/// Everything a connection task needs, shared by all of them.
pub(crate) struct Shared {
    pub(crate) router: Router,
    pub(crate) pipeline: Pipeline,
    pub(crate) cors: Option<Cors>,
    pub(crate) access_log: Option<AccessLogger>,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
}

/// An HTTP server handling one request per connection, each connection on
/// its own task.
///
/// # Examples
///
/// ```no_run
/// use ember_web::{Method, Request, Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ember_web::Error> {
///     Server::builder()
///         .bind("127.0.0.1:8080".parse().unwrap())
///         .route(Method::Get, "/", |_: &mut Request| {
///             Response::text(StatusCode::Ok, "Hello world!")
///         })
///         .build()?
///         .launch()
///         .await;
///
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    shared: Arc<Shared>,
    gate: Arc<Semaphore>,
    live: Arc<AtomicUsize>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::Listener)
    }

    /// Number of connections currently being handled.
    #[inline]
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Accepts connections until the process ends.
    #[inline]
    pub async fn launch(self) {
        self.launch_until(std::future::pending()).await
    }

    /// Accepts connections until `signal` completes, then waits for the
    /// connections in flight to finish.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_web::{Method, Request, Response, Server, StatusCode};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), ember_web::Error> {
    ///     Server::builder()
    ///         .bind("127.0.0.1:8080".parse().unwrap())
    ///         .route(Method::Get, "/", |_: &mut Request| Response::no_content())
    ///         .build()?
    ///         .launch_until(async {
    ///             let _ = tokio::signal::ctrl_c().await;
    ///         })
    ///         .await;
    ///
    ///     Ok(())
    /// }
    /// ```
    pub async fn launch_until<F: Future<Output = ()>>(self, signal: F) {
        info!(
            addr = ?self.listener.local_addr().ok(),
            routes = self.shared.router.len(),
            middlewares = self.shared.pipeline.len(),
            max_connections = self.shared.server_limits.max_connections,
            "server started"
        );

        tokio::pin!(signal);
        loop {
            tokio::select! {
                biased;

                _ = &mut signal => break,
                accepted = self.accept() => {
                    if let Some((stream, addr, permit)) = accepted {
                        self.spawn_connection(stream, addr, permit);
                    }
                }
            }
        }

        info!(live = self.live_connections(), "shutting down, draining connections");
        let all = u32::try_from(self.shared.server_limits.max_connections).unwrap_or(u32::MAX);
        let _ = self.gate.acquire_many(all).await;
        info!("server stopped");
    }

    /// Waits for a free slot, then for a client.
    async fn accept(&self) -> Option<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
        let permit = self.gate.clone().acquire_owned().await.ok()?;

        match self.listener.accept().await {
            Ok((stream, addr)) => Some((stream, addr, permit)),
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                // Back off on persistent errors such as descriptor exhaustion
                tokio::time::sleep(Duration::from_millis(10)).await;
                None
            }
        }
    }

    #[inline]
    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let shared = self.shared.clone();
        let guard = LiveGuard::new(self.live.clone());

        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;

            connection::serve(stream, addr, &shared).await;
        });
    }
}

/// Keeps the live-connection counter in step with connection tasks, even
/// when one unwinds.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    #[inline]
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self(live)
    }
}

impl Drop for LiveGuard {
    #[inline]
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
///
/// Exactly one of [`bind`](Self::bind) or [`listener`](Self::listener) is
/// required. Everything else is optional.
#[derive(Default)]
pub struct ServerBuilder {
    bind: Option<SocketAddr>,
    listener: Option<TcpListener>,

    router: Router,
    middlewares: Vec<Box<dyn Middleware>>,
    cors: Option<Cors>,
    access_log: Option<AccessLog>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl ServerBuilder {
    /// Binds a new listener on `addr` when [`build`](Self::build) runs, with
    /// `SO_REUSEADDR` and a backlog of
    /// [`ServerLimits::backlog`](crate::limits::ServerLimits::backlog).
    #[inline(always)]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// Uses an already bound listener; takes precedence over [`bind`](Self::bind).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_web::Server;
    /// use tokio::net::TcpListener;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let server = Server::builder()
    ///         .listener(TcpListener::bind("127.0.0.1:0").await?)
    ///         .build()?;
    ///
    ///     println!("listening on {}", server.local_addr()?);
    ///     server.launch().await;
    ///     Ok(())
    /// }
    /// ```
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Registers a route.
    ///
    /// `template` is matched against the whole path; `{name}` segments
    /// capture up to the next `/`, see [`Request::param`]. Routes are tried
    /// in registration order and the first match wins.
    #[inline]
    pub fn route<H: Handler>(mut self, method: Method, template: &str, handler: H) -> Self {
        self.router
            .add(method, template.to_owned(), Arc::new(handler));
        self
    }

    /// Registers routes sharing a path prefix, see [`RouteGroup`].
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(RouteGroup) -> RouteGroup,
    {
        for (method, template, handler) in build(RouteGroup::new(prefix.to_owned())).routes {
            self.router.add(method, template, handler);
        }
        self
    }

    /// Appends a middleware to the pipeline.
    ///
    /// At most [`ServerLimits::max_middlewares`](crate::limits::ServerLimits::max_middlewares)
    /// are kept.
    #[inline]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    #[inline(always)]
    pub fn cors(mut self, cors: Cors) -> Self {
        self.cors = Some(cors);
        self
    }

    #[inline(always)]
    pub fn access_log(mut self, log: AccessLog) -> Self {
        self.access_log = Some(log);
        self
    }

    /// Configures admission and listener limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_web::{limits::ServerLimits, Server};
    ///
    /// let builder = Server::builder().server_limits(ServerLimits {
    ///     max_connections: 2500,
    ///     backlog: 1024,
    ///     ..ServerLimits::default() // Required line
    /// });
    /// ```
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection timeouts.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_web::{limits::ConnLimits, Server};
    /// use std::time::Duration;
    ///
    /// let builder = Server::builder().connection_limits(ConnLimits {
    ///     idle_timeout: Duration::from_secs(10),
    ///     read_timeout: Duration::from_secs(5),
    ///     ..ConnLimits::default() // Required line
    /// });
    /// ```
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ember_web::{limits::ReqLimits, Server};
    ///
    /// let builder = Server::builder().request_limits(ReqLimits {
    ///     buffer_size: 64 * 1024,
    ///     upload_dir: "/var/tmp/uploads".into(),
    ///     ..ReqLimits::default() // Required line
    /// });
    /// ```
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingListener`] if neither `bind` nor `listener` was called
    /// - [`Error::MaxConnections`] if `max_connections` is zero or too large
    /// - [`Error::Bind`] if the socket could not be bound
    /// - [`Error::Listener`] if the socket could not be registered with the runtime
    pub fn build(self) -> Result<Server, Error> {
        let server_limits = self.server_limits.unwrap_or_default();

        let max = MAX_CONNECTIONS;
        if !(1..=max).contains(&server_limits.max_connections) {
            return Err(Error::MaxConnections {
                value: server_limits.max_connections,
                max,
            });
        }

        let listener = match (self.listener, self.bind) {
            (Some(listener), _) => listener,
            (None, Some(addr)) => bind_listener(addr, server_limits.backlog)?,
            (None, None) => return Err(Error::MissingListener),
        };

        let mut middlewares = self.middlewares;
        if middlewares.len() > server_limits.max_middlewares {
            warn!(
                registered = middlewares.len(),
                max = server_limits.max_middlewares,
                "too many middlewares, extra ones are ignored"
            );
            middlewares.truncate(server_limits.max_middlewares);
        }

        let mut pipeline = Pipeline::default();
        for middleware in middlewares {
            pipeline.push(middleware);
        }

        debug!(routes = self.router.len(), middlewares = pipeline.len(), "server built");

        Ok(Server {
            listener,
            gate: Arc::new(Semaphore::new(server_limits.max_connections)),
            live: Arc::new(AtomicUsize::new(0)),
            shared: Arc::new(Shared {
                router: self.router,
                pipeline,
                cors: self.cors,
                access_log: self.access_log.map(AccessLog::spawn),

                server_limits,
                conn_limits: self.connection_limits.unwrap_or_default(),
                req_limits: self.request_limits.unwrap_or_default(),
            }),
        })
    }
}

/// Upper bound of the admission gate; draining acquires every permit at once.
const MAX_CONNECTIONS: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, Error> {
    let bind_error = |source| Error::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket
        .listen(i32::try_from(backlog).unwrap_or(i32::MAX))
        .map_err(bind_error)?;
    socket.set_nonblocking(true).map_err(bind_error)?;

    TcpListener::from_std(socket.into()).map_err(Error::Listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{middleware::Flow, StatusCode};

    #[tokio::test]
    async fn build_requires_listener() {
        assert!(matches!(
            Server::builder().build(),
            Err(Error::MissingListener)
        ));
    }

    #[tokio::test]
    async fn max_connections_bounds() {
        let build = |max_connections| {
            Server::builder()
                .bind("127.0.0.1:0".parse().unwrap())
                .server_limits(ServerLimits {
                    max_connections,
                    ..ServerLimits::default()
                })
                .build()
        };

        for value in [0, MAX_CONNECTIONS + 1, usize::MAX] {
            assert!(
                matches!(build(value), Err(Error::MaxConnections { value: v, .. }) if v == value),
                "{value}"
            );
        }
        assert!(build(1).is_ok());
        assert!(build(MAX_CONNECTIONS).is_ok());
    }

    #[tokio::test]
    async fn bind_reports_address() {
        let server = Server::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .build()
            .unwrap();

        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.live_connections(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        assert!(matches!(
            Server::builder().bind(addr).build(),
            Err(Error::Bind { addr: failed, .. }) if failed == addr
        ));
    }

    #[tokio::test]
    async fn middleware_capacity() {
        let mut builder = Server::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .server_limits(ServerLimits {
                max_middlewares: 2,
                ..ServerLimits::default()
            });
        for _ in 0..5 {
            builder = builder.middleware(|_: &mut Request, _: &mut Response| Flow::Continue);
        }

        let server = builder.build().unwrap();
        assert_eq!(server.shared.pipeline.len(), 2);
    }

    #[tokio::test]
    async fn routes_and_groups_registered_in_order() {
        let server = Server::builder()
            .bind("127.0.0.1:0".parse().unwrap())
            .route(Method::Get, "/", |_: &mut Request| Response::no_content())
            .group("/api", |api| {
                api.route(Method::Get, "/a", |_: &mut Request| Response::no_content())
                    .route(Method::Post, "/b", |_: &mut Request| {
                        Response::text(StatusCode::Created, "b")
                    })
            })
            .build()
            .unwrap();

        let mut params = Vec::new();
        let router = &server.shared.router;

        assert_eq!(router.len(), 3);
        assert!(router.find(Method::Get, "/api/a", 64, &mut params).is_some());
        assert!(router.find(Method::Post, "/api/b", 64, &mut params).is_some());
        assert!(router.find(Method::Get, "/a", 64, &mut params).is_none());
    }

    #[test]
    fn live_guard() {
        let live = Arc::new(AtomicUsize::new(0));

        let first = LiveGuard::new(live.clone());
        let second = LiveGuard::new(live.clone());
        assert_eq!(live.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(live.load(Ordering::Acquire), 1);

        let unwound = std::panic::catch_unwind(move || {
            let _guard = second;
            panic!("connection task failed");
        });
        assert!(unwound.is_err());
        assert_eq!(live.load(Ordering::Acquire), 0);
    }
}
