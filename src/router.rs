use crate::{server::server_impl::DynHandler, Handler, Method};
use std::sync::Arc;

pub(crate) struct Route {
    method: Method,
    template: String,
    handler: Arc<dyn DynHandler>,
}

/// Ordered route table. The first registered match wins.
#[derive(Default)]
pub(crate) struct Router {
    routes: Vec<Route>,
}

impl Router {
    #[inline]
    pub(crate) fn add(&mut self, method: Method, template: String, handler: Arc<dyn DynHandler>) {
        self.routes.push(Route {
            method,
            template,
            handler,
        });
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }

    /// Finds the handler for `method` and `path`, appending the captured
    /// parameters to `params`.
    pub(crate) fn find(
        &self,
        method: Method,
        path: &str,
        max_params: usize,
        params: &mut Vec<(String, String)>,
    ) -> Option<&Arc<dyn DynHandler>> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find(|route| {
                params.clear();
                match_template(&route.template, path, max_params, params)
            })
            .map(|route| &route.handler)
    }
}

/// Walks `template` and `path` together. A `{name}` placeholder takes the
/// path up to the next `/` (possibly nothing).
pub(crate) fn match_template(
    template: &str,
    path: &str,
    max_params: usize,
    params: &mut Vec<(String, String)>,
) -> bool {
    let (template, path) = (template.as_bytes(), path.as_bytes());
    let (mut t, mut p) = (0, 0);

    while t < template.len() {
        if template[t] == b'{' {
            let Some(close) = memchr::memchr(b'}', &template[t..]) else {
                return false;
            };
            if params.len() >= max_params {
                return false;
            }

            let start = p;
            p += memchr::memchr(b'/', &path[p..]).unwrap_or(path.len() - p);

            params.push((
                String::from_utf8_lossy(&template[t + 1..t + close]).into_owned(),
                String::from_utf8_lossy(&path[start..p]).into_owned(),
            ));
            t += close + 1;
        } else {
            if p == path.len() || template[t] != path[p] {
                return false;
            }
            t += 1;
            p += 1;
        }
    }

    t == template.len() && p == path.len()
}

/// A set of routes sharing a path prefix, see
/// [`ServerBuilder::group`](crate::ServerBuilder::group).
///
/// # Examples
/// ```no_run
/// use ember_web::{Method, Request, Response, Server, StatusCode};
///
/// # fn main() {
/// let builder = Server::builder().group("/api", |api| {
///     api.route(Method::Get, "/health", |_: &mut Request| {
///         Response::text(StatusCode::Ok, "ok")
///     })
///     .group("/v1", |v1| {
///         // GET /api/v1/users/{id}
///         v1.route(Method::Get, "/users/{id}", |req: &mut Request| {
///             Response::text(StatusCode::Ok, req.param("id").unwrap_or_default().to_owned())
///         })
///     })
/// });
/// # }
/// ```
pub struct RouteGroup {
    prefix: String,
    pub(crate) routes: Vec<(Method, String, Arc<dyn DynHandler>)>,
}

impl RouteGroup {
    #[inline]
    pub(crate) fn new(prefix: String) -> Self {
        Self {
            prefix,
            routes: Vec::new(),
        }
    }

    /// Registers a route under this group's prefix.
    pub fn route<H: Handler>(mut self, method: Method, template: &str, handler: H) -> Self {
        let handler: Arc<dyn DynHandler> = Arc::new(handler);
        self.routes
            .push((method, format!("{}{template}", self.prefix), handler));
        self
    }

    /// Nests another group; its prefix is appended to this one.
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(RouteGroup) -> RouteGroup,
    {
        let nested = build(RouteGroup::new(format!("{}{prefix}", self.prefix)));
        self.routes.extend(nested.routes);
        self
    }
}
