//! Request pipeline: an ordered chain of [`Middleware`] run before the route
//! handler, plus the two built-in ones, [`RateLimiter`] and [`Recovery`].

use crate::{server::server_impl::DynHandler, Request, Response, StatusCode};
use futures_util::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe};

mod rate_limit;
mod recovery;

pub use rate_limit::RateLimiter;
pub use recovery::Recovery;

/// Outcome of a [`Middleware`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next middleware, or the handler after the last one.
    Continue,
    /// Send the current response right away; nothing else runs.
    Abort,
}

/// A step run for every routed request, in registration order.
///
/// The response slot starts as an empty `200 OK`. A middleware that aborts
/// fills it in; one that continues may add headers, which are carried over
/// to the handler's response.
///
/// Closures with the matching signature are middleware too.
///
/// # Examples
/// ```
/// use ember_web::{Flow, Middleware, Request, Response, StatusCode};
///
/// struct ApiKey(&'static str);
///
/// impl Middleware for ApiKey {
///     fn handle(&self, req: &mut Request, resp: &mut Response) -> Flow {
///         if req.header("x-api-key") == Some(self.0) {
///             return Flow::Continue;
///         }
///
///         *resp = Response::error(StatusCode::Unauthorized, "unauthorized");
///         Flow::Abort
///     }
/// }
///
/// let powered_by = |_: &mut Request, resp: &mut Response| {
///     resp.set_header("x-powered-by", "ember_web");
///     Flow::Continue
/// };
/// # let _ = (ApiKey("secret"), powered_by);
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, request: &mut Request, response: &mut Response) -> Flow;
}

impl<F> Middleware for F
where
    F: Fn(&mut Request, &mut Response) -> Flow + Send + Sync + 'static,
{
    #[inline]
    fn handle(&self, request: &mut Request, response: &mut Response) -> Flow {
        self(request, response)
    }
}

#[derive(Default)]
pub(crate) struct Pipeline {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl Pipeline {
    #[inline]
    pub(crate) fn push(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Runs the chain and then the handler.
    ///
    /// Once a middleware arms the request's recovery flag, everything after
    /// it runs inside a panic boundary that turns a panic into a `500`.
    pub(crate) async fn run(&self, handler: &dyn DynHandler, request: &mut Request) -> Response {
        let mut slot = Response::new(StatusCode::Ok);

        for (index, middleware) in self.middlewares.iter().enumerate() {
            if middleware.handle(request, &mut slot) == Flow::Abort {
                return slot;
            }

            if request.recovery_armed {
                let rest = &self.middlewares[index + 1..];
                let outcome = AssertUnwindSafe(finish(rest, handler, request, slot))
                    .catch_unwind()
                    .await;

                return outcome.unwrap_or_else(|payload| {
                    tracing::error!(
                        method = %request.method(),
                        path = request.path(),
                        panic = panic_message(payload.as_ref()),
                        "recovered from panic"
                    );
                    Response::error(StatusCode::InternalServerError, "internal server error")
                });
            }
        }

        finish(&[], handler, request, slot).await
    }
}

async fn finish(
    middlewares: &[Box<dyn Middleware>],
    handler: &dyn DynHandler,
    request: &mut Request,
    mut slot: Response,
) -> Response {
    for middleware in middlewares {
        if middleware.handle(request, &mut slot) == Flow::Abort {
            return slot;
        }
    }

    request.handler_invoked = true;
    let mut response = handler.call(request).await;
    response.inherit_headers(slot);
    response
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn pipeline(middlewares: Vec<Box<dyn Middleware>>) -> Pipeline {
        Pipeline { middlewares }
    }

    fn ok_handler() -> impl DynHandler {
        |_: &mut Request| Response::text(StatusCode::Ok, "handled")
    }

    fn request() -> Request {
        Request::parse("GET /items HTTP/1.1\r\n\r\n")
    }

    #[tokio::test]
    async fn continue_reaches_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let pipeline = pipeline(vec![
            Box::new(move |_: &mut Request, _: &mut Response| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            }),
            Box::new(|_: &mut Request, resp: &mut Response| {
                resp.set_header("x-trace", "abc");
                Flow::Continue
            }),
        ]);

        let mut req = request();
        let resp = pipeline.run(&ok_handler(), &mut req).await;

        assert!(req.handler_invoked);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(resp.body(), b"handled");
        let head = resp.encode_head(None);
        assert!(String::from_utf8_lossy(&head).contains("x-trace: abc\r\n"));
    }

    #[tokio::test]
    async fn abort_skips_rest() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();

        let pipeline = pipeline(vec![
            Box::new(|_: &mut Request, resp: &mut Response| {
                *resp = Response::error(StatusCode::Forbidden, "forbidden");
                Flow::Abort
            }),
            Box::new(move |_: &mut Request, _: &mut Response| {
                counter.fetch_add(1, Ordering::SeqCst);
                Flow::Continue
            }),
        ]);

        let mut req = request();
        let resp = pipeline.run(&ok_handler(), &mut req).await;

        assert_eq!(resp.status(), StatusCode::Forbidden);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert!(!req.handler_invoked);
    }

    #[tokio::test]
    async fn recovery_catches_handler_panic() {
        let pipeline = pipeline(vec![Box::new(Recovery)]);
        let panicking = |_: &mut Request| -> Response { panic!("boom") };

        let mut req = request();
        let resp = pipeline.run(&panicking, &mut req).await;

        assert_eq!(resp.status(), StatusCode::InternalServerError);
        assert_eq!(resp.body(), br#"{"error": "internal server error"}"#);
    }

    #[tokio::test]
    async fn recovery_catches_later_middleware_panic() {
        let pipeline = pipeline(vec![
            Box::new(Recovery),
            Box::new(|_: &mut Request, _: &mut Response| -> Flow { panic!("middleware") }),
        ]);

        let resp = pipeline.run(&ok_handler(), &mut request()).await;
        assert_eq!(resp.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn panic_messages() {
        let text: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7u8);

        assert_eq!(panic_message(text.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
