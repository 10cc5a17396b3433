use super::{Flow, Middleware};
use crate::{Request, Response};

/// Turns a panic in any later middleware or in the handler into
/// `500 {"error": "internal server error"}`.
///
/// Register it first to cover the whole chain. Without it, a panic only
/// drops the connection it happened on.
///
/// # Examples
/// ```no_run
/// use ember_web::{middleware::Recovery, Server};
///
/// # fn main() {
/// let builder = Server::builder().middleware(Recovery);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Recovery;

impl Middleware for Recovery {
    #[inline]
    fn handle(&self, request: &mut Request, _: &mut Response) -> Flow {
        request.recovery_armed = true;
        Flow::Continue
    }
}
