use super::{Flow, Middleware};
use crate::{http::types::djb2, Request, Response, StatusCode};
use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Fixed-window rate limiter keyed by client IP.
///
/// Clients are hashed into a fixed table of slots (djb2 of the IP modulo the
/// table size). A slot holds a single IP: a different IP hashing to the same
/// slot takes it over and starts from zero. Over the limit, the request is
/// answered with `429 {"error": "too many requests"}`.
///
/// # Examples
/// ```no_run
/// use ember_web::{middleware::RateLimiter, Server};
/// use std::time::Duration;
///
/// # fn main() {
/// // 100 requests per minute per client
/// let builder = Server::builder()
///     .middleware(RateLimiter::new(100, Duration::from_secs(60)).with_table_size(4096));
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    slots: Mutex<Box<[Slot]>>,
}

#[derive(Debug, Clone)]
struct Slot {
    ip: String,
    window_start: Instant,
    requests: u32,
}

impl Default for RateLimiter {
    /// 5 requests per second, 1024 slots.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

impl RateLimiter {
    pub const DEFAULT_TABLE_SIZE: usize = 1024;

    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            slots: Mutex::new(Self::table(Self::DEFAULT_TABLE_SIZE)),
        }
    }

    /// Replaces the slot table; a size of `0` is treated as `1`.
    pub fn with_table_size(mut self, size: usize) -> Self {
        self.slots = Mutex::new(Self::table(size.max(1)));
        self
    }

    fn table(size: usize) -> Box<[Slot]> {
        let now = Instant::now();
        vec![
            Slot {
                ip: String::new(),
                window_start: now,
                requests: 0,
            };
            size
        ]
        .into_boxed_slice()
    }

    /// Counts one request from `ip` at `now`; `false` once over the limit.
    pub(crate) fn check(&self, ip: &str, now: Instant) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let index = djb2(ip.as_bytes()) as usize % slots.len();
        let slot = &mut slots[index];

        if slot.ip != ip {
            slot.ip.clear();
            slot.ip.push_str(ip);
            slot.window_start = now;
            slot.requests = 0;
        } else if now.saturating_duration_since(slot.window_start) >= self.window {
            slot.window_start = now;
            slot.requests = 0;
        }

        slot.requests = slot.requests.saturating_add(1);
        slot.requests <= self.max_requests
    }
}

impl Middleware for RateLimiter {
    fn handle(&self, request: &mut Request, response: &mut Response) -> Flow {
        if self.check(request.client_ip(), Instant::now()) {
            return Flow::Continue;
        }

        tracing::warn!(client = %request.client_ip(), path = request.path(), "rate limit exceeded");
        *response = Response::error(StatusCode::TooManyRequests, "too many requests");
        Flow::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn window() {
        let limiter = RateLimiter::new(3, SECOND);
        let start = Instant::now();

        #[rustfmt::skip]
        let cases = [
            (0,    true),
            (100,  true),
            (200,  true),
            (300,  false),
            (999,  false),
            (1000, true),
            (1001, true),
            (1002, true),
            (1003, false),
        ];

        for (millis, allowed) in cases {
            let now = start + Duration::from_millis(millis);
            assert_eq!(limiter.check("10.0.0.1", now), allowed, "at {millis}ms");
        }
    }

    #[test]
    fn clients_are_independent() {
        let limiter = RateLimiter::new(1, SECOND);
        let now = Instant::now();

        assert!(limiter.check("10.0.0.1", now));
        assert!(!limiter.check("10.0.0.1", now));
        assert!(limiter.check("10.0.0.2", now));
    }

    #[test]
    fn collision_takes_over_slot() {
        let limiter = RateLimiter::new(1, SECOND).with_table_size(1);
        let now = Instant::now();

        assert!(limiter.check("10.0.0.1", now));
        assert!(!limiter.check("10.0.0.1", now));
        // Same slot, new owner: the counter restarts
        assert!(limiter.check("10.0.0.2", now));
        assert!(limiter.check("10.0.0.1", now));
    }

    #[test]
    fn middleware_aborts_with_429() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let mut req = Request::parse("GET / HTTP/1.1\r\n\r\n");
        let mut resp = Response::new(StatusCode::Ok);

        assert_eq!(limiter.handle(&mut req, &mut resp), Flow::Continue);
        assert_eq!(resp.status(), StatusCode::Ok);

        assert_eq!(limiter.handle(&mut req, &mut resp), Flow::Abort);
        assert_eq!(resp.status(), StatusCode::TooManyRequests);
        assert_eq!(resp.body(), br#"{"error": "too many requests"}"#);
    }
}
