use crate::route::Route;
use crate::track::Tracker;
use std::sync::Arc;
use std::time::Instant;

/// Owns one admitted request's active slot and finalizes it exactly once.
///
/// Finalize frees the slot (which pumps the route's queue), and — when the
/// request was actually dispatched to a backend — settles the tracker.
/// Every terminal edge (clean finish, upstream failure, client abort,
/// cancellation) converges here; the `finished` latch makes the second and
/// later arrivals no-ops.
pub struct FlightGuard {
    route: Arc<Route>,
    tracker: Arc<Tracker>,
    vhost: String,
    started_at: Instant,
    dispatched: bool,
    finished: bool,
}

impl FlightGuard {
    /// Takes ownership of an active slot already held on `route`.
    pub fn new(route: Arc<Route>, tracker: Arc<Tracker>, vhost: String, started_at: Instant) -> Self {
        Self {
            route,
            tracker,
            vhost,
            started_at,
            dispatched: false,
            finished: false,
        }
    }

    /// The request is on its way to a backend; stats begin here.
    pub fn dispatched(&mut self) {
        self.tracker.on_start(&self.vhost);
        self.dispatched = true;
    }

    /// Give the slot back without touching stats. Used when no healthy
    /// backend was available: the request never became active for metrics.
    pub fn abandon(mut self) {
        debug_assert!(!self.dispatched);
        self.finish(false);
    }

    pub fn success(&mut self) {
        self.finish(true);
    }

    pub fn failure(&mut self) {
        self.finish(false);
    }

    fn finish(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.dispatched {
            let elapsed_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
            self.tracker.on_end(&self.vhost, success, elapsed_ms);
        }

        // The decrement lands on the exact route object this request was
        // admitted to, even if the router has since replaced it.
        self.route.release();
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if !self.finished {
            // Covers canceled futures, panics, and early returns.
            tracing::warn!(
                vhost = %self.vhost,
                "request finished without explicit completion"
            );
            self.finish(false);
        }
    }
}
