use crate::balance::Balancer;
use crate::conf::{BackendConfig, RouteConfig, TlsMaterial};
use arc_swap::ArcSwap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Consecutive failures before a backend is pulled from selection.
pub const QUARANTINE_THRESHOLD: u32 = 3;

/// How often quarantined backends are re-probed.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Budget for one recheck probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Runtime state of one upstream target. Owned and mutated only by its
/// Route; in-flight requests keep plain copies of the address.
#[derive(Debug, Clone)]
pub struct Backend {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub failure_count: u32,
    pub dead_since: Option<Instant>,
}

impl Backend {
    fn from_config(config: &BackendConfig) -> Self {
        Self {
            id: config.id.clone(),
            host: config.host.clone(),
            port: config.port,
            failure_count: 0,
            dead_since: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead_since.is_some()
    }
}

/// The backend chosen for a single dispatch. A plain copy: backend swaps
/// during `update_config` do not affect requests already holding one.
#[derive(Debug, Clone)]
pub struct PickedBackend {
    pub id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default)]
struct Gate {
    active: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

/// Outcome of the admission decision.
pub enum Admission {
    /// An active slot is held; the caller must release it exactly once.
    Ready,
    /// In the FIFO queue. A successful recv means the pump handed over an
    /// active slot; an error means the route went away.
    Queued(oneshot::Receiver<()>),
    /// Both budgets exhausted.
    Shed,
}

/// Runtime mirror of one RouteConfig: admission gate, FIFO queue, backend
/// set with quarantine state, and the periodic recheck task.
///
/// The gate mutex is the serialization point for admission; nothing awaits
/// while it is held.
pub struct Route {
    config: ArcSwap<RouteConfig>,
    balancer: ArcSwap<Balancer>,
    backends: Mutex<Vec<Backend>>,
    gate: Mutex<Gate>,
    recheck: Mutex<Option<JoinHandle<()>>>,
}

impl Route {
    pub fn new(config: RouteConfig) -> Self {
        let backends = config.backends.iter().map(Backend::from_config).collect();
        let balancer = Balancer::for_strategy(config.strategy);
        Self {
            config: ArcSwap::from_pointee(config),
            balancer: ArcSwap::from_pointee(balancer),
            backends: Mutex::new(backends),
            gate: Mutex::new(Gate::default()),
            recheck: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Arc<RouteConfig> {
        self.config.load_full()
    }

    pub fn can_handle(&self) -> bool {
        self.gate.lock().unwrap().active < self.config.load().max_active
    }

    pub fn can_queue(&self) -> bool {
        self.gate.lock().unwrap().queue.len() < self.config.load().max_queued
    }

    pub fn active_requests(&self) -> usize {
        self.gate.lock().unwrap().active
    }

    pub fn queued_requests(&self) -> usize {
        self.gate.lock().unwrap().queue.len()
    }

    /// The admission decision: forward now, wait, or shed. One atomic
    /// region; the check and the slot grab cannot interleave with another
    /// request's.
    pub fn admit(&self) -> Admission {
        let config = self.config.load();
        let mut gate = self.gate.lock().unwrap();
        if gate.active < config.max_active {
            gate.active += 1;
            Admission::Ready
        } else if gate.queue.len() < config.max_queued {
            let (tx, rx) = oneshot::channel();
            gate.queue.push_back(tx);
            Admission::Queued(rx)
        } else {
            Admission::Shed
        }
    }

    /// Free an active slot, then pump the queue while capacity remains.
    /// Waiters are woken in FIFO order on their own scheduler turn; a waiter
    /// whose client already gave up fails the handoff and is skipped.
    pub fn release(&self) {
        let config = self.config.load();
        let mut gate = self.gate.lock().unwrap();
        gate.active = gate.active.saturating_sub(1);
        while gate.active < config.max_active {
            let Some(waiter) = gate.queue.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                gate.active += 1;
            }
        }
    }

    /// Select a live backend for one dispatch, or `None` when every backend
    /// is quarantined (or the route has none).
    pub fn pick(&self, client_ip: Option<IpAddr>) -> Option<PickedBackend> {
        let mut alive: Vec<PickedBackend> = self
            .backends
            .lock()
            .unwrap()
            .iter()
            .filter(|b| !b.is_dead())
            .map(|b| PickedBackend {
                id: b.id.clone(),
                host: b.host.clone(),
                port: b.port,
            })
            .collect();

        if alive.is_empty() {
            return None;
        }

        let ip = client_ip.map(|ip| ip.to_string());
        let idx = self
            .balancer
            .load()
            .pick_index(alive.len(), ip.as_deref().unwrap_or("0.0.0.0"));
        Some(alive.swap_remove(idx))
    }

    /// Credit one failure to a backend; at the threshold the backend is
    /// quarantined. Further failures keep counting but do not move the
    /// quarantine timestamp.
    pub fn mark_failure(&self, backend_id: &str) {
        let mut backends = self.backends.lock().unwrap();
        let Some(backend) = backends.iter_mut().find(|b| b.id == backend_id) else {
            return;
        };

        backend.failure_count += 1;
        if backend.failure_count >= QUARANTINE_THRESHOLD && backend.dead_since.is_none() {
            backend.dead_since = Some(Instant::now());
            tracing::warn!(
                backend = %backend.id,
                failures = backend.failure_count,
                "backend quarantined"
            );
        }
    }

    fn restore(&self, backend_id: &str) {
        let mut backends = self.backends.lock().unwrap();
        let Some(backend) = backends.iter_mut().find(|b| b.id == backend_id) else {
            return;
        };

        backend.failure_count = 0;
        backend.dead_since = None;
        tracing::info!(backend = %backend.id, "backend restored");
    }

    /// Atomically swap in a new config. The backend set is rebuilt (fresh
    /// quarantine state); the gate is untouched, so active requests and the
    /// queue survive. A reduced maxActive can leave the active count
    /// transiently above the limit until natural drainage.
    pub fn update_config(&self, new: RouteConfig) {
        let old = self.config.load();
        if old.strategy != new.strategy {
            self.balancer
                .store(Arc::new(Balancer::for_strategy(new.strategy)));
        }
        *self.backends.lock().unwrap() = new.backends.iter().map(Backend::from_config).collect();
        self.config.store(Arc::new(new));
    }

    /// Replace only the TLS material, leaving backend state alone.
    pub fn set_tls(&self, tls: TlsMaterial) {
        let mut config = (*self.config.load_full()).clone();
        config.tls = Some(tls);
        self.config.store(Arc::new(config));
    }

    pub fn backends(&self) -> Vec<Backend> {
        self.backends.lock().unwrap().clone()
    }

    /// Start the periodic quarantine recheck on the probe runtime. The task
    /// holds only a weak reference, so a dropped route ends it on the next
    /// tick even without `stop`.
    pub fn start_recheck(self: &Arc<Self>, probe: &Handle, client: reqwest::Client) {
        let route = Arc::downgrade(self);
        let handle = probe.spawn(async move {
            let mut interval = tokio::time::interval(RECHECK_INTERVAL);
            // The first tick fires immediately and is not a recheck.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(route) = route.upgrade() else {
                    break;
                };
                route.recheck_quarantined(&client).await;
            }
        });
        *self.recheck.lock().unwrap() = Some(handle);
    }

    /// Cancel the recheck task.
    pub fn stop(&self) {
        if let Some(handle) = self.recheck.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// One GET per quarantined backend. Any HTTP status below 500 restores
    /// the backend; a timeout or connect error leaves it as-is.
    async fn recheck_quarantined(&self, client: &reqwest::Client) {
        let dead: Vec<PickedBackend> = self
            .backends
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.is_dead())
            .map(|b| PickedBackend {
                id: b.id.clone(),
                host: b.host.clone(),
                port: b.port,
            })
            .collect();

        for backend in dead {
            let url = format!("http://{}:{}/", backend.host, backend.port);
            match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
                Ok(resp) if resp.status().as_u16() < 500 => self.restore(&backend.id),
                Ok(resp) => {
                    tracing::debug!(
                        backend = %backend.id,
                        status = resp.status().as_u16(),
                        "probe answered but backend stays quarantined"
                    );
                }
                Err(_) => {}
            }
        }
    }
}

impl Drop for Route {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::Strategy;
    use std::collections::BTreeMap;

    fn backend_config(id: &str, port: u16) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight: 1,
        }
    }

    fn route_config(max_active: usize, max_queued: usize) -> RouteConfig {
        RouteConfig {
            id: "r1".to_string(),
            v_host: "app.local".to_string(),
            strategy: Strategy::RoundRobin,
            max_active,
            max_queued,
            connect_timeout_ms: None,
            proxy_timeout_ms: None,
            tls: None,
            headers: BTreeMap::new(),
            backends: vec![backend_config("b1", 9001), backend_config("b2", 9002)],
        }
    }

    #[test]
    fn admission_fills_active_then_queue_then_sheds() {
        // Arrange
        let route = Route::new(route_config(1, 2));

        // Act
        let first = route.admit();
        let second = route.admit();
        let third = route.admit();
        let fourth = route.admit();

        // Assert
        assert!(matches!(first, Admission::Ready));
        assert!(matches!(second, Admission::Queued(_)));
        assert!(matches!(third, Admission::Queued(_)));
        assert!(matches!(fourth, Admission::Shed));
        assert_eq!(route.active_requests(), 1);
        assert_eq!(route.queued_requests(), 2);
    }

    #[test]
    fn release_pumps_waiters_in_fifo_order() {
        // Arrange
        let route = Route::new(route_config(1, 2));
        assert!(matches!(route.admit(), Admission::Ready));
        let Admission::Queued(mut rx_first) = route.admit() else {
            panic!("expected queued admission");
        };
        let Admission::Queued(mut rx_second) = route.admit() else {
            panic!("expected queued admission");
        };

        // Act: first completion frees one slot.
        route.release();

        // Assert: only the head of the queue is woken, and the slot moved.
        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_err());
        assert_eq!(route.active_requests(), 1);
        assert_eq!(route.queued_requests(), 1);

        route.release();
        assert!(rx_second.try_recv().is_ok());
        assert_eq!(route.active_requests(), 1);
        assert_eq!(route.queued_requests(), 0);
    }

    #[test]
    fn release_skips_waiters_whose_client_left() {
        // Arrange
        let route = Route::new(route_config(1, 2));
        assert!(matches!(route.admit(), Admission::Ready));
        let Admission::Queued(rx_gone) = route.admit() else {
            panic!("expected queued admission");
        };
        let Admission::Queued(mut rx_alive) = route.admit() else {
            panic!("expected queued admission");
        };
        drop(rx_gone);

        // Act
        route.release();

        // Assert: the dead waiter is skipped, the live one gets the slot.
        assert!(rx_alive.try_recv().is_ok());
        assert_eq!(route.active_requests(), 1);
        assert_eq!(route.queued_requests(), 0);
    }

    #[test]
    fn release_floors_at_zero() {
        let route = Route::new(route_config(1, 0));
        route.release();
        assert_eq!(route.active_requests(), 0);
    }

    #[test]
    fn active_count_stays_within_bounds_under_contention() {
        use std::thread;

        // Arrange
        let route = Arc::new(Route::new(route_config(4, 0)));
        let mut handles = vec![];

        // Act: hammer admit/release from many threads.
        for _ in 0..8 {
            let route = Arc::clone(&route);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    if matches!(route.admit(), Admission::Ready) {
                        let active = route.active_requests();
                        assert!(active >= 1 && active <= 4, "active out of bounds: {active}");
                        route.release();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Assert
        assert_eq!(route.active_requests(), 0);
    }

    #[test]
    fn three_failures_quarantine_a_backend() {
        // Arrange
        let route = Route::new(route_config(1, 0));

        // Act
        route.mark_failure("b1");
        route.mark_failure("b1");
        assert!(!route.backends()[0].is_dead());
        route.mark_failure("b1");

        // Assert
        let backend = &route.backends()[0];
        assert!(backend.is_dead());
        assert_eq!(backend.failure_count, 3);
        assert!(backend.dead_since.is_some());
    }

    #[test]
    fn extra_failures_keep_counting_without_moving_dead_since() {
        // Arrange
        let route = Route::new(route_config(1, 0));
        for _ in 0..3 {
            route.mark_failure("b1");
        }
        let first_dead_since = route.backends()[0].dead_since.unwrap();

        // Act
        route.mark_failure("b1");

        // Assert
        let backend = &route.backends()[0];
        assert_eq!(backend.failure_count, 4);
        assert_eq!(backend.dead_since.unwrap(), first_dead_since);
    }

    #[test]
    fn mark_failure_on_unknown_backend_is_a_no_op() {
        let route = Route::new(route_config(1, 0));
        route.mark_failure("nope");
        assert!(route.backends().iter().all(|b| b.failure_count == 0));
    }

    #[test]
    fn pick_skips_quarantined_backends() {
        // Arrange
        let route = Route::new(route_config(1, 0));
        for _ in 0..3 {
            route.mark_failure("b1");
        }

        // Act + Assert: every pick lands on the survivor.
        for _ in 0..5 {
            assert_eq!(route.pick(None).unwrap().id, "b2");
        }
    }

    #[test]
    fn pick_returns_none_when_all_backends_are_dead() {
        let route = Route::new(route_config(1, 0));
        for id in ["b1", "b2"] {
            for _ in 0..3 {
                route.mark_failure(id);
            }
        }
        assert!(route.pick(None).is_none());
    }

    #[test]
    fn restore_resets_failure_state() {
        // Arrange
        let route = Route::new(route_config(1, 0));
        for _ in 0..3 {
            route.mark_failure("b1");
        }

        // Act
        route.restore("b1");

        // Assert
        let backend = &route.backends()[0];
        assert!(!backend.is_dead());
        assert_eq!(backend.failure_count, 0);
    }

    #[test]
    fn update_config_preserves_gate_but_rebuilds_backends() {
        // Arrange
        let route = Route::new(route_config(1, 2));
        assert!(matches!(route.admit(), Admission::Ready));
        let Admission::Queued(_rx) = route.admit() else {
            panic!("expected queued admission");
        };
        route.mark_failure("b1");

        // Act
        let mut new = route_config(3, 2);
        new.backends.push(backend_config("b3", 9003));
        route.update_config(new);

        // Assert: traffic state survives, backend state is fresh.
        assert_eq!(route.active_requests(), 1);
        assert_eq!(route.queued_requests(), 1);
        let backends = route.backends();
        assert_eq!(backends.len(), 3);
        assert!(backends.iter().all(|b| b.failure_count == 0));
    }

    #[test]
    fn raising_max_active_lets_release_pump_several_waiters() {
        // Arrange
        let route = Route::new(route_config(1, 3));
        assert!(matches!(route.admit(), Admission::Ready));
        let mut waiters = vec![];
        for _ in 0..3 {
            let Admission::Queued(rx) = route.admit() else {
                panic!("expected queued admission");
            };
            waiters.push(rx);
        }

        // Act
        let new = route_config(4, 3);
        route.update_config(new);
        route.release();

        // Assert: capacity 4, zero active after release, three waiters pumped.
        for mut rx in waiters {
            assert!(rx.try_recv().is_ok());
        }
        assert_eq!(route.active_requests(), 3);
    }

    #[test]
    fn ip_hash_route_is_sticky_for_a_client() {
        // Arrange
        let mut config = route_config(1, 0);
        config.strategy = Strategy::IpHash;
        let route = Route::new(config);
        let client: IpAddr = "10.1.2.3".parse().unwrap();

        // Act
        let first = route.pick(Some(client)).unwrap();
        let second = route.pick(Some(client)).unwrap();

        // Assert
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn set_tls_does_not_disturb_backend_state() {
        // Arrange
        let route = Route::new(route_config(1, 0));
        route.mark_failure("b1");

        // Act
        route.set_tls(TlsMaterial {
            key: "key".to_string(),
            cert: "cert".to_string(),
        });

        // Assert
        assert!(route.config().tls.is_some());
        assert_eq!(route.backends()[0].failure_count, 1);
    }
}
