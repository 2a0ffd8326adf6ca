use crate::conf::Strategy;
use rand::{rng, Rng};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend selector. One variant per strategy; selection state lives in the
/// variant payload.
///
/// The selector indexes into the route's current *alive* set. The round-robin
/// counter survives backend swaps, so churn may skew the first few picks
/// after a swap.
#[derive(Debug)]
pub enum Balancer {
    RoundRobin { counter: AtomicUsize },
    Random,
    IpHash,
}

impl Balancer {
    pub fn for_strategy(strategy: Strategy) -> Self {
        match strategy {
            // LEAST_LATENCY is reserved and selects like round-robin.
            Strategy::RoundRobin | Strategy::LeastLatency => Self::RoundRobin {
                counter: AtomicUsize::new(0),
            },
            Strategy::Random => Self::Random,
            Strategy::IpHash => Self::IpHash,
        }
    }

    /// Pick an index into an alive set of size `n`. `n` must be non-zero;
    /// the caller handles the all-dead case.
    pub fn pick_index(&self, n: usize, client_ip: &str) -> usize {
        debug_assert!(n > 0);
        match self {
            Self::RoundRobin { counter } => counter.fetch_add(1, Ordering::Relaxed) % n,
            Self::Random => rng().random_range(0..n),
            Self::IpHash => ip_hash(client_ip) as usize % n,
        }
    }
}

/// 32-bit multiplicative string mix: `h = ((h << 5) - h) + c` per character,
/// folded to 32 bits, with the sign dropped at the end.
fn ip_hash(ip: &str) -> u32 {
    let mut h: i32 = 0;
    for c in ip.chars() {
        h = h.wrapping_shl(5).wrapping_sub(h).wrapping_add(c as i32);
    }
    h.unsigned_abs()
}
