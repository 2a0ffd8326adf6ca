mod route;
mod router;

pub use route::{
    Admission, Backend, PickedBackend, Route, PROBE_TIMEOUT, QUARANTINE_THRESHOLD,
    RECHECK_INTERVAL,
};
pub use router::Router;
