//! Pre-spawned warm sessions that hide backend cold-start latency.

pub mod keeper;
pub mod manager;
pub mod warm;

pub use keeper::spawn_keeper;
pub use manager::{ReconcileReport, WarmPoolManager};
pub use warm::WarmPool;
