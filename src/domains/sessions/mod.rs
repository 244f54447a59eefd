//! Session lifecycle: ownership registry, spawn and adoption flows, platform
//! preparation and teardown.

pub mod context;
pub mod entity;
pub mod lifecycle;
pub mod preferences;
pub mod registry;
pub mod service;
pub mod utils;

#[cfg(test)]
mod tests;

pub use context::{Dependencies, SessionContext};
pub use entity::{SessionSnapshot, SessionState, WorkerSession};
pub use lifecycle::{CleanupCoordinator, CleanupOutcome, CleanupReason, SessionHolder};
pub use preferences::{RadiusChange, RadiusKind, RadiusPreferences};
pub use registry::SessionRegistry;
pub use service::{CommandDelivery, SessionRequestOutcome, SessionService, WarmSource};
