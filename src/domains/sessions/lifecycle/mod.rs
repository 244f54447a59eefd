pub mod bootstrapper;
pub mod cancellation;
pub mod platform;

pub use bootstrapper::SessionBootstrapper;
pub use cancellation::{
    CleanupCoordinator, CleanupOutcome, CleanupReason, CleanupReport, SessionHolder,
};
pub use platform::{PlatformInitializer, PlatformPolicy};
