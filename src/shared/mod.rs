pub mod clock;
pub mod ids;
pub mod retry;
pub mod shutdown;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::PlayerId;
pub use retry::{Growth, RetryError, RetryPolicy};
pub use shutdown::ShutdownSignal;
