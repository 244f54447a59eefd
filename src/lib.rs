//! On-demand backend servers per party, a warm pool that hides their
//! cold-start latency, and an RCON client to drive them.

pub mod cleanup;
pub mod cli;
pub mod domains;
pub mod errors;
pub mod events;
pub mod infrastructure;
pub mod shared;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::WorldpoolError;
