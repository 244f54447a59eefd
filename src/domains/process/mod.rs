//! Launching backend workers and tracking them through the PID handoff file.

pub mod inspector;
pub mod launch;
pub mod supervisor;

pub use inspector::{ProcessInspector, SystemProcessInspector};
pub use launch::{LaunchMode, LaunchSpec, LauncherCommand, WarmTemplate};
pub use supervisor::{PidHandoff, ProcessSlot, ProcessSupervisor, SupervisorTimings};
