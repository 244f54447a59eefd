pub mod control;
pub mod pool;
pub mod process;
pub mod sessions;
