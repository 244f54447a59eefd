pub mod config;
pub mod frontend;
