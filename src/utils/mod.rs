pub mod binary_utils;
pub mod env_adapter;
pub mod fs_utils;
