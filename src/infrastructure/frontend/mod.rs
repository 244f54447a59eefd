//! The routing front-end that clients connect through.
//!
//! The orchestrator only registers backend addresses, probes them and asks
//! the front-end to move clients; everything else about the front-end is
//! opaque.

pub mod local;

pub use local::LocalFrontend;

use crate::shared::PlayerId;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendError {
    NotRegistered { name: String },
    Unreachable { name: String, message: String },
    ClientOffline { client: PlayerId },
    Rejected { message: String },
}

impl fmt::Display for FrontendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotRegistered { name } => write!(f, "Server '{name}' is not registered"),
            Self::Unreachable { name, message } => {
                write!(f, "Server '{name}' is unreachable: {message}")
            }
            Self::ClientOffline { client } => write!(f, "Client {client} is not online"),
            Self::Rejected { message } => write!(f, "Front-end rejected request: {message}"),
        }
    }
}

impl std::error::Error for FrontendError {}

#[async_trait]
pub trait FrontendRegistry: Send + Sync {
    async fn register_address(&self, name: &str, host: &str, port: u16)
    -> Result<(), FrontendError>;

    /// Fails with [`FrontendError::NotRegistered`] when nothing is registered
    /// under `name`.
    async fn unregister_address(&self, name: &str) -> Result<(), FrontendError>;

    fn is_registered(&self, name: &str) -> bool;

    async fn ping_reachable(&self, name: &str) -> Result<(), FrontendError>;

    /// No-op when the client is already on `name`.
    async fn connect_client(&self, client: PlayerId, name: &str) -> Result<(), FrontendError>;

    fn current_server(&self, client: PlayerId) -> Option<String>;

    fn is_online(&self, client: PlayerId) -> bool;

    fn online_count(&self) -> usize;

    /// Name the backend knows the client by, when the front-end has one.
    fn display_name(&self, client: PlayerId) -> Option<String>;
}
