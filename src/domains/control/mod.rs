//! Out-of-band control of a running backend over the RCON wire protocol.

pub mod client;
pub mod connector;
pub mod packet;

pub use client::RconClient;
pub use connector::{ControlChannel, RconConnector};

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Where and how to reach a session's control port. Immutable once generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub password: String,
}

impl ControlEndpoint {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
        }
    }

    /// Fresh endpoint with a random 16-character credential.
    pub fn generate(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, generate_password())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn generate_password() -> String {
    let mut simple = Uuid::new_v4().simple().to_string();
    simple.truncate(16);
    simple
}

#[derive(Debug)]
pub enum RconError {
    Connect {
        address: String,
        source: std::io::Error,
    },
    /// The authenticate reply did not echo the request id.
    Auth { expected: i32, received: i32 },
    Protocol { message: String },
    Timeout { operation: &'static str },
    Io(std::io::Error),
}

impl RconError {
    pub fn protocol(message: impl Into<String>) -> Self {
        RconError::Protocol {
            message: message.into(),
        }
    }
}

impl fmt::Display for RconError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Connect { address, source } => {
                write!(f, "Failed to connect to control port {address}: {source}")
            }
            Self::Auth { expected, received } => {
                write!(
                    f,
                    "Control authentication rejected (sent id {expected}, reply id {received})"
                )
            }
            Self::Protocol { message } => write!(f, "Malformed control reply: {message}"),
            Self::Timeout { operation } => write!(f, "Control '{operation}' timed out"),
            Self::Io(err) => write!(f, "Control socket error: {err}"),
        }
    }
}

impl std::error::Error for RconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RconError {
    fn from(err: std::io::Error) -> Self {
        RconError::Io(err)
    }
}
