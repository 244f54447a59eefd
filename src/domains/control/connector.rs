use super::client::{DEFAULT_READ_TIMEOUT, RconClient};
use super::{ControlEndpoint, RconError};
use async_trait::async_trait;
use std::time::Duration;

/// Seam through which sessions talk to their backend's control port.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn execute(&self, endpoint: &ControlEndpoint, command: &str)
    -> Result<String, RconError>;

    async fn execute_no_reply(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
    ) -> Result<(), RconError>;
}

/// Opens a fresh connection for every call so concurrent callers never share
/// a socket.
#[derive(Debug, Clone)]
pub struct RconConnector {
    read_timeout: Duration,
}

impl RconConnector {
    pub fn new() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for RconConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlChannel for RconConnector {
    async fn execute(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
    ) -> Result<String, RconError> {
        let mut client = RconClient::connect_with_timeout(endpoint, self.read_timeout).await?;
        let reply = client.execute(command).await;
        client.close().await;
        reply
    }

    async fn execute_no_reply(
        &self,
        endpoint: &ControlEndpoint,
        command: &str,
    ) -> Result<(), RconError> {
        let mut client = RconClient::connect_with_timeout(endpoint, self.read_timeout).await?;
        let sent = client.execute_no_reply(command).await;
        client.close().await;
        sent
    }
}
