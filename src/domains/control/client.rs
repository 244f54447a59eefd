use super::packet::{Packet, read_packet, write_packet};
use super::{ControlEndpoint, RconError};
use log::debug;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Short-lived authenticated control connection.
///
/// Not meant to be reused across operations: open, run, close. Dropping the
/// client closes the socket, so every exit path (errors and cancelled futures
/// included) releases it.
pub struct RconClient {
    stream: TcpStream,
    next_id: i32,
    read_timeout: Duration,
}

impl RconClient {
    pub async fn connect(endpoint: &ControlEndpoint) -> Result<Self, RconError> {
        Self::connect_with_timeout(endpoint, DEFAULT_READ_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        endpoint: &ControlEndpoint,
        read_timeout: Duration,
    ) -> Result<Self, RconError> {
        let address = endpoint.address();
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| RconError::Timeout {
                operation: "connect",
            })?
            .map_err(|source| RconError::Connect {
                address: address.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("[Rcon] Could not disable Nagle on {address}: {e}");
        }

        let mut client = Self {
            stream,
            next_id: 1,
            read_timeout,
        };
        client.authenticate(&endpoint.password).await?;
        Ok(client)
    }

    async fn authenticate(&mut self, password: &str) -> Result<(), RconError> {
        let id = self.take_id();
        write_packet(&mut self.stream, &Packet::auth(id, password)).await?;
        let reply = self.read_reply("authenticate").await?;
        if reply.id != id {
            return Err(RconError::Auth {
                expected: id,
                received: reply.id,
            });
        }
        Ok(())
    }

    /// Sends one command and waits for its reply body.
    pub async fn execute(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.take_id();
        write_packet(&mut self.stream, &Packet::command(id, command)).await?;
        let reply = self.read_reply("execute").await?;
        if reply.id != id {
            return Err(RconError::protocol(format!(
                "reply id {} does not match request id {id}",
                reply.id
            )));
        }
        Ok(reply.body)
    }

    /// Sends the command plus an empty flush marker and returns without
    /// reading anything back.
    pub async fn execute_no_reply(&mut self, command: &str) -> Result<(), RconError> {
        let id = self.take_id();
        write_packet(&mut self.stream, &Packet::command(id, command)).await?;
        write_packet(&mut self.stream, &Packet::command(id, "")).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("[Rcon] Socket shutdown reported: {e}");
        }
    }

    async fn read_reply(&mut self, operation: &'static str) -> Result<Packet, RconError> {
        timeout(self.read_timeout, read_packet(&mut self.stream))
            .await
            .map_err(|_| RconError::Timeout { operation })?
    }

    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}
