use super::{FrontendError, FrontendRegistry};
use crate::shared::PlayerId;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const PING_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct OnlineClient {
    name: String,
    server: Option<String>,
}

/// In-process front-end: a name→address table, TCP-connect reachability
/// and a client connection table.
#[derive(Debug, Default)]
pub struct LocalFrontend {
    servers: DashMap<String, (String, u16)>,
    clients: DashMap<PlayerId, OnlineClient>,
}

impl LocalFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_joined(&self, client: PlayerId, name: impl Into<String>) {
        self.clients.insert(
            client,
            OnlineClient {
                name: name.into(),
                server: None,
            },
        );
    }

    pub fn client_left(&self, client: PlayerId) {
        self.clients.remove(&client);
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn address_of(&self, name: &str) -> Option<(String, u16)> {
        self.servers.get(name).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl FrontendRegistry for LocalFrontend {
    async fn register_address(
        &self,
        name: &str,
        host: &str,
        port: u16,
    ) -> Result<(), FrontendError> {
        info!("[Frontend] Registered {name} at {host}:{port}");
        self.servers
            .insert(name.to_string(), (host.to_string(), port));
        Ok(())
    }

    async fn unregister_address(&self, name: &str) -> Result<(), FrontendError> {
        match self.servers.remove(name) {
            Some(_) => {
                for mut client in self.clients.iter_mut() {
                    if client.server.as_deref() == Some(name) {
                        client.server = None;
                    }
                }
                debug!("[Frontend] Unregistered {name}");
                Ok(())
            }
            None => Err(FrontendError::NotRegistered {
                name: name.to_string(),
            }),
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    async fn ping_reachable(&self, name: &str) -> Result<(), FrontendError> {
        let (host, port) = self
            .address_of(name)
            .ok_or_else(|| FrontendError::NotRegistered {
                name: name.to_string(),
            })?;
        match timeout(PING_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(FrontendError::Unreachable {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(FrontendError::Unreachable {
                name: name.to_string(),
                message: "ping timed out".to_string(),
            }),
        }
    }

    async fn connect_client(&self, client: PlayerId, name: &str) -> Result<(), FrontendError> {
        if !self.is_registered(name) {
            return Err(FrontendError::NotRegistered {
                name: name.to_string(),
            });
        }
        let mut entry = self
            .clients
            .get_mut(&client)
            .ok_or(FrontendError::ClientOffline { client })?;
        if entry.server.as_deref() != Some(name) {
            info!("[Frontend] Moving {} to {name}", entry.name);
            entry.server = Some(name.to_string());
        }
        Ok(())
    }

    fn current_server(&self, client: PlayerId) -> Option<String> {
        self.clients.get(&client).and_then(|c| c.server.clone())
    }

    fn is_online(&self, client: PlayerId) -> bool {
        self.clients.contains_key(&client)
    }

    fn online_count(&self) -> usize {
        self.clients.len()
    }

    fn display_name(&self, client: PlayerId) -> Option<String> {
        self.clients.get(&client).map(|c| c.name.clone())
    }
}
