//! RCON client against a scripted control port.

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use worldpool::domains::control::packet::{
    Packet, SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND, read_packet, write_packet,
};
use worldpool::domains::control::{ControlChannel, ControlEndpoint, RconConnector, RconError};

const PASSWORD: &str = "hunter2hunter2ab";

#[derive(Clone, Copy)]
enum Script {
    /// Accepts the login and answers every command with `ran <command>`.
    Echo,
    /// Answers the login with id -1.
    RejectAuth,
    /// Accepts the login, never answers a command.
    Silent,
}

/// Serves one connection and resolves with every packet received once the
/// client has closed its side.
async fn scripted_server(script: Script) -> (ControlEndpoint, JoinHandle<Vec<Packet>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        while let Ok(packet) = read_packet(&mut socket).await {
            let reply = match (script, packet.kind) {
                (Script::RejectAuth, SERVERDATA_AUTH) => Some(Packet::command(-1, "")),
                (_, SERVERDATA_AUTH) => Some(Packet::command(packet.id, "")),
                (Script::Echo, _) if !packet.body.is_empty() => {
                    Some(Packet::command(packet.id, &format!("ran {}", packet.body)))
                }
                _ => None,
            };
            received.push(packet);
            if let Some(reply) = reply {
                if write_packet(&mut socket, &reply).await.is_err() {
                    break;
                }
            }
        }
        received
    });
    (ControlEndpoint::new("127.0.0.1", port, PASSWORD), handle)
}

async fn finished(handle: JoinHandle<Vec<Packet>>) -> Vec<Packet> {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("client left the socket open")
        .unwrap()
}

#[tokio::test]
async fn execute_authenticates_then_returns_the_reply() {
    let (endpoint, server) = scripted_server(Script::Echo).await;

    let reply = RconConnector::new().execute(&endpoint, "list").await.unwrap();
    assert_eq!(reply, "ran list");

    let received = finished(server).await;
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].kind, SERVERDATA_AUTH);
    assert_eq!(received[0].body, PASSWORD);
    assert_eq!(received[1].kind, SERVERDATA_EXECCOMMAND);
    assert_eq!(received[1].body, "list");
    assert_ne!(received[0].id, received[1].id);
}

#[tokio::test]
async fn mismatched_auth_reply_is_an_auth_error() {
    let (endpoint, server) = scripted_server(Script::RejectAuth).await;

    let err = RconConnector::new()
        .execute(&endpoint, "list")
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Auth { received: -1, .. }), "{err}");

    let received = finished(server).await;
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn silent_backend_times_out_and_releases_the_socket() {
    let (endpoint, server) = scripted_server(Script::Silent).await;

    let connector = RconConnector::with_read_timeout(Duration::from_millis(200));
    let err = connector.execute(&endpoint, "list").await.unwrap_err();
    assert!(
        matches!(err, RconError::Timeout { operation: "execute" }),
        "{err}"
    );

    let received = finished(server).await;
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn fire_and_forget_sends_a_flush_marker() {
    let (endpoint, server) = scripted_server(Script::Silent).await;

    RconConnector::new()
        .execute_no_reply(&endpoint, "say hello")
        .await
        .unwrap();

    let received = finished(server).await;
    assert_eq!(received.len(), 3);
    assert_eq!(received[1].body, "say hello");
    assert_eq!(received[2].body, "");
    assert_eq!(received[1].id, received[2].id);
}

#[tokio::test]
async fn closed_port_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let endpoint = ControlEndpoint::new("127.0.0.1", port, PASSWORD);
    let err = RconConnector::new()
        .execute(&endpoint, "list")
        .await
        .unwrap_err();
    assert!(matches!(err, RconError::Connect { .. }), "{err}");
}
