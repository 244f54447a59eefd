use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldpoolEvent {
    SessionSpawning,
    SessionAdopted,
    SessionReady,
    SessionFailed,
    SessionRemoved,
    WarmReady,
    CooldownDenied,
    CommandQueued,
    CommandDispatched,
}

impl WorldpoolEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldpoolEvent::SessionSpawning => "worldpool:session-spawning",
            WorldpoolEvent::SessionAdopted => "worldpool:session-adopted",
            WorldpoolEvent::SessionReady => "worldpool:session-ready",
            WorldpoolEvent::SessionFailed => "worldpool:session-failed",
            WorldpoolEvent::SessionRemoved => "worldpool:session-removed",
            WorldpoolEvent::WarmReady => "worldpool:warm-ready",
            WorldpoolEvent::CooldownDenied => "worldpool:cooldown-denied",
            WorldpoolEvent::CommandQueued => "worldpool:command-queued",
            WorldpoolEvent::CommandDispatched => "worldpool:command-dispatched",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEventPayload {
    pub session: String,
    pub leader: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionFailedPayload {
    pub session: String,
    pub leader: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CooldownPayload {
    pub leader: String,
    pub remaining_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub session: String,
    pub command: String,
}

/// One delivered event, as seen by a channel consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub event: WorldpoolEvent,
    pub payload: serde_json::Value,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: WorldpoolEvent, payload: serde_json::Value);
}

/// Writes every event to the debug log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn emit(&self, event: WorldpoolEvent, payload: serde_json::Value) {
        debug!("[Event] {} {payload}", event.as_str());
    }
}

/// Forwards events to an unbounded channel; dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EmittedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EmittedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: WorldpoolEvent, payload: serde_json::Value) {
        let _ = self.tx.send(EmittedEvent { event, payload });
    }
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: WorldpoolEvent, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit(event, value),
        Err(e) => warn!("[Event] Failed to serialize {} payload: {e}", event.as_str()),
    }
}
