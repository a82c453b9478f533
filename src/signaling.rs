//! WebRTC call signaling relay.
//!
//! Each socket joins a group named after its username. Inbound frames are
//! routed to the group named in the payload:
//!
//! | Inbound `type` | Target field | Outbound `type` | Outbound `data` |
//! |----------------|--------------|-----------------|-----------------|
//! | `call` | `data.name` | `call_received` | `caller`, `rtcMessage` |
//! | `answer_call` | `data.caller` | `call_answered` | `rtcMessage` |
//! | `ICEcandidate` | `data.user` | `ICEcandidate` | `rtcMessage` |
//!
//! Frames for an empty group are dropped. Nothing is persisted.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sending half of one connected socket.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Group membership for all live signaling sockets.
#[derive(Default)]
pub struct SignalHub {
    groups: RwLock<HashMap<String, HashMap<Uuid, Outbox>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, group: &str, id: Uuid, outbox: Outbox) {
        self.groups
            .write()
            .unwrap()
            .entry(group.to_string())
            .or_default()
            .insert(id, outbox);
    }

    pub fn leave(&self, group: &str, id: Uuid) {
        let mut groups = self.groups.write().unwrap();
        if let Some(members) = groups.get_mut(group) {
            members.remove(&id);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    /// Deliver `text` to every member of `group`. Returns how many sockets
    /// accepted it.
    pub fn send_to_group(&self, group: &str, text: &str) -> usize {
        let groups = self.groups.read().unwrap();
        let Some(members) = groups.get(group) else {
            return 0;
        };
        members
            .values()
            .filter(|tx| tx.send(text.to_string()).is_ok())
            .count()
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.groups
            .read()
            .unwrap()
            .get(group)
            .map_or(0, HashMap::len)
    }
}

/// Usernames are one or more word characters.
pub fn valid_username(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

pub fn connection_message(name: &str) -> String {
    json!({
        "type": "connection",
        "data": { "message": format!("Connected as {}", name) },
    })
    .to_string()
}

/// Resolve an inbound frame from `from` into `(target group, outbound frame)`.
///
/// Returns `None` for malformed JSON, unknown types and missing targets.
pub fn route_signal(from: &str, text: &str) -> Option<(String, String)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let kind = frame.get("type")?.as_str()?;
    let empty = Value::Object(Default::default());
    let data = frame.get("data").unwrap_or(&empty);
    let rtc = data.get("rtcMessage").cloned().unwrap_or(Value::Null);

    let target_of = |field: &str| {
        data.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let (target, outbound) = match kind {
        "call" => (
            target_of("name")?,
            json!({ "type": "call_received", "data": { "caller": from, "rtcMessage": rtc } }),
        ),
        "answer_call" => (
            target_of("caller")?,
            json!({ "type": "call_answered", "data": { "rtcMessage": rtc } }),
        ),
        "ICEcandidate" => (
            target_of("user")?,
            json!({ "type": "ICEcandidate", "data": { "rtcMessage": rtc } }),
        ),
        _ => return None,
    };
    Some((target, outbound.to_string()))
}

/// Drive one upgraded socket until either side closes.
pub async fn run_socket(socket: WebSocket, hub: Arc<SignalHub>, username: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    hub.join(&username, id, tx.clone());
    tracing::info!(user = %username, "signaling peer connected");

    let forward = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(connection_message(&username));

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => match route_signal(&username, text.as_str()) {
                Some((target, outbound)) => {
                    let delivered = hub.send_to_group(&target, &outbound);
                    tracing::debug!(from = %username, to = %target, delivered, "signal relayed");
                }
                None => tracing::warn!(from = %username, "ignoring unroutable signaling frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    hub.leave(&username, id);
    forward.abort();
    tracing::info!(user = %username, "signaling peer disconnected");
}
