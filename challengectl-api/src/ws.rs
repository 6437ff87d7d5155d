//! Event Bus (§4.8): one broadcast "room" for operator subscribers, plus a
//! private `agent_<id>` mailbox per connected receiver. Adapted from the
//! teacher's `WsState`/`ws_handler`/`handle_socket` broadcast-channel
//! pattern, generalized from tenant filtering to this two-audience model.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use challengectl_core::{AgentId, ChallengeId, RecordingAssignmentId, TransmissionId};

use crate::middleware::{AgentAuth, OperatorAuth};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WsEvent {
    AgentStatus {
        agent_id: AgentId,
        online: bool,
        at: DateTime<Utc>,
    },
    AgentEnabled {
        agent_id: AgentId,
        enabled: bool,
        at: DateTime<Utc>,
    },
    ChallengeAssigned {
        challenge_id: ChallengeId,
        agent_id: AgentId,
        at: DateTime<Utc>,
    },
    TransmissionComplete {
        transmission_id: TransmissionId,
        challenge_id: ChallengeId,
        outcome: challengectl_core::Outcome,
        at: DateTime<Utc>,
    },
    /// Pushed only to the target receiver's private mailbox.
    RecordingAssignment {
        assignment_id: RecordingAssignmentId,
        frequency_hz: i64,
        expected_start: DateTime<Utc>,
        expected_duration_secs: i64,
        at: DateTime<Utc>,
    },
    AssignmentCancelled {
        assignment_id: RecordingAssignmentId,
        at: DateTime<Utc>,
    },
    Log {
        message: String,
        at: DateTime<Utc>,
    },
}

const OPERATOR_CHANNEL_CAPACITY: usize = 1024;
const AGENT_MAILBOX_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct EventBus {
    operators: broadcast::Sender<WsEvent>,
    agent_mailboxes: Arc<DashMap<AgentId, mpsc::Sender<WsEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(OPERATOR_CHANNEL_CAPACITY);
        Self {
            operators: tx,
            agent_mailboxes: Arc::new(DashMap::new()),
        }
    }

    /// Best-effort broadcast to every connected operator (§4.8: a
    /// disconnected subscriber does not receive missed events).
    pub fn broadcast_to_operators(&self, event: WsEvent) {
        let _ = self.operators.send(event);
    }

    /// Non-blocking push into one agent's private room. Silently dropped
    /// if the agent has no push connection (transmitters never register
    /// one) or its mailbox is full.
    pub fn push_to_agent(&self, agent_id: AgentId, event: WsEvent) {
        if let Some(sender) = self.agent_mailboxes.get(&agent_id) {
            let _ = sender.try_send(event);
        }
    }

    fn register_agent(&self, agent_id: AgentId) -> mpsc::Receiver<WsEvent> {
        let (tx, rx) = mpsc::channel(AGENT_MAILBOX_CAPACITY);
        self.agent_mailboxes.insert(agent_id, tx);
        rx
    }

    fn unregister_agent(&self, agent_id: AgentId) {
        self.agent_mailboxes.remove(&agent_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn operator_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<crate::state::AppState>,
    auth: OperatorAuth,
) -> Response {
    tracing::info!(username = %auth.user.username, "operator event-bus connection");
    ws.on_upgrade(move |socket| handle_operator_socket(socket, state.events))
}

async fn handle_operator_socket(socket: WebSocket, events: EventBus) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = events.operators.subscribe();

    let mut recv_task = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    loop {
        tokio::select! {
            result = rx.recv() => match result {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "operator event-bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut recv_task => break,
        }
    }
}

/// Receiver agents authenticate with their bearer token (§4.8: "agent-
/// credential-authenticated subscribers") and join their private room.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<crate::state::AppState>,
    auth: AgentAuth,
) -> Response {
    let agent_id = auth.agent.id;
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state, agent_id))
}

async fn handle_agent_socket(socket: WebSocket, state: crate::state::AppState, agent_id: AgentId) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.register_agent(agent_id);
    let _ = state.persistence.store.set_push_connected(agent_id, true).await;

    let mut recv_task = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut recv_task => break,
        }
    }

    state.events.unregister_agent(agent_id);
    let _ = state.persistence.store.set_push_connected(agent_id, false).await;
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &WsEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use challengectl_core::EntityIdType;

    #[test]
    fn push_to_unregistered_agent_is_a_silent_noop() {
        let bus = EventBus::new();
        bus.push_to_agent(
            AgentId::now_v7(),
            WsEvent::Log {
                message: "hi".into(),
                at: Utc::now(),
            },
        );
    }

    #[tokio::test]
    async fn registered_agent_receives_pushed_event() {
        let bus = EventBus::new();
        let agent_id = AgentId::now_v7();
        let mut rx = bus.register_agent(agent_id);

        bus.push_to_agent(
            agent_id,
            WsEvent::Log {
                message: "hello".into(),
                at: Utc::now(),
            },
        );

        let received = rx.recv().await.expect("event delivered");
        assert!(matches!(received, WsEvent::Log { .. }));
    }
}
