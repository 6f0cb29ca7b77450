//! Subscriber Channel (C6, §4.6): one task per connected viewer, owning the
//! attach/detach state machine and translating event-bus traffic into this
//! subscriber's outbound frames.
//!
//! Modeled on the corpus's split-socket + `tokio::select!` transport loop,
//! but collapsed into a single task (no separate outgoing-mpsc task) since
//! every outbound frame here already originates from either an inbound
//! client message or a bus event observed in the same loop iteration.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::bus::BusEvent;
use crate::AppState;

use super::protocol::{ClientMessage, ServerMessage};

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

type WsSink = SplitSink<WebSocket, Message>;

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let subscriber_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();
    let mut bus_rx = state.bus.subscribe();

    let mut attached_agent: Option<String> = None;
    let mut attached_tab: Option<String> = None;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(
                            &text,
                            &subscriber_id,
                            &mut attached_agent,
                            &mut attached_tab,
                            &state,
                            &mut sender,
                        ).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!("subscriber {subscriber_id} transport error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            event = bus_rx.recv() => {
                match event {
                    Ok(bus_event) => {
                        handle_bus_event(
                            bus_event,
                            &subscriber_id,
                            &mut attached_agent,
                            &mut attached_tab,
                            &mut sender,
                        ).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("subscriber {subscriber_id} lagged by {skipped} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let (Some(agent_id), Some(tab_id)) = (&attached_agent, &attached_tab) {
        state.control.release(agent_id, tab_id, &subscriber_id);
    }
    state.control.release_all(&subscriber_id);
}

async fn send(sender: &mut WsSink, msg: &ServerMessage) {
    if let Ok(text) = serde_json::to_string(msg) {
        let _ = sender.send(Message::Text(text)).await;
    }
}

async fn send_error(sender: &mut WsSink, message: impl Into<String>) {
    send(sender, &ServerMessage::Error { message: message.into() }).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_message(
    text: &str,
    subscriber_id: &str,
    attached_agent: &mut Option<String>,
    attached_tab: &mut Option<String>,
    state: &AppState,
    sender: &mut WsSink,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            send_error(sender, format!("malformed frame: {e}")).await;
            return;
        }
    };

    match message {
        ClientMessage::Attach { agent_id, tab_id, from_seq } => {
            release_current_attachment(state, subscriber_id, attached_agent, attached_tab);

            let Some(agent) = state.registry.get(&agent_id) else {
                send_error(sender, format!("agent not found: {agent_id}")).await;
                return;
            };
            let Some(target_tab_id) = tab_id.or_else(|| agent.first_tab_id().map(str::to_string)) else {
                send_error(sender, "agent has no tabs").await;
                return;
            };

            if let Some(session) = state.registry.tab_session(&agent_id, &target_tab_id) {
                if !session.is_running() {
                    if let Err(e) = session.start(DEFAULT_COLS, DEFAULT_ROWS) {
                        send_error(sender, format!("failed to start PTY: {e}")).await;
                        return;
                    }
                }
            } else {
                send_error(sender, format!("tab not found: {target_tab_id}")).await;
                return;
            }

            let has_control = state.control.claim_if_vacant(&agent_id, &target_tab_id, subscriber_id);
            let Some(buffer) = state.registry.buffer(&agent_id, &target_tab_id) else {
                send_error(sender, format!("tab not found: {target_tab_id}")).await;
                return;
            };
            let stats = buffer.stats();

            send(sender, &ServerMessage::Attached {
                agent_id: agent_id.clone(),
                tab_id: target_tab_id.clone(),
                has_control,
                last_seq: stats.last_seq,
            }).await;

            let (chunks, last_seq) = buffer.snapshot(from_seq.unwrap_or(0));
            send(sender, &ServerMessage::OutputSync {
                chunks,
                tab_id: target_tab_id.clone(),
                last_seq,
            }).await;

            *attached_agent = Some(agent_id);
            *attached_tab = Some(target_tab_id);
        }

        ClientMessage::Detach => {
            release_current_attachment(state, subscriber_id, attached_agent, attached_tab);
            *attached_agent = None;
            *attached_tab = None;
            send(sender, &ServerMessage::Detached).await;
        }

        ClientMessage::Input { data, tab_id } => {
            let Some(agent_id) = attached_agent.clone() else { return };
            let Some(target_tab_id) = tab_id.or_else(|| attached_tab.clone()) else { return };
            if !state.control.is_owner(&agent_id, &target_tab_id, subscriber_id) {
                return;
            }
            if let Some(session) = state.registry.tab_session(&agent_id, &target_tab_id) {
                session.write(data.as_bytes());
            }
        }

        ClientMessage::Resize { cols, rows, tab_id } => {
            let Some(agent_id) = attached_agent.clone() else { return };
            let Some(target_tab_id) = tab_id.or_else(|| attached_tab.clone()) else { return };
            if !state.control.is_owner(&agent_id, &target_tab_id, subscriber_id) {
                return;
            }
            if let Some(session) = state.registry.tab_session(&agent_id, &target_tab_id) {
                session.resize(cols, rows);
            }
        }

        ClientMessage::Start { agent_id, tab_id } => {
            let Some(agent) = state.registry.get(&agent_id) else {
                send_error(sender, format!("agent not found: {agent_id}")).await;
                return;
            };
            let Some(target_tab_id) = tab_id.or_else(|| agent.first_tab_id().map(str::to_string)) else {
                send_error(sender, "agent has no tabs").await;
                return;
            };
            if let Some(session) = state.registry.tab_session(&agent_id, &target_tab_id) {
                if let Err(e) = session.start(DEFAULT_COLS, DEFAULT_ROWS) {
                    send_error(sender, format!("failed to start PTY: {e}")).await;
                }
            }
        }

        ClientMessage::Stop { agent_id, tab_id } => {
            let Some(agent) = state.registry.get(&agent_id) else {
                send_error(sender, format!("agent not found: {agent_id}")).await;
                return;
            };
            let Some(target_tab_id) = tab_id.or_else(|| agent.first_tab_id().map(str::to_string)) else {
                return;
            };
            if let Some(session) = state.registry.tab_session(&agent_id, &target_tab_id) {
                session.stop();
            }
        }

        ClientMessage::GainControl => {
            let (Some(agent_id), Some(tab_id)) = (attached_agent.clone(), attached_tab.clone()) else {
                send_error(sender, "gain-control requires an active attachment").await;
                return;
            };
            let previous_owner = state.control.gain(&agent_id, &tab_id, subscriber_id);
            state.bus.publish(BusEvent::ControlChanged {
                agent_id,
                tab_id,
                new_owner: Some(subscriber_id.to_string()),
            });
            let _ = previous_owner;
        }

        ClientMessage::CreateTab { agent_id, name } => {
            if let Err(e) = state.registry.create_tab(&agent_id, name) {
                send_error(sender, e.to_string()).await;
            }
        }

        ClientMessage::CloseTab { agent_id, tab_id } => {
            if let Err(e) = state.registry.close_tab(&agent_id, &tab_id) {
                send_error(sender, e.to_string()).await;
            }
        }

        ClientMessage::SyncOutput { agent_id, tab_id, from_seq } => {
            let Some(buffer) = state.registry.buffer(&agent_id, &tab_id) else {
                send_error(sender, format!("tab not found: {tab_id}")).await;
                return;
            };
            let (chunks, last_seq) = buffer.snapshot(from_seq);
            send(sender, &ServerMessage::OutputSync { chunks, tab_id, last_seq }).await;
        }

        ClientMessage::GetBufferStats { agent_id, tab_id } => {
            let Some(buffer) = state.registry.buffer(&agent_id, &tab_id) else {
                send_error(sender, format!("tab not found: {tab_id}")).await;
                return;
            };
            send(sender, &ServerMessage::BufferStats { stats: buffer.stats() }).await;
        }
    }
}

fn release_current_attachment(
    state: &AppState,
    subscriber_id: &str,
    attached_agent: &Option<String>,
    attached_tab: &Option<String>,
) {
    if let (Some(agent_id), Some(tab_id)) = (attached_agent, attached_tab) {
        state.control.release(agent_id, tab_id, subscriber_id);
    }
}

async fn handle_bus_event(
    event: BusEvent,
    subscriber_id: &str,
    attached_agent: &mut Option<String>,
    attached_tab: &mut Option<String>,
    sender: &mut WsSink,
) {
    match event {
        BusEvent::Chunk { agent_id, tab_id, chunk } => {
            if attached_agent.as_deref() == Some(agent_id.as_str()) && attached_tab.as_deref() == Some(tab_id.as_str()) {
                send(sender, &ServerMessage::Output { data: chunk.data, tab_id, seq: chunk.seq }).await;
            }
        }
        BusEvent::AgentsUpdated { agents } => {
            send(sender, &ServerMessage::AgentsUpdated { agents }).await;
        }
        BusEvent::AgentStatus { agent_id, status } => {
            send(sender, &ServerMessage::AgentStatus { agent_id, status }).await;
        }
        BusEvent::TabStatus { agent_id, tab_id, status } => {
            if attached_agent.as_deref() == Some(agent_id.as_str()) {
                send(sender, &ServerMessage::TabStatus { agent_id, tab_id, status }).await;
            }
        }
        BusEvent::TabCreated { agent_id, tab } => {
            if attached_agent.as_deref() == Some(agent_id.as_str()) {
                send(sender, &ServerMessage::TabCreated { agent_id, tab }).await;
            }
        }
        BusEvent::TabClosed { agent_id, tab_id } => {
            if attached_agent.as_deref() == Some(agent_id.as_str()) {
                if attached_tab.as_deref() == Some(tab_id.as_str()) {
                    *attached_tab = None;
                }
                send(sender, &ServerMessage::TabClosed { agent_id, tab_id }).await;
            }
        }
        BusEvent::ControlChanged { agent_id, tab_id, new_owner } => {
            if attached_agent.as_deref() == Some(agent_id.as_str()) && attached_tab.as_deref() == Some(tab_id.as_str()) {
                let has_control = new_owner.as_deref() == Some(subscriber_id);
                send(sender, &ServerMessage::ControlChanged { has_control }).await;
            }
        }
    }
}
