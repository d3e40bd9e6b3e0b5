//! WebSocket handler implementing the kasocki session protocol.
//!
//! One accepted connection drives exactly one [`Session`], entirely from a
//! single task: this module never spawns a second task for a connection, so
//! the single-threaded cooperative model documented on [`Session`] holds
//! without any socket-local locking.
//!
//! # Message protocol
//!
//! **Client → server:**
//! ```json
//! { "event": "subscribe", "id": "1", "payload": ["orders"] }
//! ```
//! `id` is the ack correlation id; omit it to fire-and-forget (no `ack` is
//! sent back, though a failure still produces an `err` event).
//!
//! **Server → client:**
//! ```json
//! { "type": "ready", "availableTopics": ["orders", "payments"] }
//! { "type": "ack", "id": "1", "event": "subscribe", "ok": true, "value": [...] }
//! { "type": "err", "event": "subscribe", "error": { "name": "...", "message": "...", "socket": "..." } }
//! { "type": "message", "message": { ... } }
//! ```

use std::collections::BTreeMap;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use kasocki_core::assignment::SubscribeRequest;
use kasocki_core::error::{KasockiError, WireError};
use kasocki_core::session::{wrap, HandlerOutcome, Session, SessionId};

use crate::state::AppState;

type WsSender = SplitSink<WebSocket, Message>;

/// Upgrade the HTTP connection and hand the socket off to [`handle_socket`].
///
/// # Endpoint
///
/// ```text
/// GET /ws
/// ```
#[allow(clippy::unused_async)]
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// A raw client event as it arrives over the wire.
#[derive(Debug, Deserialize)]
struct ClientEvent {
    event: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// Server-to-client wire events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    Ready {
        #[serde(rename = "availableTopics")]
        available_topics: Vec<String>,
    },
    Ack {
        id: String,
        event: &'static str,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Err {
        event: &'static str,
        error: WireError,
    },
    Message {
        message: Value,
    },
}

async fn send_event(sender: &mut WsSender, event: &ServerEvent) {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(error) => {
            tracing::error!(error = %error, "failed to serialize server event");
            return;
        },
    };
    if sender.send(Message::Text(text)).await.is_err() {
        tracing::debug!("failed to deliver event, socket likely closed");
    }
}

async fn push_emit(sender: &mut WsSender, message: Value) {
    send_event(sender, &ServerEvent::Message { message }).await;
}

/// Deliver a handler's [`HandlerOutcome`]: an `ack` iff the client supplied
/// a correlation `id`, and — on failure — an `err` event regardless, per
/// the handler-wrap's ack-is-optional, err-is-not contract.
async fn deliver<T: Serialize>(
    sender: &mut WsSender,
    event: &'static str,
    id: Option<String>,
    outcome: HandlerOutcome<T>,
) {
    match outcome {
        HandlerOutcome::Ack(value) => {
            if let Some(id) = id {
                let value = serde_json::to_value(&value).unwrap_or(Value::Null);
                send_event(sender, &ServerEvent::Ack { id, event, ok: true, value: Some(value), error: None })
                    .await;
            }
        },
        HandlerOutcome::Err(error) => {
            if let Some(id) = id {
                send_event(
                    sender,
                    &ServerEvent::Ack { id, event, ok: false, value: None, error: Some(error.clone()) },
                )
                .await;
            }
            send_event(sender, &ServerEvent::Err { event, error }).await;
        },
    }
}

/// Parse one text frame and run its handler. Returns `false` when the
/// session should stop reading further events (a `disconnect` event was
/// processed).
async fn dispatch(text: &str, session: &mut Session, sender: &mut WsSender) -> bool {
    let session_id = session.id().clone();
    let ClientEvent { event, id, payload } = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(session = %session_id, error = %error, "malformed client message, ignoring");
            return true;
        },
    };

    match event.as_str() {
        "subscribe" => {
            let outcome = wrap(&session_id, "subscribe", move || async move {
                let request: SubscribeRequest = serde_json::from_value(payload)
                    .map_err(|error| KasockiError::InvalidAssignment(error.to_string()))?;
                session.subscribe(request).await
            })
            .await;
            deliver(sender, "subscribe", id, outcome).await;
        },
        "filter" => {
            let outcome = wrap(&session_id, "filter", move || async move {
                let spec: Option<BTreeMap<String, Value>> = serde_json::from_value(payload)
                    .map_err(|error| KasockiError::InvalidFilter(error.to_string()))?;
                session.filter(spec)
            })
            .await;
            deliver(sender, "filter", id, outcome).await;
        },
        "consume" => {
            let outcome = wrap(&session_id, "consume", move || session.consume()).await;
            deliver(sender, "consume", id, outcome).await;
        },
        "start" => {
            let outcome = wrap(&session_id, "start", move || async move { session.start() }).await;
            deliver(sender, "start", id, outcome).await;
        },
        "stop" => {
            let outcome = wrap(&session_id, "stop", move || async move { session.stop() }).await;
            deliver(sender, "stop", id, outcome).await;
        },
        "disconnect" => {
            let outcome = wrap(&session_id, "disconnect", move || session.disconnect()).await;
            deliver(sender, "disconnect", id, outcome).await;
            return false;
        },
        other => {
            tracing::warn!(session = %session_id, event = other, "unknown socket event, ignoring");
        },
    }
    true
}

/// Drive one session for the lifetime of one accepted connection.
#[allow(clippy::cognitive_complexity)]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = SessionId::new(Uuid::new_v4().to_string());
    let (mut sender, mut receiver) = socket.split();

    let broker = match state.build_broker(&session_id.to_string()) {
        Ok(broker) => broker,
        Err(error) => {
            tracing::warn!(session = %session_id, error = %error, "failed to build broker adapter, closing");
            return;
        },
    };

    let mut session = match Session::connect(session_id.clone(), broker, state.session_config()).await {
        Ok(session) => session,
        Err(error) => {
            tracing::warn!(session = %session_id, error = %error, "session init failed, closing");
            return;
        },
    };

    let available_topics: Vec<String> = session.available_topics().iter().cloned().collect();
    send_event(&mut sender, &ServerEvent::Ready { available_topics }).await;
    tracing::info!(session = %session_id, "session ready");

    loop {
        if session.is_closing() {
            break;
        }
        tokio::select! {
            biased;
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !dispatch(&text, &mut session, &mut sender).await {
                            break;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {},
                    Some(Err(error)) => {
                        tracing::warn!(session = %session_id, error = %error, "socket read error, closing");
                        break;
                    },
                }
            },
            result = session.run_push_loop(|message| push_emit(&mut sender, message)), if session.is_running() => {
                if let Err(error) = result {
                    let wire = error.to_wire(&session_id);
                    send_event(&mut sender, &ServerEvent::Err { event: "message", error: wire }).await;
                    break;
                }
            },
        }
    }

    let _ = session.disconnect().await;
    tracing::info!(session = %session_id, "session closed");
}
