//! Realtime change listener
//!
//! Speaks the Phoenix channel protocol used by the hosted realtime service:
//! join a topic scoped to one conversation, keep it alive with heartbeats and
//! forward every `INSERT` on the chat table to the subscriber. Delivery is
//! at-least-once; de-duplication happens in the reconciler.
//!
//! Reconnects are not attempted. A dropped socket is logged and the
//! subscription goes quiet until the next conversation switch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::conversation::{Message, SessionId};

use super::{ChangeListener, Endpoint, InsertCallback, Subscription};

const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid realtime URL: {0}")]
    InvalidUrl(String),

    #[error("Channel join rejected: {0}")]
    JoinRejected(String),
}

/// Phoenix channel envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl ChannelMessage {
    fn encode(&self) -> String {
        // serialising a struct of strings and a Value cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What an incoming frame means for the subscriber
#[derive(Debug, PartialEq)]
enum Frame {
    Insert(Message),
    Joined,
    Rejected(String),
    Closed,
    Ignored,
}

fn decode_frame(text: &str, topic: &str) -> Frame {
    let message: ChannelMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Unreadable realtime frame: {}", e);
            return Frame::Ignored;
        }
    };

    if message.topic != topic {
        return Frame::Ignored;
    }

    match message.event.as_str() {
        "postgres_changes" => {
            let data = &message.payload["data"];
            if data["type"] != "INSERT" {
                return Frame::Ignored;
            }
            match serde_json::from_value::<Message>(data["record"].clone()) {
                Ok(record) => Frame::Insert(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable inserted row: {}", e);
                    Frame::Ignored
                }
            }
        }
        "phx_reply" if message.reference.as_deref() == Some(JOIN_REF) => {
            match message.payload["status"].as_str() {
                Some("ok") => Frame::Joined,
                _ => Frame::Rejected(message.payload["response"].to_string()),
            }
        }
        "phx_error" => Frame::Rejected(message.payload.to_string()),
        "phx_close" => Frame::Closed,
        _ => Frame::Ignored,
    }
}

/// Change listener backed by the realtime websocket
pub struct RealtimeListener {
    endpoint: Endpoint,
    table: String,
    heartbeat: Duration,
}

impl RealtimeListener {
    pub fn new(endpoint: Endpoint, table: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            endpoint,
            table: table.into(),
            heartbeat,
        }
    }

    fn socket_url(&self) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(self.endpoint.base_url())
            .map_err(|e| RealtimeError::InvalidUrl(e.to_string()))?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => return Err(RealtimeError::InvalidUrl(format!("unsupported scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::InvalidUrl(self.endpoint.base_url().to_string()))?;
        url.set_path("realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", self.endpoint.api_key())
            .append_pair("vsn", PROTOCOL_VERSION);
        Ok(url)
    }

    fn filter(session_id: &SessionId) -> String {
        format!("session_id=eq.{}", session_id)
    }

    fn topic(&self, session_id: &SessionId) -> String {
        format!("realtime:public:{}:{}", self.table, Self::filter(session_id))
    }

    fn join_message(&self, session_id: &SessionId) -> ChannelMessage {
        ChannelMessage {
            topic: self.topic(session_id),
            event: "phx_join".into(),
            payload: json!({
                "config": {
                    "broadcast": {"ack": false, "self": false},
                    "presence": {"key": ""},
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": self.table,
                        "filter": Self::filter(session_id),
                    }],
                    "private": false
                },
                "access_token": self.endpoint.bearer(),
            }),
            reference: Some(JOIN_REF.into()),
            join_ref: Some(JOIN_REF.into()),
        }
    }
}

impl ChangeListener for RealtimeListener {
    fn subscribe(&self, session_id: &SessionId, on_insert: InsertCallback) -> Subscription {
        let url = match self.socket_url() {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(session = %session_id, "Cannot subscribe to changes: {}", e);
                return Subscription::new(|| {});
            }
        };

        let channel = Channel {
            url,
            topic: self.topic(session_id),
            join: self.join_message(session_id),
            heartbeat: self.heartbeat,
            active: Arc::new(AtomicBool::new(true)),
        };
        let active = channel.active.clone();
        let (stop_tx, stop_rx) = oneshot::channel();

        let topic = channel.topic.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.run(on_insert, stop_rx).await {
                tracing::warn!(topic = %topic, "Realtime subscription ended: {}", e);
            }
        });

        tracing::debug!(session = %session_id, "Subscribed to inserts");
        Subscription::new(move || {
            active.store(false, Ordering::SeqCst);
            let _ = stop_tx.send(());
        })
    }
}

struct Channel {
    url: Url,
    topic: String,
    join: ChannelMessage,
    heartbeat: Duration,
    active: Arc<AtomicBool>,
}

impl Channel {
    async fn run(
        self,
        on_insert: InsertCallback,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), RealtimeError> {
        let (socket, _) = tokio::select! {
            connected = connect_async(self.url.as_str()) => connected?,
            _ = &mut stop => return Ok(()),
        };
        let (mut sink, mut stream) = socket.split();

        sink.send(WsMessage::Text(self.join.encode())).await?;

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = &mut stop => {
                    let leave = ChannelMessage {
                        topic: self.topic.clone(),
                        event: "phx_leave".into(),
                        payload: json!({}),
                        reference: Some(next_ref.to_string()),
                        join_ref: Some(JOIN_REF.into()),
                    };
                    sink.send(WsMessage::Text(leave.encode())).await.ok();
                    sink.close().await.ok();
                    tracing::debug!(topic = %self.topic, "Left realtime channel");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let heartbeat = ChannelMessage {
                        topic: "phoenix".into(),
                        event: "heartbeat".into(),
                        payload: json!({}),
                        reference: Some(next_ref.to_string()),
                        join_ref: None,
                    };
                    next_ref += 1;
                    sink.send(WsMessage::Text(heartbeat.encode())).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match decode_frame(&text, &self.topic) {
                        Frame::Insert(message) => {
                            if self.active.load(Ordering::SeqCst) {
                                on_insert(message);
                            }
                        }
                        Frame::Joined => tracing::debug!(topic = %self.topic, "Joined realtime channel"),
                        Frame::Rejected(reason) => return Err(RealtimeError::JoinRejected(reason)),
                        Frame::Closed => {
                            tracing::warn!(topic = %self.topic, "Realtime channel closed by server");
                            return Ok(());
                        }
                        Frame::Ignored => {}
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::warn!(topic = %self.topic, "Realtime socket closed");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}
