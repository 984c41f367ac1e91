// src/connection/frame.rs
//! Wire format of the Misskey streaming API.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::subscription::Subscription;

/// Client → server control frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum OutboundFrame {
    /// Subscribe to `channel`, tagging its events with `id`.
    Connect { channel: String, id: String },
}

impl OutboundFrame {
    pub fn subscribe(subscription: &Subscription) -> Self {
        OutboundFrame::Connect {
            channel: subscription.channel().to_string(),
            id: subscription.id().to_string(),
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Value,
}

/// Body of a `channel` frame: one event scoped to one subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub body: Value,
}

/// Server → client frames, discriminated by their `type` field.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Channel(ChannelEvent),
    Ping,
    Pong,
    /// Anything we do not understand yet. Kept for logging only.
    Other { kind: String, body: Value },
}

impl InboundFrame {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Ok(match envelope.kind.as_str() {
            "channel" => InboundFrame::Channel(serde_json::from_value(envelope.body)?),
            "ping" => InboundFrame::Ping,
            "pong" => InboundFrame::Pong,
            _ => InboundFrame::Other {
                kind: envelope.kind,
                body: envelope.body,
            },
        })
    }
}
