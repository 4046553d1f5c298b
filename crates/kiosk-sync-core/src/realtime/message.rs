//! Push channel message types
//!
//! Every frame is a JSON text message `{"type": ..., "data": {...}}`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Message discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Menu items or prices changed
    MenuUpdate,
    /// An order moved to a new state
    OrderStatus,
    /// An item went in or out of stock
    AvailabilityUpdate,
    /// Heartbeat
    Ping,
    /// Heartbeat reply
    Pong,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::MenuUpdate => "menu_update",
            MessageType::OrderStatus => "order_status",
            MessageType::AvailabilityUpdate => "availability_update",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// One push channel frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub data: Value,
}

impl ChannelMessage {
    pub fn new(kind: MessageType, data: Value) -> Self {
        Self { kind, data }
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, json!({}))
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, json!({}))
    }

    /// Parse a text frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode as a text frame
    pub fn encode(&self) -> String {
        // A struct of an enum and a Value always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}
