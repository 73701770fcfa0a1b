//! Message types for the live price socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// REQUEST TYPES (Client → Server)
// ============================================================================

/// Parameters of a live price subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceSubscription {
    /// Upstream resolution token (`"1m"`, `"1h"`, ...)
    pub resolution: String,
    pub pair_address: String,
    pub is_usd: bool,
}

impl PriceSubscription {
    pub fn new(
        pair_address: impl Into<String>,
        resolution: impl Into<String>,
        is_usd: bool,
    ) -> Self {
        Self {
            resolution: resolution.into(),
            pair_address: pair_address.into(),
            is_usd,
        }
    }

    /// Whether a frame tagged with `pair_address` and `resolution` belongs to
    /// this subscription. Missing tags match anything.
    pub fn accepts(&self, pair_address: Option<&str>, resolution: Option<&str>) -> bool {
        pair_address.map_or(true, |p| p.eq_ignore_ascii_case(&self.pair_address))
            && resolution.map_or(true, |r| r.eq_ignore_ascii_case(&self.resolution))
    }
}

/// Control message sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsRequest {
    #[serde(rename = "SUBSCRIBE_PRICE")]
    SubscribePrice(PriceSubscription),
    /// Carries no payload; the server drops every price stream on the socket.
    #[serde(rename = "UNSUBSCRIBE_PRICE")]
    UnsubscribePrice,
}

impl WsRequest {
    pub fn subscribe(subscription: PriceSubscription) -> Self {
        Self::SubscribePrice(subscription)
    }

    pub fn unsubscribe() -> Self {
        Self::UnsubscribePrice
    }
}

// ============================================================================
// RESPONSE TYPES (Server → Client)
// ============================================================================

/// Envelope of an inbound message.
///
/// Only `data` is interpreted. Its fields are read leniently by
/// [`crate::shared::normalize_tick`].
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl InboundMessage {
    /// `data.pair_address`, when the server included one.
    pub fn pair_address(&self) -> Option<&str> {
        self.data.as_ref()?.get("pair_address")?.as_str()
    }

    /// `data.resolution` (upstream token), when the server included one.
    pub fn resolution(&self) -> Option<&str> {
        self.data.as_ref()?.get("resolution")?.as_str()
    }
}

// ============================================================================
// CLIENT EVENTS
// ============================================================================

/// Lifecycle event of a shared connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Socket opened (first time or after a reconnect)
    Connected,

    /// Socket lost
    Disconnected { reason: String },

    /// About to retry after a backoff delay
    Reconnecting { attempt: u32 },

    /// Error occurred
    Error {
        error: super::error::WebSocketError,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    /// Task gave up or was shut down
    Closed,
}
