//! Shared live socket connections.
//!
//! One [`SocketConnection`] per endpoint URL, obtained through a
//! [`SocketRegistry`]. Subscribers attach a handler, register a price
//! subscription, and receive every inbound text frame.
//!
//! ```rust,ignore
//! use chartfeed::websocket::{PriceSubscription, SocketRegistry};
//!
//! let registry = SocketRegistry::default();
//! let conn = registry.get_connection("wss://ws.example.com").await?;
//! let (handler, mut rx) = conn.attach().await;
//! conn.subscribe(handler, PriceSubscription::new("0xpair", "1m", true)).await?;
//!
//! while let Some(text) = rx.recv().await {
//!     println!("{}", text);
//! }
//! ```

pub mod client;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod subscriptions;
pub mod types;

pub use client::{ConnectionEvents, SocketConnection, WebSocketConfig};
pub use error::{WebSocketError, WsResult};
pub use handlers::{HandlerId, HandlerReceiver};
pub use registry::SocketRegistry;
pub use types::{ConnectionEvent, ConnectionState, InboundMessage, PriceSubscription, WsRequest};
