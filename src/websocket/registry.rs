//! URL-keyed registry of shared connections.
//!
//! The registry is owned by the application and handed to whatever needs a
//! socket. Connections are opened on first use and kept for the life of the
//! registry; a connection whose task has given up is replaced on the next
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::websocket::client::{SocketConnection, WebSocketConfig};
use crate::websocket::error::WsResult;

#[derive(Debug, Default)]
pub struct SocketRegistry {
    config: WebSocketConfig,
    connections: Mutex<HashMap<String, Arc<SocketConnection>>>,
}

impl SocketRegistry {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Existing live connection for `url`, or a newly opened one.
    pub async fn get_connection(&self, url: &str) -> WsResult<Arc<SocketConnection>> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(url) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
            tracing::info!(url = %url, "Replacing closed socket connection");
        }

        let connection = SocketConnection::open(url, self.config.clone())?;
        connections.insert(url.to_string(), connection.clone());
        Ok(connection)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) async fn insert(&self, connection: Arc<SocketConnection>) {
        self.connections
            .lock()
            .await
            .insert(connection.url().to_string(), connection);
    }
}
