//! Subscription tracking for a shared connection.
//!
//! Each attached handler owns at most one price subscription. The tracked set
//! is what gets (re)sent whenever the socket opens.

use std::collections::BTreeMap;

use crate::websocket::handlers::HandlerId;
use crate::websocket::types::{PriceSubscription, WsRequest};

#[derive(Debug, Default)]
pub struct SubscriptionManager {
    by_handler: BTreeMap<HandlerId, PriceSubscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `subscription` for `handler`, replacing any previous one.
    pub fn add(&mut self, handler: HandlerId, subscription: PriceSubscription) {
        self.by_handler.insert(handler, subscription);
    }

    pub fn remove(&mut self, handler: HandlerId) -> Option<PriceSubscription> {
        self.by_handler.remove(&handler)
    }

    pub fn get(&self, handler: HandlerId) -> Option<&PriceSubscription> {
        self.by_handler.get(&handler)
    }

    /// Distinct subscribe requests for every tracked subscription, in handler
    /// attach order.
    pub fn subscribe_requests(&self) -> Vec<WsRequest> {
        let mut seen = Vec::new();
        for sub in self.by_handler.values() {
            if !seen.contains(&sub) {
                seen.push(sub);
            }
        }
        seen.into_iter()
            .map(|sub| WsRequest::subscribe(sub.clone()))
            .collect()
    }

    /// Handlers whose subscription does not accept a frame with these tags.
    /// Handlers without a subscription are never listed.
    pub fn rejecting(
        &self,
        pair_address: Option<&str>,
        resolution: Option<&str>,
    ) -> Vec<HandlerId> {
        self.by_handler
            .iter()
            .filter(|(_, sub)| !sub.accepts(pair_address, resolution))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.by_handler.len()
    }

    pub fn has_subscriptions(&self) -> bool {
        !self.by_handler.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_handler.clear();
    }
}
