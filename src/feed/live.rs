//! Live subscriptions.
//!
//! Subscriptions are kept in a table keyed by subscriber id. Each entry is
//! either still seeding or live, and carries the generation it was created
//! with so that a seed result arriving after the entry was replaced or
//! removed can be recognized and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::feed::aggregator::{BarAggregator, TickOutcome};
use crate::feed::supply::TotalSupply;
use crate::shared::{normalize_tick, to_upstream_resolution, Bar, PriceMode};
use crate::websocket::{HandlerId, HandlerReceiver, InboundMessage, SocketConnection};

/// Consumer of emitted bars.
pub type TickCallback = Arc<dyn Fn(Bar) + Send + Sync>;

/// Resources held by a live subscription.
#[derive(Debug)]
pub struct LiveHandle {
    pub connection: Arc<SocketConnection>,
    pub handler: HandlerId,
    pub task: JoinHandle<()>,
}

impl LiveHandle {
    /// Stop the tick task, detach from the socket and send an unsubscribe.
    pub async fn teardown(self) {
        self.task.abort();
        if let Err(e) = self.connection.unsubscribe(self.handler).await {
            tracing::warn!(handler = %self.handler, error = %e, "Unsubscribe failed");
        }
    }
}

#[derive(Debug)]
enum SlotState {
    Seeding,
    Live(LiveHandle),
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    state: SlotState,
}

#[derive(Debug, Default)]
pub struct LiveSubscriptions {
    next_generation: AtomicU64,
    slots: Mutex<HashMap<String, Slot>>,
}

impl LiveSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber_id` as seeding and return its generation.
    ///
    /// Any previous entry under the same id is torn down. With `exclusive`,
    /// every other entry is torn down as well.
    pub async fn begin(&self, subscriber_id: &str, exclusive: bool) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        let evicted: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock().await;
            let ids: Vec<String> = slots
                .keys()
                .filter(|id| exclusive || id.as_str() == subscriber_id)
                .cloned()
                .collect();
            let evicted = ids
                .into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
                .collect();
            slots.insert(
                subscriber_id.to_string(),
                Slot {
                    generation,
                    state: SlotState::Seeding,
                },
            );
            evicted
        };

        for (id, slot) in evicted {
            tracing::info!(subscriber_id = %id, "Replacing previous subscription");
            if let SlotState::Live(handle) = slot.state {
                handle.teardown().await;
            }
        }

        generation
    }

    /// Whether `generation` is still the current one for `subscriber_id`.
    pub async fn is_current(&self, subscriber_id: &str, generation: u64) -> bool {
        self.slots
            .lock()
            .await
            .get(subscriber_id)
            .is_some_and(|slot| {
                slot.generation == generation && matches!(slot.state, SlotState::Seeding)
            })
    }

    /// Move a seeding entry to live.
    ///
    /// Gives the handle back when the entry is gone or belongs to a newer
    /// generation; the caller must tear it down.
    pub async fn activate(
        &self,
        subscriber_id: &str,
        generation: u64,
        handle: LiveHandle,
    ) -> Result<(), LiveHandle> {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(subscriber_id) {
            Some(slot)
                if slot.generation == generation && matches!(slot.state, SlotState::Seeding) =>
            {
                slot.state = SlotState::Live(handle);
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Remove `subscriber_id`. Returns whether it existed.
    pub async fn end(&self, subscriber_id: &str) -> bool {
        let removed = self.slots.lock().await.remove(subscriber_id);
        match removed {
            Some(slot) => {
                if let SlotState::Live(handle) = slot.state {
                    handle.teardown().await;
                }
                true
            }
            None => false,
        }
    }

    /// Remove `subscriber_id` only while it is still at `generation`.
    pub async fn end_if(&self, subscriber_id: &str, generation: u64) -> bool {
        let removed = {
            let mut slots = self.slots.lock().await;
            match slots.get(subscriber_id) {
                Some(slot) if slot.generation == generation => slots.remove(subscriber_id),
                _ => None,
            }
        };
        match removed {
            Some(slot) => {
                if let SlotState::Live(handle) = slot.state {
                    handle.teardown().await;
                }
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    pub async fn is_live(&self, subscriber_id: &str) -> bool {
        self.slots
            .lock()
            .await
            .get(subscriber_id)
            .is_some_and(|slot| matches!(slot.state, SlotState::Live(_)))
    }
}

/// Per-subscription tick processing.
pub struct LiveStream {
    subscriber_id: String,
    pair_address: String,
    mode: PriceMode,
    supply: TotalSupply,
    aggregator: BarAggregator,
}

impl LiveStream {
    pub fn new(
        subscriber_id: impl Into<String>,
        pair_address: impl Into<String>,
        mode: PriceMode,
        supply: TotalSupply,
        aggregator: BarAggregator,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            pair_address: pair_address.into(),
            mode,
            supply,
            aggregator,
        }
    }

    /// Handle one inbound frame. Returns the bar to emit, if any.
    ///
    /// Malformed frames, frames tagged with another pair or resolution, and
    /// ticks without a timestamp are dropped without touching the aggregator.
    pub fn on_message(&mut self, text: &str) -> Option<Bar> {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(subscriber_id = %self.subscriber_id, error = %e, "Failed to parse socket message");
                return None;
            }
        };

        if let Some(pair) = message.pair_address() {
            if !pair.eq_ignore_ascii_case(&self.pair_address) {
                return None;
            }
        }

        if let Some(resolution) = message.resolution() {
            let expected = to_upstream_resolution(self.aggregator.resolution());
            if !resolution.eq_ignore_ascii_case(expected) {
                return None;
            }
        }

        let Some(tick) = message.data.as_ref().and_then(normalize_tick) else {
            tracing::debug!(subscriber_id = %self.subscriber_id, "Dropping message without a timestamped tick");
            return None;
        };

        let (bar, outcome) = self.aggregator.apply(&tick);
        if let TickOutcome::Opened { continuous } = outcome {
            tracing::debug!(
                subscriber_id = %self.subscriber_id,
                start_time = bar.start_time,
                continuous,
                "Opened new bar"
            );
        }
        Some(self.supply.present(&bar, self.mode))
    }

    pub fn aggregator(&self) -> &BarAggregator {
        &self.aggregator
    }

    /// Consume frames until the handler is detached.
    pub async fn run(mut self, mut rx: HandlerReceiver, on_tick: TickCallback) {
        while let Some(text) = rx.recv().await {
            if let Some(bar) = self.on_message(&text) {
                on_tick(bar);
            }
        }
        tracing::debug!(subscriber_id = %self.subscriber_id, "Live stream ended");
    }
}
