//! Live bar aggregation.
//!
//! [`BarAggregator`] owns the current bar for one subscription and folds
//! ticks into it. It is a plain state machine with no I/O; the live task
//! drives it one message at a time, in arrival order.

use crate::shared::{align_to_bucket, bucket_width_ms, next_boundary, Bar, Tick};

/// What a tick did to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Folded into the current bucket
    Updated,
    /// Opened a new bucket. `continuous` is true when the tick landed exactly
    /// on the previous boundary and the open was carried over.
    Opened { continuous: bool },
}

#[derive(Debug, Clone)]
pub struct BarAggregator {
    resolution: String,
    width_ms: i64,
    current: Bar,
    next_boundary: i64,
}

impl BarAggregator {
    /// Start from `seed`, the last known bar.
    pub fn new(seed: Bar, resolution: &str) -> Self {
        Self {
            resolution: resolution.to_string(),
            width_ms: bucket_width_ms(resolution),
            current: seed,
            next_boundary: next_boundary(&seed, resolution),
        }
    }

    /// Fold `tick` into the series and return the (raw) bar to emit.
    ///
    /// Ticks before the boundary update the current bar in place, including
    /// late ticks for older buckets. A tick at or past the boundary opens a
    /// new bucket aligned to the grid. Volume is last-write: ticks carry the
    /// bucket's running volume.
    pub fn apply(&mut self, tick: &Tick) -> (Bar, TickOutcome) {
        let outcome = if tick.time_ms < self.next_boundary {
            let bar = &mut self.current;
            bar.high = bar.high.max(tick.high);
            bar.low = bar.low.min(tick.low);
            bar.close = tick.close;
            bar.volume = tick.volume;
            TickOutcome::Updated
        } else {
            let continuous = tick.time_ms == self.next_boundary;
            let open = if continuous {
                self.current.close
            } else {
                tick.open
            };
            self.current = Bar {
                start_time: align_to_bucket(tick.time_ms, self.width_ms),
                open,
                high: tick.high,
                low: tick.low,
                close: tick.close,
                volume: tick.volume,
            };
            TickOutcome::Opened { continuous }
        };

        self.current.widen_to_body();
        self.next_boundary = next_boundary(&self.current, &self.resolution);
        (self.current, outcome)
    }

    pub fn current(&self) -> &Bar {
        &self.current
    }

    pub fn next_boundary(&self) -> i64 {
        self.next_boundary
    }

    pub fn bucket_width_ms(&self) -> i64 {
        self.width_ms
    }

    pub fn resolution(&self) -> &str {
        &self.resolution
    }
}
