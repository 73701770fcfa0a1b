//! Shared utilities and types used across the API, WebSocket and feed modules.

pub mod normalize;
pub mod price;
pub mod resolution;
pub mod types;

// Re-export commonly used items
pub use normalize::{normalize_row, normalize_tick};
pub use resolution::{
    align_to_bucket, bucket_width_ms, next_boundary, to_upstream_resolution, Resolution,
};
pub use types::*;
