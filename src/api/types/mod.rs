//! Request and response types for the OHLCV REST API.

pub mod ohlcv;

pub use ohlcv::*;
