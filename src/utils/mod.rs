// src/utils/mod.rs

pub mod timestamps;

pub use timestamps::{now_iso, parse_timestamp, timestamp_digits, validate_timestamp};
