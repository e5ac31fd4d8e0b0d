// src/commands/mod.rs

pub mod api;

pub use api::Assistant;
