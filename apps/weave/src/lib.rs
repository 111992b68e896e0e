//! # weave
//!
//! Command-line driver for `weave-core`: schema checks, generation order,
//! draft previews and cascades against an in-memory store.

pub mod cli;
pub mod config;
pub mod http;
