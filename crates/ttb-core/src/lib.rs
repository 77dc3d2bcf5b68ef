//! Core domain + application logic for the Twitter → Telegram relay.
//!
//! This crate is intentionally framework-agnostic. Telegram and the Twitter API
//! live behind ports (traits) implemented in adapter crates.

pub mod chats;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod service;
pub mod subscriptions;
pub mod tweet;
pub mod twitter;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
