//! Streaming chat core for local and hosted LLM backends.
//!
//! A [`provider::Provider`] turns one prompt into a stream of turn events,
//! the [`bus::Bus`] relays them to a consumer channel as
//! [`provider::ChatResponseChunk`]s, and each provider keeps the context that
//! makes the next turn coherent.

pub mod app;
pub mod bus;
pub mod cli;
pub mod config;
pub mod logging;
pub mod paths;
pub mod provider;

#[cfg(feature = "tui")]
pub mod tui;
