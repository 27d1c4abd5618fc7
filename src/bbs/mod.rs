//! # BBS Core Module
//!
//! The chat side of the system: everything between "a station's bytes arrived" and
//! "every station sees the message".
//!
//! ## Components
//!
//! - [`decoder`] - byte stream to line reassembly, tolerant of `\r`, `\n` and `\r\n`
//! - [`message_store`] - bounded shared history with count or age retention
//! - [`session`] - per-station state and outbound helpers
//! - [`server`] - the session registry; routes engine events and broadcasts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BbsServer      │ ← session registry, message pipeline
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Session        │ ← one per connected station
//! │  + LineDecoder  │
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  MessageStore   │ ← shared history, RetentionPolicy
//! └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ax25bbs::agwpe::{AgwpeClient, AgwpeSettings};
//! use ax25bbs::bbs::BbsServer;
//! use ax25bbs::config::Config;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let settings = AgwpeSettings::from_config(&config.agwpe);
//!     let engine = AgwpeClient::connect(&settings, &config.station.callsign, tx).await?;
//!     let bbs = Arc::new(BbsServer::from_config(&config, engine));
//!     bbs.pump_events(&mut rx).await
//! }
//! ```

pub mod decoder;
pub mod message_store;
pub mod server;
pub mod session;

pub use server::BbsServer;
