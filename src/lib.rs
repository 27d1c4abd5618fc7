//! # ax25bbs - Multi-user Chat BBS for AX.25 Packet Radio
//!
//! ax25bbs is a keyboard-to-keyboard chat board for amateur packet radio. Stations
//! connect over AX.25 through an AGWPE-compatible packet engine (normally Direwolf),
//! see the recent conversation, and every line they type is relayed to everyone
//! connected.
//!
//! ## Features
//!
//! - **AGWPE Engine Client**: native Tokio implementation of the AGWPE TCP protocol.
//! - **Line Reassembly**: tolerant of `\r`, `\n` and `\r\n` terminals and arbitrary frame splits.
//! - **Shared History**: in-memory message store bounded by count or by age.
//! - **Daemon Supervision**: starts Direwolf, waits for its AGWPE port, and shuts the BBS
//!   down if it dies.
//! - **Orderly Shutdown**: run-once shutdown sequence with a hard watchdog.
//! - **Config Bootstrap**: generates `direwolf.conf` from detected ALSA capture devices.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ax25bbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("{} on {}:{}", config.station.callsign, config.agwpe.host, config.agwpe.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - line decoder, message store, sessions, and the session registry
//! - [`agwpe`] - AGWPE frame codec and protocol engine client
//! - [`supervisor`] - modem daemon process supervision
//! - [`shutdown`] - shutdown sequencing and watchdog
//! - [`direwolf_config`] - `direwolf.conf` generator
//! - [`config`] - configuration management and validation
//! - [`validation`] - callsign validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   BBS Server    │ ← sessions, history, broadcast
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  AGWPE Engine   │ ← TCP link to Direwolf
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Supervisor    │ ← Direwolf child process
//! └─────────────────┘
//! ```

pub mod agwpe;
pub mod bbs;
pub mod config;
pub mod direwolf_config;
pub mod logutil;
pub mod metrics;
pub mod shutdown;
pub mod supervisor;
pub mod validation;
