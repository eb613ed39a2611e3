//! # TowerMUD - a persistent tower-climbing MUD server
//!
//! Players connect over a plain line transport (telnet-style) or a websocket,
//! share one persistent world, fight mobs on procedurally generated floors
//! above a safe city, and trade from stalls.
//!
//! ## Features
//!
//! - **Single-writer world**: every mutation happens on one task that drains an
//!   ordered event queue, so commands, combat ticks and respawns never race.
//! - **Encounters**: threat tracking, flee rolls, stuns and proportional
//!   experience splits.
//! - **Chat**: room, floor and private scopes with ignore lists, a word filter
//!   and per-player rate limits.
//! - **Persistence**: sled-backed player and tower snapshots written by one
//!   worker thread in FIFO order; Argon2id account passwords.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use towermud::config::Config;
//! use towermud::server::TowerServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let server = TowerServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`world`] - the core: registry, combat, respawn, chat, persistence
//! - [`net`] - transports and the login handshake
//! - [`server`] - startup and shutdown wiring
//! - [`config`] - TOML configuration
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log-safe text helpers
//!
//! ## Architecture
//!
//! ```text
//!  line / websocket sessions ──┐
//!  combat / respawn / autosave ├──► intake queue ──► world task ──► per-session outbound queues
//!  floor generation results ───┘                        │
//!                                                       ▼
//!                                           persistence worker (sled)
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod net;
pub mod server;
pub mod world;
