//! # World Core
//!
//! Shared state of the tower and the single task that mutates it.
//!
//! - [`engine`] - the world task, its event intake and tick clocks
//! - [`registry`] - rooms, actors and the occupant index
//! - [`commands`] - verb table, intents and eligibility checks
//! - [`combat`] - encounters, threat and experience splitting
//! - [`respawn`] - jittered mob respawn timers
//! - [`broadcast`] - per-session outbound queues, chat scopes and rate limits
//! - [`persistence`] / [`storage`] - the FIFO persistence worker over sled
//!
//! Content ([`content`]), the canonical [`city`], and the [`generator`] for
//! floors above it are read-only inputs to the core.

pub mod broadcast;
pub mod city;
pub mod clock;
pub mod combat;
pub mod commands;
pub mod content;
pub mod cooldown;
pub mod engine;
pub mod errors;
pub mod filters;
pub mod generator;
mod handlers;
pub mod persistence;
pub mod registry;
pub mod respawn;
pub mod storage;
pub mod types;

pub use engine::{spawn_clocks, Flow, SessionId, World, WorldDeps, WorldEvent, WorldSettings};
pub use errors::WorldError;
pub use registry::WorldRegistry;
