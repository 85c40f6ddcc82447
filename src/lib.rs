//! tinfoilhat — referee engine for attack/defence CTF contests.
//!
//! See `SPEC_FULL.md` at the workspace root for the full module map.
//! This crate exposes the building blocks (`flag`, `probe`, `store`,
//! `round`, `receiver`, `score`, `pulse`, `scoreboard`) and is driven
//! by the `tinfoilhatd` daemon and `tfhctl` operator CLI binaries.

pub mod config;
pub mod context;
pub mod error;
pub mod flag;
pub mod probe;
pub mod pulse;
pub mod receiver;
pub mod round;
pub mod score;
pub mod scoreboard;
pub mod store;
pub mod telemetry;
