//! # claimsweep
//!
//! Coordinator-free work claiming over a Postgres ledger.
//!
//! Independent worker processes drain a shared backlog of requests. Each
//! request is executed by exactly one worker at a time, in approximate id
//! order. Workers coordinate only through non-blocking row locks: rows held
//! by another claim are skipped, never waited on. A crashed worker's open
//! transaction rolls back, so its rows are simply `new` again.
//!
//! - [`db`]: the ledger and claim transactions
//! - [`engine`]: sweep controller and wake listener
//! - [`executor`]: the domain action seam

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod telemetry;
