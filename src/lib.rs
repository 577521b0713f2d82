//! Outcome tracker. Resolves pending trade recommendations into WIN/LOSS
//! outcomes against live market prices.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod prices;
pub mod storage;
pub mod engine;
pub mod server;
