//! Gator - a command-line RSS aggregator
//!
//! Users register and follow RSS feeds; the `agg` command polls one feed per tick,
//! stalest first, and stores new posts for `browse`.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod scheduler;
