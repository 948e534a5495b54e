// src/lib.rs

//! Taxwatch Library
//!
//! Extracts property tax balances from county portals, persists
//! per-run snapshots, detects changes between runs and streams run
//! progress to observers.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
