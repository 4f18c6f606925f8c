//! Core types and utilities for the arbitrage bot
//!
//! This crate provides shared types used across all components:
//! - Exchange, symbol and side identifiers
//! - Raw and validated quote snapshots
//! - Triangular cycle model
//! - Arbitrage opportunity types
//! - Configuration and error taxonomy

pub mod types;
pub mod quotes;
pub mod cycles;
pub mod opportunities;
pub mod config;
pub mod errors;

pub use types::*;
pub use quotes::*;
pub use cycles::*;
pub use opportunities::*;
pub use config::*;
pub use errors::*;
