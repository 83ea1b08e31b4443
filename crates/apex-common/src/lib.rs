//! Shared types for the apex trading core.
//!
//! This crate contains the plain data structures that cross subsystem
//! boundaries: market data snapshots, execution reports, and the small
//! enums (side, order type, time-in-force) every component speaks.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::*;
