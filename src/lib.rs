//! Lock-free collections with hazard-pointer memory reclamation.
//!
//! This crate provides a hazard pointer table for lock-free memory management
//! and two structures built directly on it: a Michael-Scott FIFO queue and a
//! Treiber LIFO stack. A node removed from either structure is only freed once
//! a scan shows that no thread still publishes its address.
//!
//! Tables are explicit values rather than a global, so several structures can
//! share one table, or each can own its own.

pub mod config;
pub mod error;
pub mod memory;
pub mod structures;

#[cfg(test)]
mod testing;

pub use config::HazardConfig;
pub use error::{HazardError, HazardResult, InsertError};
