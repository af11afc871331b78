//! Utility modules for taskwatch.
//!
//! # Modules
//!
//! - [`lock`]: Advisory lock files guarding the per-user heartbeat

pub mod lock;

pub use lock::AdvisoryLock;
