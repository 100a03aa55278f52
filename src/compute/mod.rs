//! Compute Support
//!
//! Work-item distribution for dispatches. The per-stage dispatch pass that
//! consumes it lives in [`crate::stage::dispatch_pass`].

pub mod distribution;

pub use distribution::{ComputeLimits, DistributionError, WorkGrid, distribute, pad_to_local};
