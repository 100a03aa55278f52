//! Error Types
//!
//! This module defines the error types used throughout the stage pipeline.
//!
//! # Overview
//!
//! The main error type [`PipelineError`] covers:
//! - Backend initialization failures (device, surface, shader modules)
//! - Resource errors (allocation, unsupported formats, access violations)
//! - Declaration errors (unresolved tags, invalid descriptions)
//! - Lifecycle misuse (illegal stage state transitions)
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, PipelineError>`.
//!
//! ```rust,ignore
//! use myth_stages::errors::Result;
//!
//! fn build() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::compute::DistributionError;
use crate::model::DataKind;
use crate::resource::ResourceKey;

/// The main error type for the stage pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// The backend could not be created or is missing a required capability.
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),

    /// A shader module could not be loaded.
    #[error("Failed to load shader '{path}': {reason}")]
    ShaderLoad {
        /// Path the module was requested from
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Configuration file could not be parsed.
    #[error("Settings parse error: {0}")]
    Settings(#[from] serde_json::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// The backend rejected an allocation or command.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The format cannot be used for the requested purpose on this backend.
    #[error("Format {format} is not supported for {usage}")]
    UnsupportedFormat {
        /// Debug name of the format
        format: String,
        /// What the format was requested for
        usage: &'static str,
    },

    /// A resource key was resolved before the resource was created.
    #[error("Resource {0:?} was never created")]
    UnknownResource(ResourceKey),

    /// A backend handle no longer refers to a live object.
    #[error("Stale backend handle: {0}")]
    StaleHandle(&'static str),

    /// Access qualifier forbids the attempted host operation.
    #[error("Resource '{tag}' does not allow {operation}")]
    AccessViolation {
        /// Resource tag
        tag: String,
        /// Attempted operation
        operation: &'static str,
    },

    /// A write or read falls outside the resource.
    #[error("Range {offset}..{end} is outside resource '{tag}' ({size} bytes)")]
    OutOfBounds {
        /// Resource tag
        tag: String,
        /// Start offset in bytes
        offset: u64,
        /// End offset in bytes
        end: u64,
        /// Resource size in bytes
        size: u64,
    },

    /// The backend cannot perform the operation at all.
    #[error("Operation not supported by the {backend} backend: {operation}")]
    Unsupported {
        /// Backend name
        backend: &'static str,
        /// Operation name
        operation: &'static str,
    },

    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// A description is malformed.
    #[error("Invalid description '{tag}': {reason}")]
    InvalidDescription {
        /// Description tag
        tag: String,
        /// What is wrong with it
        reason: String,
    },

    /// A tag referenced by a draw or dispatch is not declared where it may be resolved.
    #[error("Stage '{stage}' cannot resolve {kind:?} tag '{tag}'")]
    UnresolvedTag {
        /// Stage that performed the lookup
        stage: String,
        /// Data kind that was looked up
        kind: DataKind,
        /// Missing tag
        tag: String,
    },

    /// No stage I/O endpoint exists for the requested (kind, tag).
    #[error("Stage '{stage}' has no write endpoint for {kind:?} '{tag}'")]
    UnknownEndpoint {
        /// Stage name
        stage: String,
        /// Data kind
        kind: DataKind,
        /// Tag
        tag: String,
    },

    /// A stage name was not found in the chain.
    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// Frame slot is outside `[0, frame_lag)`.
    #[error("Frame slot {slot} is out of range (frame lag {frame_lag})")]
    InvalidFrameSlot {
        /// Requested slot
        slot: usize,
        /// Configured frame lag
        frame_lag: usize,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The requested lifecycle transition is illegal in the current state.
    #[error("Stage '{stage}' cannot {action} while {state}")]
    InvalidState {
        /// Stage name
        stage: String,
        /// Attempted action
        action: &'static str,
        /// Current state name
        state: &'static str,
    },

    /// The chain was modified after initialization.
    #[error("Stage chain is sealed after initialization")]
    ChainSealed,

    // ========================================================================
    // Compute Errors
    // ========================================================================
    /// Work distribution failed.
    #[error("Work distribution failed: {0}")]
    Distribution(#[from] DistributionError),
}

/// Alias for `Result<T, PipelineError>`.
pub type Result<T> = std::result::Result<T, PipelineError>;
