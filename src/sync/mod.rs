//! Synchronization
//!
//! - [`WriteFence`]: producer/consumer fence of one stage I/O endpoint
//! - [`FrameSync`]: frames-in-flight slot rotation

pub mod fence;
pub mod frame;

pub use fence::WriteFence;
pub use frame::FrameSync;
