//! Stages
//!
//! - [`Stage`]: descriptions, aliases, endpoints and built passes of one node
//! - [`StageChain`]: ordered stages, built and resized front to back
//! - [`InputSlot`] / [`StageIo`]: fenced write endpoints for producer threads
//! - [`DrawPass`] / [`DispatchPass`]: backend objects of one draw or kernel

mod binding;
pub mod chain;
pub mod dispatch_pass;
pub mod draw_pass;
pub mod io;
#[allow(clippy::module_inception)]
pub mod stage;

pub use chain::StageChain;
pub use dispatch_pass::DispatchPass;
pub use draw_pass::{DrawPass, indirect_words};
pub use io::{InputSlot, StageIo};
pub(crate) use stage::StageContext;
pub use stage::{SlotRecord, Stage, StageState};
