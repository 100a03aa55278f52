//! # Myth Stages
//!
//! A declarative stage pipeline on top of wgpu. Applications describe the
//! data and the draw/dispatch work each stage needs by tag, format and update
//! frequency; the pipeline allocates the resources, keeps one instance per
//! frame in flight where requested, lets producer threads write through
//! fenced endpoints and rebuilds viewport-sized objects on resize.
//!
//! # Modules
//!
//! - [`model`]: descriptions, formats, draw and dispatch declarations
//! - [`resource`]: resource manager, keys and per-stage data aliases
//! - [`stage`]: stages, the chain and stage I/O endpoints
//! - [`sync`]: write fences and frame-slot rotation
//! - [`compute`]: work-item distribution under device limits
//! - [`backend`]: device interface with headless and wgpu implementations

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod backend;
pub mod compute;
pub mod errors;
pub mod model;
pub mod pipeline;
pub mod resource;
pub mod settings;
pub mod stage;
pub mod sync;

pub use backend::{
    Backend, BackendKind, DeviceBackend, DeviceLimits, HeadlessBackend, ImageRegion, WgpuBackend,
};
pub use compute::{ComputeLimits, WorkGrid, distribute};
pub use errors::{PipelineError, Result};
pub use model::{
    Access, Attribute, AttributeKind, BindingDescription, DataKind, Description,
    DispatchDescription, DrawArgs, DrawDescription, Format, ImageExtent, PrimitiveTopology,
    SamplerDescription, ShaderDescription, ShaderEntry, ShaderSource, ShaderStages, UpdateScheme,
    Viewport,
};
pub use pipeline::Pipeline;
pub use resource::{ResourceKey, ResourceManager};
pub use settings::PipelineSettings;
pub use stage::{InputSlot, Stage, StageChain, StageState};
pub use sync::{FrameSync, WriteFence};
