//! Declarative Data Model
//!
//! Pure data describing what a stage needs:
//! - [`Description`]: one tagged data item (vertex, index, uniform, storage, texture, render target)
//! - [`DrawDescription`]: one draw and its binding map
//! - [`DispatchDescription`]: the compute kernel of a stage
//!
//! Nothing here touches the backend.

pub mod description;
pub mod draw;
pub mod format;

pub use description::{
    Access, AddressMode, DataKind, Description, FilterMode, ImageExtent, SamplerDescription,
    UpdateScheme, Viewport,
};
pub use draw::{
    BindingDescription, DispatchDescription, DrawArgs, DrawDescription, PrimitiveTopology,
    ShaderDescription, ShaderEntry, ShaderSource, ShaderStages,
};
pub use format::{Attribute, AttributeKind, Format, attribute_offsets, stride};
