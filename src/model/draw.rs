//! Draw & Dispatch Descriptions
//!
//! A draw description names the vertex/index data, render targets, shader
//! modules and the binding map of one indexed (or non-indexed) draw. A
//! dispatch description is its compute counterpart.

use std::collections::BTreeMap;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::description::DataKind;
use crate::errors::{PipelineError, Result};

bitflags! {
    /// Shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

/// Where a shader module's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderSource {
    /// WGSL file loaded from disk when the pipeline is built.
    Path(String),
    /// Inline WGSL source.
    Wgsl(String),
}

impl ShaderSource {
    /// Short label used for logging and object names.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Wgsl(_) => "inline",
        }
    }
}

/// One shader entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderEntry {
    pub source: ShaderSource,
    pub entry_point: String,
}

impl ShaderEntry {
    #[must_use]
    pub fn new(source: ShaderSource, entry_point: impl Into<String>) -> Self {
        Self {
            source,
            entry_point: entry_point.into(),
        }
    }
}

/// Vertex + fragment modules of a draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderDescription {
    pub vertex: ShaderEntry,
    pub fragment: Option<ShaderEntry>,
}

impl ShaderDescription {
    /// Both stages from the same WGSL module with `vs_main` / `fs_main`.
    #[must_use]
    pub fn wgsl(source: ShaderSource) -> Self {
        Self {
            vertex: ShaderEntry::new(source.clone(), "vs_main"),
            fragment: Some(ShaderEntry::new(source, "fs_main")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Which resources bind to one shader binding slot.
///
/// Buffers and render targets take one tag per array element. A sampled
/// texture occupies two consecutive slots: the view at the declared index and
/// its sampler at `index + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingDescription {
    pub stages: ShaderStages,
    pub kind: DataKind,
    pub tags: Vec<String>,
}

impl BindingDescription {
    #[must_use]
    pub fn new(stages: ShaderStages, kind: DataKind, tag: impl Into<String>) -> Self {
        Self {
            stages,
            kind,
            tags: vec![tag.into()],
        }
    }
}

/// The three caller-facing words of an indirect draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct DrawArgs {
    /// Index count for indexed draws, vertex count otherwise.
    pub count: u32,
    /// First index (indexed) or first vertex (non-indexed).
    pub first: u32,
    /// Value added to every index before fetching the vertex.
    pub vertex_offset: i32,
}

impl DrawArgs {
    #[inline]
    #[must_use]
    pub const fn new(count: u32, first: u32, vertex_offset: i32) -> Self {
        Self {
            count,
            first,
            vertex_offset,
        }
    }
}

/// Declaration of one draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawDescription {
    tag: String,
    vertex_tag: String,
    #[serde(default)]
    index_tag: Option<String>,
    render_targets: Vec<String>,
    shader: ShaderDescription,
    #[serde(default)]
    topology: PrimitiveTopology,
    #[serde(default)]
    bindings: BTreeMap<u32, BindingDescription>,
    #[serde(default)]
    args: DrawArgs,
}

impl DrawDescription {
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        vertex_tag: impl Into<String>,
        shader: ShaderDescription,
    ) -> Self {
        Self {
            tag: tag.into(),
            vertex_tag: vertex_tag.into(),
            index_tag: None,
            render_targets: Vec::new(),
            shader,
            topology: PrimitiveTopology::default(),
            bindings: BTreeMap::new(),
            args: DrawArgs::default(),
        }
    }

    #[must_use]
    pub fn index(mut self, tag: impl Into<String>) -> Self {
        self.index_tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn render_target(mut self, tag: impl Into<String>) -> Self {
        self.render_targets.push(tag.into());
        self
    }

    #[must_use]
    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Binds `binding` to the given resources. Re-binding an index replaces it.
    #[must_use]
    pub fn bind(mut self, binding: u32, description: BindingDescription) -> Self {
        self.bindings.insert(binding, description);
        self
    }

    #[must_use]
    pub fn args(mut self, args: DrawArgs) -> Self {
        self.args = args;
        self
    }

    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn vertex_tag(&self) -> &str {
        &self.vertex_tag
    }

    #[inline]
    #[must_use]
    pub fn index_tag(&self) -> Option<&str> {
        self.index_tag.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn render_targets(&self) -> &[String] {
        &self.render_targets
    }

    #[inline]
    #[must_use]
    pub fn shader(&self) -> &ShaderDescription {
        &self.shader
    }

    #[inline]
    #[must_use]
    pub fn primitive_topology(&self) -> PrimitiveTopology {
        self.topology
    }

    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &BTreeMap<u32, BindingDescription> {
        &self.bindings
    }

    #[inline]
    #[must_use]
    pub fn initial_args(&self) -> DrawArgs {
        self.args
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PipelineError::InvalidDescription {
            tag: self.tag.clone(),
            reason,
        };
        if self.tag.is_empty() {
            return Err(invalid("empty tag".into()));
        }
        if self.render_targets.is_empty() {
            return Err(invalid("draw has no render target".into()));
        }
        validate_bindings(&self.bindings, false).map_err(invalid)
    }
}

/// Declaration of the single compute kernel of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchDescription {
    tag: String,
    shader: ShaderEntry,
    local_shape: Vec<u32>,
    work_items: u64,
    #[serde(default)]
    bindings: BTreeMap<u32, BindingDescription>,
}

impl DispatchDescription {
    /// `local_shape` has one entry per dimension (1 to 3).
    #[must_use]
    pub fn new(
        tag: impl Into<String>,
        shader: ShaderEntry,
        local_shape: &[u32],
        work_items: u64,
    ) -> Self {
        Self {
            tag: tag.into(),
            shader,
            local_shape: local_shape.to_vec(),
            work_items,
            bindings: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn bind(mut self, binding: u32, description: BindingDescription) -> Self {
        self.bindings.insert(binding, description);
        self
    }

    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn shader(&self) -> &ShaderEntry {
        &self.shader
    }

    #[inline]
    #[must_use]
    pub fn local_shape(&self) -> &[u32] {
        &self.local_shape
    }

    #[inline]
    #[must_use]
    pub fn work_items(&self) -> u64 {
        self.work_items
    }

    #[inline]
    #[must_use]
    pub fn bindings(&self) -> &BTreeMap<u32, BindingDescription> {
        &self.bindings
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PipelineError::InvalidDescription {
            tag: self.tag.clone(),
            reason,
        };
        if self.local_shape.is_empty() || self.local_shape.len() > 3 {
            return Err(invalid("local shape needs 1 to 3 dimensions".into()));
        }
        if self.local_shape.contains(&0) {
            return Err(invalid("local shape has a zero dimension".into()));
        }
        validate_bindings(&self.bindings, true).map_err(invalid)
    }
}

fn validate_bindings(
    bindings: &BTreeMap<u32, BindingDescription>,
    compute: bool,
) -> std::result::Result<(), String> {
    for (index, binding) in bindings {
        if binding.tags.is_empty() {
            return Err(format!("binding {index} has no tags"));
        }
        match binding.kind {
            DataKind::Vertex | DataKind::Index | DataKind::Draw => {
                return Err(format!(
                    "binding {index}: {} data cannot be bound to a shader slot",
                    binding.kind.name()
                ));
            }
            DataKind::RenderTarget if compute => {
                return Err(format!("binding {index}: compute cannot sample render targets"));
            }
            DataKind::Texture | DataKind::RenderTarget => {
                let Some(sampler) = index.checked_add(1) else {
                    return Err(format!("binding {index}: no slot left for the sampler"));
                };
                if bindings.contains_key(&sampler) {
                    return Err(format!(
                        "binding {index}: sampled image needs slot {sampler} for its sampler"
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
