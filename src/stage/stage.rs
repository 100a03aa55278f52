//! Stage
//!
//! One node of the pipeline chain. A stage owns its descriptions, its data
//! aliases, its write endpoints and every backend object built from them.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize──► Initialized ◄──resize── ResizePending
//!                                    │    └──mark_resize_pending──┘
//!                                    └──────────destroy──────────► Destroyed
//! ```
//!
//! `initialize` runs every build step:
//!
//! 1. per-slot bookkeeping
//! 2. resources for every description
//! 3. data aliases over those resources
//! 4. write endpoints for every writable tag
//! 5. color and depth attachments at the current viewport
//! 6. the sub-pass over the attachment set
//! 7. the render pass
//! 8. one framebuffer per frame slot
//! 9. one draw pass per draw description, then the dispatch pass
//!
//! `resize` reruns steps 5 to 9 only. Resources that do not depend on the
//! viewport keep their identity, so producers writing through endpoints never
//! observe a resize.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::binding::BindingPlan;
use super::dispatch_pass::DispatchPass;
use super::draw_pass::{DrawInputs, DrawPass};
use super::io::{InputSlot, StageIo};
use crate::backend::{
    AttachmentDesc, Backend, BindingType, BufferId, DeviceBackend, FramebufferDesc, FramebufferId,
    LoadOp, PassSubmission, RenderPassDesc, RenderPassId, RenderSubmission, SubpassDesc,
    TextureDesc, TextureId, TextureUsage, VertexAttributeDesc, VertexLayout, ViewId,
};
use crate::errors::{PipelineError, Result};
use crate::model::{
    BindingDescription, DataKind, Description, DispatchDescription, DrawArgs, DrawDescription,
    Format, UpdateScheme, Viewport, attribute_offsets,
};
use crate::resource::{AliasKind, AliasTable, DataAlias, Resource, ResourceKey, ResourceManager};

type DescriptionTable = BTreeMap<DataKind, BTreeMap<String, Description>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    Uninitialized,
    Initialized,
    ResizePending,
    Destroyed,
}

impl StageState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::ResizePending => "resize pending",
            Self::Destroyed => "destroyed",
        }
    }
}

/// Shared inputs of initialize and resize.
pub(crate) struct StageContext<'a> {
    pub manager: &'a mut ResourceManager,
    pub viewport: Viewport,
    pub current_slot: Arc<AtomicUsize>,
    /// Clear color of owned render targets that do not set one.
    pub clear_color: [f64; 4],
}

/// Per frame slot bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRecord {
    pub slot: usize,
    /// Frames encoded with this slot.
    pub frames: u64,
}

#[derive(Debug, Clone)]
struct ColorTarget {
    tag: String,
    format: Format,
    /// Cleared by this stage, or loaded when a predecessor produced it.
    owned: bool,
    clear: [f64; 4],
    keys: SmallVec<[ResourceKey; 3]>,
}

/// Attachments, render pass and framebuffers of a stage.
struct RenderTargets {
    colors: Vec<ColorTarget>,
    extent: Viewport,
    depth_format: Option<Format>,
    depth_texture: Option<TextureId>,
    depth_view: Option<ViewId>,
    render_pass: Option<RenderPassId>,
    framebuffers: SmallVec<[FramebufferId; 3]>,
    backend: Arc<Backend>,
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.backend.destroy_framebuffer(framebuffer);
        }
        if let Some(pass) = self.render_pass.take() {
            self.backend.destroy_render_pass(pass);
        }
        if let Some(view) = self.depth_view.take() {
            self.backend.destroy_view(view);
        }
        if let Some(texture) = self.depth_texture.take() {
            self.backend.destroy_texture(texture);
        }
    }
}

pub struct Stage {
    name: String,
    state: StageState,
    descriptions: DescriptionTable,
    draws: Vec<DrawDescription>,
    draw_args: FxHashMap<String, DrawArgs>,
    dispatch: Option<DispatchDescription>,
    depth_format: Option<Format>,
    clear_color: [f64; 4],
    frame_lag: usize,
    slots: Vec<SlotRecord>,
    // Built objects; dropped before the aliases they reference.
    draw_passes: Vec<DrawPass>,
    dispatch_pass: Option<DispatchPass>,
    targets: Option<RenderTargets>,
    io: StageIo,
    aliases: AliasTable,
    backend: Option<Arc<Backend>>,
}

// ─── Lookup Helpers ───────────────────────────────────────────────────────────

/// Resolves `(kind, tag)` for a stage.
///
/// Render targets fall back to predecessor stages, nearest first. Every other
/// kind must be declared by the stage itself.
fn lookup<'a>(
    stage: &str,
    own: &'a DescriptionTable,
    predecessors: &'a [Stage],
    kind: DataKind,
    tag: &str,
) -> Result<(&'a Description, bool)> {
    if let Some(desc) = own.get(&kind).and_then(|m| m.get(tag)) {
        return Ok((desc, true));
    }
    if kind == DataKind::RenderTarget
        && let Some(desc) = predecessors
            .iter()
            .rev()
            .find_map(|s| s.description(DataKind::RenderTarget, tag))
    {
        return Ok((desc, false));
    }
    Err(PipelineError::UnresolvedTag {
        stage: stage.to_string(),
        kind,
        tag: tag.to_string(),
    })
}

/// Resource key backing `description` in each frame slot.
fn slot_keys(description: &Description, frame_lag: usize) -> SmallVec<[ResourceKey; 3]> {
    (0..frame_lag)
        .map(|slot| ResourceKey::new(description.tag(), description.update_scheme(), slot))
        .collect()
}

fn bind_alias<'t>(
    aliases: &'t mut AliasTable,
    manager: &ResourceManager,
    description: &Description,
    key: ResourceKey,
) -> Result<&'t DataAlias> {
    let (kind, sampler) = if description.kind().is_image() {
        (
            AliasKind::Image,
            Some(description.sampler_description().unwrap_or_default()),
        )
    } else {
        (AliasKind::Buffer, None)
    };
    aliases.get_or_resolve(key, kind, sampler, manager)
}

fn bound_resource(alias: &DataAlias) -> Result<&Arc<Resource>> {
    alias
        .resource()
        .ok_or(PipelineError::UnknownResource(alias.key()))
}

fn alias_buffer(
    aliases: &mut AliasTable,
    manager: &ResourceManager,
    description: &Description,
    key: ResourceKey,
) -> Result<BufferId> {
    let alias = bind_alias(aliases, manager, description, key)?;
    bound_resource(alias)?
        .buffer()
        .ok_or(PipelineError::UnknownResource(key))
}

/// Builds the bind layout entries and per-slot bind sets of a binding map.
fn plan_bindings(
    stage: &str,
    own: &DescriptionTable,
    predecessors: &[Stage],
    aliases: &mut AliasTable,
    manager: &ResourceManager,
    bindings: &BTreeMap<u32, BindingDescription>,
    compute: bool,
    frame_lag: usize,
) -> Result<BindingPlan> {
    let mut plan = BindingPlan::new(frame_lag);

    for (&index, binding) in bindings {
        let mut resolved = Vec::with_capacity(binding.tags.len());
        for tag in &binding.tags {
            resolved.push(lookup(stage, own, predecessors, binding.kind, tag)?.0);
        }

        match binding.kind {
            DataKind::Uniform | DataKind::Storage => {
                let ty = if binding.kind == DataKind::Uniform {
                    BindingType::UniformBuffer
                } else {
                    BindingType::StorageBuffer {
                        read_only: !compute,
                    }
                };
                let mut per_slot = Vec::with_capacity(frame_lag);
                for slot in 0..frame_lag {
                    let mut ids = SmallVec::new();
                    for desc in &resolved {
                        let key = slot_keys(desc, frame_lag)[slot];
                        ids.push(alias_buffer(aliases, manager, desc, key)?);
                    }
                    per_slot.push(ids);
                }
                plan.push_buffers(index, binding.stages, ty, per_slot);
            }
            DataKind::Texture | DataKind::RenderTarget => {
                let sampler_binding = index.checked_add(1).ok_or_else(|| {
                    PipelineError::InvalidDescription {
                        tag: binding.tags[0].clone(),
                        reason: format!("no sampler slot after binding {index}"),
                    }
                })?;
                let format = resolved[0]
                    .format()
                    .ok_or_else(|| PipelineError::InvalidDescription {
                        tag: resolved[0].tag().to_string(),
                        reason: "image without texel format".into(),
                    })?;
                let mut views = Vec::with_capacity(frame_lag);
                let mut samplers = Vec::with_capacity(frame_lag);
                for slot in 0..frame_lag {
                    let mut ids = SmallVec::new();
                    for (i, desc) in resolved.iter().enumerate() {
                        let key = slot_keys(desc, frame_lag)[slot];
                        let alias = bind_alias(aliases, manager, desc, key)?;
                        ids.push(alias.view().ok_or(PipelineError::UnknownResource(key))?);
                        if i == 0 {
                            samplers
                                .push(alias.sampler().ok_or(PipelineError::UnknownResource(key))?);
                        }
                    }
                    views.push(ids);
                }
                plan.push_texture(index, sampler_binding, binding.stages, format, views, samplers);
            }
            DataKind::Vertex | DataKind::Index | DataKind::Draw => {
                return Err(PipelineError::InvalidDescription {
                    tag: binding.tags[0].clone(),
                    reason: format!("{} data cannot be bound to slot {index}", binding.kind.name()),
                });
            }
        }
    }
    Ok(plan)
}

// ─── Declaration ──────────────────────────────────────────────────────────────

impl Stage {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Uninitialized,
            descriptions: BTreeMap::new(),
            draws: Vec::new(),
            draw_args: FxHashMap::default(),
            dispatch: None,
            depth_format: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_lag: 0,
            slots: Vec::new(),
            draw_passes: Vec::new(),
            dispatch_pass: None,
            targets: None,
            io: StageIo::new(),
            aliases: AliasTable::new(),
            backend: None,
        }
    }

    fn invalid(&self, action: &'static str) -> PipelineError {
        PipelineError::InvalidState {
            stage: self.name.clone(),
            action,
            state: self.state.name(),
        }
    }

    fn ensure_declaring(&self) -> Result<()> {
        match self.state {
            StageState::Uninitialized => Ok(()),
            _ => Err(self.invalid("register declarations")),
        }
    }

    /// Registers a data description. Registering an existing tag replaces it.
    pub fn register(&mut self, description: Description) -> Result<()> {
        self.ensure_declaring()?;
        description.validate()?;
        let replaced = self
            .descriptions
            .entry(description.kind())
            .or_default()
            .insert(description.tag().to_string(), description);
        if let Some(old) = replaced {
            log::debug!("Stage '{}': description '{}' replaced", self.name, old.tag());
        }
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, description: Description) -> Result<Self> {
        self.register(description)?;
        Ok(self)
    }

    pub fn register_draw(&mut self, draw: DrawDescription) -> Result<()> {
        self.ensure_declaring()?;
        draw.validate()?;
        self.draw_args.remove(draw.tag());
        match self.draws.iter_mut().find(|d| d.tag() == draw.tag()) {
            Some(existing) => *existing = draw,
            None => self.draws.push(draw),
        }
        Ok(())
    }

    /// Sets the compute kernel of the stage. A stage runs at most one.
    pub fn register_dispatch(&mut self, dispatch: DispatchDescription) -> Result<()> {
        self.ensure_declaring()?;
        dispatch.validate()?;
        if let Some(existing) = &self.dispatch
            && existing.tag() != dispatch.tag()
        {
            return Err(PipelineError::InvalidDescription {
                tag: dispatch.tag().to_string(),
                reason: format!(
                    "stage '{}' already runs dispatch '{}'",
                    self.name,
                    existing.tag()
                ),
            });
        }
        self.dispatch = Some(dispatch);
        Ok(())
    }

    /// Adds a stage-owned depth attachment of the given format.
    pub fn set_depth_format(&mut self, format: Option<Format>) -> Result<()> {
        self.ensure_declaring()?;
        if let Some(format) = format
            && !format.is_depth()
        {
            return Err(PipelineError::UnsupportedFormat {
                format: format!("{format:?}"),
                usage: "depth attachments",
            });
        }
        self.depth_format = format;
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> StageState {
        self.state
    }

    #[must_use]
    pub fn description(&self, kind: DataKind, tag: &str) -> Option<&Description> {
        self.descriptions.get(&kind).and_then(|m| m.get(tag))
    }

    pub fn descriptions(&self, kind: DataKind) -> impl Iterator<Item = &Description> {
        self.descriptions.get(&kind).into_iter().flat_map(BTreeMap::values)
    }

    #[inline]
    #[must_use]
    pub fn draws(&self) -> &[DrawDescription] {
        &self.draws
    }

    #[inline]
    #[must_use]
    pub fn dispatch(&self) -> Option<&DispatchDescription> {
        self.dispatch.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn depth_format(&self) -> Option<Format> {
        self.depth_format
    }
}

// ─── Build ────────────────────────────────────────────────────────────────────

impl Stage {
    pub(crate) fn initialize(
        &mut self,
        ctx: &mut StageContext<'_>,
        predecessors: &[Stage],
    ) -> Result<()> {
        if self.state != StageState::Uninitialized {
            return Err(self.invalid("initialize"));
        }
        let manager = &mut *ctx.manager;
        let frame_lag = manager.frame_lag();
        let backend = manager.backend().clone();
        log::info!(
            "Initializing stage '{}' ({} draws, frame lag {frame_lag})",
            self.name,
            self.draws.len()
        );

        // (1)
        self.frame_lag = frame_lag;
        self.clear_color = ctx.clear_color;
        self.slots = (0..frame_lag)
            .map(|slot| SlotRecord { slot, frames: 0 })
            .collect();

        // (2)
        for desc in self.descriptions.values().flat_map(BTreeMap::values) {
            manager.claim(&self.name, desc)?;
            manager.create_resource(desc, ctx.viewport, false)?;
        }

        // (3)
        for desc in self.descriptions.values().flat_map(BTreeMap::values) {
            for key in slot_keys(desc, frame_lag) {
                bind_alias(&mut self.aliases, manager, desc, key)?;
            }
        }

        // (4)
        for desc in self.descriptions.values().flat_map(BTreeMap::values) {
            if !desc.kind().is_writable() {
                continue;
            }
            let targets = self.endpoint_targets(desc)?;
            self.io.insert(InputSlot::new(
                &self.name,
                desc.kind(),
                desc.tag(),
                desc.update_scheme(),
                targets,
                backend.clone(),
                ctx.current_slot.clone(),
                frame_lag,
            ));
        }

        self.backend = Some(backend);

        // (5)-(9)
        self.build_viewport_objects(manager, ctx.viewport, predecessors)?;
        self.state = StageState::Initialized;
        Ok(())
    }

    /// Physical instances an endpoint writes: one for Static, one per slot for Dynamic.
    fn endpoint_targets(&self, desc: &Description) -> Result<SmallVec<[Arc<Resource>; 3]>> {
        let instances = match desc.update_scheme() {
            UpdateScheme::Static => 1,
            UpdateScheme::Dynamic => self.frame_lag,
        };
        slot_keys(desc, self.frame_lag)
            .into_iter()
            .take(instances)
            .map(|key| {
                self.aliases
                    .get(key)
                    .and_then(DataAlias::resource)
                    .cloned()
                    .ok_or(PipelineError::UnknownResource(key))
            })
            .collect()
    }

    /// Marks an initialized stage for rebuild.
    pub(crate) fn mark_resize_pending(&mut self) -> Result<()> {
        match self.state {
            StageState::Initialized | StageState::ResizePending => {
                self.state = StageState::ResizePending;
                Ok(())
            }
            _ => Err(self.invalid("resize")),
        }
    }

    /// Rebuilds steps 5 to 9 for a new viewport.
    pub(crate) fn resize(
        &mut self,
        ctx: &mut StageContext<'_>,
        predecessors: &[Stage],
    ) -> Result<()> {
        self.mark_resize_pending()?;
        let manager = &mut *ctx.manager;
        let viewport = ctx.viewport;
        log::debug!(
            "Resizing stage '{}' to {}x{}",
            self.name,
            viewport.width,
            viewport.height
        );

        self.release_viewport_objects();

        // Viewport-sized images are reallocated only when their size changes.
        for desc in self.descriptions.values().flat_map(BTreeMap::values) {
            if !desc.is_viewport_sized() {
                continue;
            }
            let key = slot_keys(desc, self.frame_lag)[0];
            let current = manager.get(key).and_then(|r| r.extent());
            if current != Some(viewport) {
                manager.create_resource(desc, viewport, true)?;
            }
        }

        let rebound = self.aliases.refresh(manager)?;
        if rebound > 0 {
            log::debug!("Stage '{}': {rebound} aliases rebound", self.name);
        }

        for desc in self.descriptions.values().flat_map(BTreeMap::values) {
            if let Some(endpoint) = self.io.get(desc.kind(), desc.tag()) {
                endpoint.retarget(self.endpoint_targets(desc)?);
            }
        }

        self.build_viewport_objects(manager, viewport, predecessors)?;
        self.state = StageState::Initialized;
        Ok(())
    }

    fn release_viewport_objects(&mut self) {
        self.draw_passes.clear();
        self.dispatch_pass = None;
        self.targets = None;
    }

    /// Steps (5) to (9).
    fn build_viewport_objects(
        &mut self,
        manager: &ResourceManager,
        viewport: Viewport,
        predecessors: &[Stage],
    ) -> Result<()> {
        let backend = self.backend.clone().ok_or_else(|| self.invalid("build"))?;

        // (5)-(8)
        let targets = self.build_targets(&backend, manager, predecessors)?;
        let color_formats: Vec<Format> = targets
            .as_ref()
            .map(|t| t.colors.iter().map(|c| c.format).collect())
            .unwrap_or_default();
        let depth_format = targets.as_ref().and_then(|t| t.depth_format);
        let extent = targets.as_ref().map_or(viewport, |t| t.extent);
        self.targets = targets;

        // (9)
        let mut passes = Vec::with_capacity(self.draws.len());
        for draw in &self.draws {
            let (vertex, _) = lookup(
                &self.name,
                &self.descriptions,
                predecessors,
                DataKind::Vertex,
                draw.vertex_tag(),
            )?;
            let offsets = attribute_offsets(vertex.attribute_list());
            let vertex_layout = VertexLayout {
                stride: vertex.stride(),
                attributes: vertex
                    .attribute_list()
                    .iter()
                    .zip(offsets)
                    .enumerate()
                    .map(|(location, (attribute, offset))| VertexAttributeDesc {
                        format: attribute.format,
                        offset,
                        location: location as u32,
                    })
                    .collect(),
            };

            let mut vertex_buffers = SmallVec::new();
            for key in slot_keys(vertex, self.frame_lag) {
                vertex_buffers.push(alias_buffer(&mut self.aliases, manager, vertex, key)?);
            }

            let index = match draw.index_tag() {
                Some(tag) => {
                    let (desc, _) =
                        lookup(&self.name, &self.descriptions, predecessors, DataKind::Index, tag)?;
                    let format = desc.format().ok_or_else(|| PipelineError::InvalidDescription {
                        tag: tag.to_string(),
                        reason: "index data without format".into(),
                    })?;
                    let mut buffers = SmallVec::new();
                    for key in slot_keys(desc, self.frame_lag) {
                        buffers.push(alias_buffer(&mut self.aliases, manager, desc, key)?);
                    }
                    Some((buffers, format))
                }
                None => None,
            };

            let bindings = plan_bindings(
                &self.name,
                &self.descriptions,
                predecessors,
                &mut self.aliases,
                manager,
                draw.bindings(),
                false,
                self.frame_lag,
            )?;

            let args = self
                .draw_args
                .get(draw.tag())
                .copied()
                .unwrap_or_else(|| draw.initial_args());
            passes.push(DrawPass::build(
                &backend,
                DrawInputs {
                    stage: &self.name,
                    draw,
                    args,
                    vertex_layout,
                    vertex_buffers,
                    index,
                    bindings,
                    color_formats: color_formats.clone(),
                    depth_format,
                    viewport: extent,
                },
            )?);
        }
        self.draw_passes = passes;

        if let Some(dispatch) = &self.dispatch {
            let bindings = plan_bindings(
                &self.name,
                &self.descriptions,
                predecessors,
                &mut self.aliases,
                manager,
                dispatch.bindings(),
                true,
                self.frame_lag,
            )?;
            self.dispatch_pass = Some(DispatchPass::build(&backend, &self.name, dispatch, bindings)?);
        }
        Ok(())
    }

    /// Steps (5) to (8): attachments, sub-pass, render pass and framebuffers.
    fn build_targets(
        &mut self,
        backend: &Arc<Backend>,
        manager: &ResourceManager,
        predecessors: &[Stage],
    ) -> Result<Option<RenderTargets>> {
        let mut tags: Vec<&str> = Vec::new();
        for tag in self.draws.iter().flat_map(|d| d.render_targets()) {
            if !tags.contains(&tag.as_str()) {
                tags.push(tag);
            }
        }
        if tags.is_empty() {
            return Ok(None);
        }

        let mut targets = RenderTargets {
            colors: Vec::with_capacity(tags.len()),
            extent: Viewport::default(),
            depth_format: self.depth_format,
            depth_texture: None,
            depth_view: None,
            render_pass: None,
            framebuffers: SmallVec::new(),
            backend: backend.clone(),
        };

        // (5) color attachments
        for tag in tags {
            let (desc, owned) = lookup(
                &self.name,
                &self.descriptions,
                predecessors,
                DataKind::RenderTarget,
                tag,
            )?;
            let format = desc.format().ok_or_else(|| PipelineError::InvalidDescription {
                tag: tag.to_string(),
                reason: "render target without format".into(),
            })?;
            let keys = slot_keys(desc, self.frame_lag);
            for &key in &keys {
                bind_alias(&mut self.aliases, manager, desc, key)?;
            }
            targets.colors.push(ColorTarget {
                tag: tag.to_string(),
                format,
                owned,
                clear: desc.clear_value().unwrap_or(self.clear_color),
                keys,
            });
        }

        // Every attachment instance must share the framebuffer extent.
        let mut extent = None;
        for color in &targets.colors {
            for &key in &color.keys {
                let size = self
                    .aliases
                    .get(key)
                    .and_then(DataAlias::resource)
                    .and_then(|r| r.extent())
                    .ok_or(PipelineError::UnknownResource(key))?;
                match extent {
                    None => extent = Some(size),
                    Some(expected) if expected != size => {
                        return Err(PipelineError::InvalidDescription {
                            tag: color.tag.clone(),
                            reason: format!(
                                "extent {}x{} differs from the attachment extent {}x{}",
                                size.width, size.height, expected.width, expected.height
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        targets.extent = extent.unwrap_or_default();

        // (5) depth attachment
        if let Some(format) = self.depth_format {
            let texture = backend.create_texture(&TextureDesc {
                label: format!("{} depth", self.name),
                width: targets.extent.width,
                height: targets.extent.height,
                format,
                usage: TextureUsage::RENDER_TARGET,
            })?;
            targets.depth_texture = Some(texture);
            targets.depth_view = Some(backend.create_view(texture)?);
        }

        // (6)
        let color_count = targets.colors.len() as u32;
        let subpass = SubpassDesc {
            color: (0..color_count).collect(),
            depth: targets.depth_format.map(|_| color_count),
        };

        // (7)
        let render_pass = backend.create_render_pass(&RenderPassDesc {
            label: format!("{} pass", self.name),
            colors: targets
                .colors
                .iter()
                .map(|c| AttachmentDesc {
                    format: c.format,
                    load: if c.owned {
                        LoadOp::Clear(c.clear)
                    } else {
                        LoadOp::Load
                    },
                    store: true,
                })
                .collect(),
            depth: targets.depth_format.map(|format| AttachmentDesc {
                format,
                load: LoadOp::ClearDepth(1.0),
                store: false,
            }),
            subpass,
        })?;
        targets.render_pass = Some(render_pass);

        // (8)
        for slot in 0..self.frame_lag {
            let mut color_views = Vec::with_capacity(targets.colors.len());
            for color in &targets.colors {
                let key = color.keys[slot];
                let view = self
                    .aliases
                    .get(key)
                    .and_then(DataAlias::view)
                    .ok_or(PipelineError::UnknownResource(key))?;
                color_views.push(view);
            }
            let framebuffer = backend.create_framebuffer(&FramebufferDesc {
                label: format!("{} framebuffer[{slot}]", self.name),
                render_pass,
                color_views,
                depth_view: targets.depth_view,
                extent: targets.extent,
            })?;
            targets.framebuffers.push(framebuffer);
        }

        log::debug!(
            "Stage '{}': {} color attachments at {}x{}{}",
            self.name,
            targets.colors.len(),
            targets.extent.width,
            targets.extent.height,
            if targets.depth_format.is_some() { " + depth" } else { "" }
        );
        Ok(Some(targets))
    }

    /// Tears down everything the stage built. Resources stay with the manager.
    pub(crate) fn destroy(&mut self) {
        if self.state == StageState::Destroyed {
            return;
        }
        log::info!("Destroying stage '{}'", self.name);
        self.release_viewport_objects();
        self.io.clear();
        self.aliases.clear();
        self.slots.clear();
        self.state = StageState::Destroyed;
    }
}

// ─── Frame ────────────────────────────────────────────────────────────────────

impl Stage {
    /// Work of this stage for `slot`. Endpoints must be idle.
    pub(crate) fn encode(&mut self, slot: usize) -> Result<PassSubmission> {
        if self.state != StageState::Initialized {
            return Err(self.invalid("encode a frame"));
        }
        let record = self
            .slots
            .get_mut(slot)
            .ok_or(PipelineError::InvalidFrameSlot {
                slot,
                frame_lag: self.frame_lag,
            })?;
        record.frames += 1;

        let render = self.targets.as_ref().and_then(|targets| {
            Some(RenderSubmission {
                render_pass: targets.render_pass?,
                framebuffer: *targets.framebuffers.get(slot)?,
                commands: self
                    .draw_passes
                    .iter()
                    .filter_map(|p| p.command_list(slot))
                    .collect(),
            })
        });

        Ok(PassSubmission {
            label: self.name.clone(),
            dispatch: self.dispatch_pass.as_ref().and_then(|p| p.recording(slot)),
            render,
        })
    }

    /// Rewrites the indirect arguments of a draw without recording again.
    pub fn set_draw_args(&mut self, tag: &str, args: DrawArgs) -> Result<()> {
        if !self.draws.iter().any(|d| d.tag() == tag) {
            return Err(PipelineError::UnresolvedTag {
                stage: self.name.clone(),
                kind: DataKind::Draw,
                tag: tag.to_string(),
            });
        }
        if let Some(pass) = self.draw_passes.iter_mut().find(|p| p.tag() == tag) {
            pass.set_args(args)?;
        }
        self.draw_args.insert(tag.to_string(), args);
        Ok(())
    }

    /// Write endpoint for `(kind, tag)`.
    pub fn endpoint(&self, kind: DataKind, tag: &str) -> Result<Arc<InputSlot>> {
        self.io
            .get(kind, tag)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownEndpoint {
                stage: self.name.clone(),
                kind,
                tag: tag.to_string(),
            })
    }

    #[inline]
    #[must_use]
    pub fn io(&self) -> &StageIo {
        &self.io
    }

    #[inline]
    #[must_use]
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Resource the stage's alias for `(kind, tag)` is bound to in `slot`.
    ///
    /// Render targets produced by a predecessor are found too once the stage
    /// uses them.
    #[must_use]
    pub fn resource(&self, kind: DataKind, tag: &str, slot: usize) -> Option<Arc<Resource>> {
        let scheme = match self.description(kind, tag) {
            Some(desc) => desc.update_scheme(),
            None => {
                let dynamic = ResourceKey::per_slot(tag, slot);
                return self
                    .aliases
                    .get(dynamic)
                    .or_else(|| self.aliases.get(ResourceKey::fixed(tag)))
                    .and_then(DataAlias::resource)
                    .cloned();
            }
        };
        self.aliases
            .get(ResourceKey::new(tag, scheme, slot))
            .and_then(DataAlias::resource)
            .cloned()
    }

    #[must_use]
    pub fn framebuffer(&self, slot: usize) -> Option<FramebufferId> {
        self.targets.as_ref()?.framebuffers.get(slot).copied()
    }

    #[must_use]
    pub fn render_pass(&self) -> Option<RenderPassId> {
        self.targets.as_ref()?.render_pass
    }

    /// Tags of the color attachments, in attachment order.
    #[must_use]
    pub fn color_attachments(&self) -> Vec<&str> {
        self.targets
            .as_ref()
            .map(|t| t.colors.iter().map(|c| c.tag.as_str()).collect())
            .unwrap_or_default()
    }

    /// Extent of the attachments.
    #[must_use]
    pub fn extent(&self) -> Option<Viewport> {
        self.targets.as_ref().map(|t| t.extent)
    }

    #[must_use]
    pub fn draw_pass(&self, tag: &str) -> Option<&DrawPass> {
        self.draw_passes.iter().find(|p| p.tag() == tag)
    }

    #[inline]
    #[must_use]
    pub fn dispatch_pass(&self) -> Option<&DispatchPass> {
        self.dispatch_pass.as_ref()
    }

    #[must_use]
    pub fn slot_record(&self, slot: usize) -> Option<SlotRecord> {
        self.slots.get(slot).copied()
    }

    /// Texture of the presentable render target for `slot`, if this stage declares one.
    #[must_use]
    pub fn presentable_texture(&self, slot: usize) -> Option<TextureId> {
        self.descriptions(DataKind::RenderTarget)
            .find(|d| d.is_presentable())
            .and_then(|d| self.resource(DataKind::RenderTarget, d.tag(), slot))
            .and_then(|r| r.texture())
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.release_viewport_objects();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeKind, ShaderDescription, ShaderSource};

    fn mesh() -> Description {
        Description::vertex("mesh")
            .attribute(AttributeKind::Position, Format::Rgb32Float)
            .max_units(3)
    }

    fn draw(target: &str) -> DrawDescription {
        DrawDescription::new(
            "draw",
            "mesh",
            ShaderDescription::wgsl(ShaderSource::Wgsl(String::new())),
        )
        .render_target(target)
    }

    #[test]
    fn registering_a_tag_again_replaces_it() {
        let mut stage = Stage::new("scene");
        stage.register(mesh()).unwrap();
        stage.register(mesh().max_units(9)).unwrap();
        assert_eq!(stage.descriptions(DataKind::Vertex).count(), 1);
        assert_eq!(
            stage.description(DataKind::Vertex, "mesh").unwrap().max_unit_count(),
            9
        );
    }

    #[test]
    fn render_targets_resolve_through_predecessors() {
        let mut first = Stage::new("first");
        first
            .register(Description::render_target("color", Format::Rgba8Unorm))
            .unwrap();
        let mut second = Stage::new("second");
        second.register(mesh()).unwrap();
        second.register_draw(draw("color")).unwrap();

        let predecessors = [first];
        let (desc, owned) = lookup(
            "second",
            &second.descriptions,
            &predecessors,
            DataKind::RenderTarget,
            "color",
        )
        .unwrap();
        assert_eq!(desc.tag(), "color");
        assert!(!owned);

        // Only render targets are inherited.
        let err = lookup(
            "second",
            &second.descriptions,
            &predecessors,
            DataKind::Vertex,
            "other",
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnresolvedTag { .. }));
    }

    #[test]
    fn nearest_predecessor_wins() {
        let mut far = Stage::new("far");
        far.register(Description::render_target("color", Format::Rgba8Unorm))
            .unwrap();
        let mut near = Stage::new("near");
        near.register(Description::render_target("color", Format::Rgba16Float))
            .unwrap();
        let predecessors = [far, near];
        let own = DescriptionTable::new();
        let (desc, _) =
            lookup("last", &own, &predecessors, DataKind::RenderTarget, "color").unwrap();
        assert_eq!(desc.format(), Some(Format::Rgba16Float));
    }

    #[test]
    fn depth_format_must_be_a_depth_format() {
        let mut stage = Stage::new("scene");
        assert!(matches!(
            stage.set_depth_format(Some(Format::Rgba8Unorm)),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
        stage.set_depth_format(Some(Format::Depth32Float)).unwrap();
        assert_eq!(stage.depth_format(), Some(Format::Depth32Float));
    }

    #[test]
    fn encode_requires_initialize() {
        let mut stage = Stage::new("scene");
        assert!(matches!(
            stage.encode(0),
            Err(PipelineError::InvalidState { action: "encode a frame", .. })
        ));
    }

    #[test]
    fn destroyed_stage_rejects_declarations() {
        let mut stage = Stage::new("scene");
        stage.destroy();
        assert_eq!(stage.state(), StageState::Destroyed);
        assert!(matches!(
            stage.register(mesh()),
            Err(PipelineError::InvalidState { .. })
        ));
    }
}
