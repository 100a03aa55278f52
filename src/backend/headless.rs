//! Headless Backend
//!
//! A host-memory implementation of [`DeviceBackend`]. Buffers and textures
//! are byte vectors, every other object is its descriptor kept in a slot map,
//! and submitted frames are appended to an inspectable log instead of being
//! executed.
//!
//! The backend validates what a real device would: handles must be live,
//! bind sets must match their layout, framebuffer views must match the
//! framebuffer extent and writes must stay in bounds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use super::{
    BackendKind, BindLayoutId, BindSetDesc, BindSetId, BindingType, BoundResource, BufferDesc,
    BufferId, CommandListId, ComputePipelineDesc, DeviceBackend, DeviceLimits, DrawRecording,
    FrameSubmission, FramebufferDesc, FramebufferId, GraphicsPipelineDesc, ImageRegion,
    LayoutEntry, PipelineId, PipelineLayoutId, RenderPassDesc, RenderPassId, SamplerId, ShaderId,
    TextureDesc, TextureId, ViewId,
};
use crate::errors::{PipelineError, Result};
use crate::model::{SamplerDescription, ShaderSource, Viewport};

struct HostBuffer {
    desc: BufferDesc,
    data: Mutex<Vec<u8>>,
}

struct HostTexture {
    desc: TextureDesc,
    data: Mutex<Vec<u8>>,
}

struct HostView {
    texture: TextureId,
    extent: Viewport,
}

struct HostPipeline {
    label: String,
    layout: PipelineLayoutId,
    compute: bool,
}

#[derive(Default)]
struct HostObjects {
    views: SlotMap<ViewId, HostView>,
    samplers: SlotMap<SamplerId, SamplerDescription>,
    bind_layouts: SlotMap<BindLayoutId, Vec<LayoutEntry>>,
    pipeline_layouts: SlotMap<PipelineLayoutId, Vec<BindLayoutId>>,
    shaders: SlotMap<ShaderId, String>,
    pipelines: SlotMap<PipelineId, HostPipeline>,
    bind_sets: SlotMap<BindSetId, BindSetDesc>,
    render_passes: SlotMap<RenderPassId, RenderPassDesc>,
    framebuffers: SlotMap<FramebufferId, FramebufferDesc>,
    command_lists: SlotMap<CommandListId, DrawRecording>,
}

impl HostObjects {
    fn len(&self) -> usize {
        self.views.len()
            + self.samplers.len()
            + self.bind_layouts.len()
            + self.pipeline_layouts.len()
            + self.shaders.len()
            + self.pipelines.len()
            + self.bind_sets.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.command_lists.len()
    }
}

/// One draw as the device would have executed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDraw {
    pub label: String,
    pub indexed: bool,
    /// Indirect words read from the draw's argument buffer at submit time.
    pub args: Vec<u32>,
}

/// One stage's work inside a submitted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub label: String,
    pub dispatch: Option<[u32; 3]>,
    pub framebuffer: Option<FramebufferId>,
    pub color_views: Vec<ViewId>,
    pub draws: Vec<RecordedDraw>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub slot: usize,
    pub passes: Vec<PassRecord>,
    pub presented: Option<TextureId>,
}

pub struct HeadlessBackend {
    limits: DeviceLimits,
    buffers: RwLock<SlotMap<BufferId, Arc<HostBuffer>>>,
    textures: RwLock<SlotMap<TextureId, Arc<HostTexture>>>,
    objects: Mutex<HostObjects>,
    submissions: Mutex<Vec<SubmissionRecord>>,
    surface: Mutex<Option<Viewport>>,
    lost: AtomicBool,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(limits: DeviceLimits) -> Self {
        log::info!("Headless backend created");
        Self {
            limits,
            buffers: RwLock::new(SlotMap::with_key()),
            textures: RwLock::new(SlotMap::with_key()),
            objects: Mutex::new(HostObjects::default()),
            submissions: Mutex::new(Vec::new()),
            surface: Mutex::new(None),
            lost: AtomicBool::new(false),
        }
    }

    /// Simulates a lost device: every later submit or wait fails.
    pub fn lose_device(&self) {
        log::warn!("Headless device marked as lost");
        self.lost.store(true, Ordering::Release);
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.lost.load(Ordering::Acquire) {
            return Err(PipelineError::Backend("device lost".into()));
        }
        Ok(())
    }

    fn buffer(&self, id: BufferId) -> Result<Arc<HostBuffer>> {
        self.buffers
            .read()
            .get(id)
            .cloned()
            .ok_or(PipelineError::StaleHandle("buffer"))
    }

    fn texture(&self, id: TextureId) -> Result<Arc<HostTexture>> {
        self.textures
            .read()
            .get(id)
            .cloned()
            .ok_or(PipelineError::StaleHandle("texture"))
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    /// Total number of live backend objects of every type.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.buffers.read().len() + self.textures.read().len() + self.objects.lock().len()
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.read().len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.read().len()
    }

    /// Full texel contents of a texture.
    pub fn texture_data(&self, id: TextureId) -> Result<Vec<u8>> {
        Ok(self.texture(id)?.data.lock().clone())
    }

    #[must_use]
    pub fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.read().get(id).map(|t| t.desc.clone())
    }

    #[must_use]
    pub fn buffer_desc(&self, id: BufferId) -> Option<BufferDesc> {
        self.buffers.read().get(id).map(|b| b.desc.clone())
    }

    #[must_use]
    pub fn framebuffer_desc(&self, id: FramebufferId) -> Option<FramebufferDesc> {
        self.objects.lock().framebuffers.get(id).cloned()
    }

    #[must_use]
    pub fn render_pass_desc(&self, id: RenderPassId) -> Option<RenderPassDesc> {
        self.objects.lock().render_passes.get(id).cloned()
    }

    /// Texture a view was created from.
    #[must_use]
    pub fn view_texture(&self, id: ViewId) -> Option<TextureId> {
        self.objects.lock().views.get(id).map(|v| v.texture)
    }

    #[must_use]
    pub fn pipeline_label(&self, id: PipelineId) -> Option<String> {
        self.objects.lock().pipelines.get(id).map(|p| p.label.clone())
    }

    #[must_use]
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().clone()
    }

    #[must_use]
    pub fn last_submission(&self) -> Option<SubmissionRecord> {
        self.submissions.lock().last().cloned()
    }

    #[must_use]
    pub fn surface_size(&self) -> Option<Viewport> {
        *self.surface.lock()
    }

    // ─── Validation ───────────────────────────────────────────────────────────

    fn check_bind_set(&self, objects: &HostObjects, desc: &BindSetDesc) -> Result<()> {
        let layout = objects
            .bind_layouts
            .get(desc.layout)
            .ok_or(PipelineError::StaleHandle("bind layout"))?;
        if layout.len() != desc.entries.len() {
            return Err(PipelineError::Backend(format!(
                "bind set '{}' has {} entries, layout expects {}",
                desc.label,
                desc.entries.len(),
                layout.len()
            )));
        }

        let buffers = self.buffers.read();
        for entry in &desc.entries {
            let slot = layout
                .iter()
                .find(|l| l.binding == entry.binding)
                .ok_or_else(|| {
                    PipelineError::Backend(format!(
                        "bind set '{}': binding {} is not in the layout",
                        desc.label, entry.binding
                    ))
                })?;

            let (matches, count) = match (&entry.resource, slot.ty) {
                (
                    BoundResource::Buffers(ids),
                    BindingType::UniformBuffer | BindingType::StorageBuffer { .. },
                ) => {
                    if ids.iter().any(|id| !buffers.contains_key(*id)) {
                        return Err(PipelineError::StaleHandle("buffer"));
                    }
                    (true, ids.len())
                }
                (BoundResource::Views(ids), BindingType::SampledTexture { .. }) => {
                    if ids.iter().any(|id| !objects.views.contains_key(*id)) {
                        return Err(PipelineError::StaleHandle("view"));
                    }
                    (true, ids.len())
                }
                (BoundResource::Sampler(id), BindingType::Sampler { .. }) => {
                    if !objects.samplers.contains_key(*id) {
                        return Err(PipelineError::StaleHandle("sampler"));
                    }
                    (true, 1)
                }
                _ => (false, 0),
            };
            if !matches || count != slot.count as usize {
                return Err(PipelineError::Backend(format!(
                    "bind set '{}': binding {} does not match its layout entry",
                    desc.label, entry.binding
                )));
            }
        }
        Ok(())
    }
}

impl DeviceBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    // ─── Buffers ──────────────────────────────────────────────────────────────

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        if desc.size == 0 || desc.size > self.limits.max_buffer_size {
            return Err(PipelineError::Backend(format!(
                "buffer '{}' size {} is outside 1..={}",
                desc.label, desc.size, self.limits.max_buffer_size
            )));
        }
        let len = usize::try_from(desc.size)
            .map_err(|_| PipelineError::Backend(format!("buffer '{}' too large", desc.label)))?;
        let buffer = HostBuffer {
            desc: desc.clone(),
            data: Mutex::new(vec![0; len]),
        };
        Ok(self.buffers.write().insert(Arc::new(buffer)))
    }

    fn destroy_buffer(&self, id: BufferId) {
        self.buffers.write().remove(id);
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffer(id)?;
        let end = offset.checked_add(data.len() as u64);
        let Some(end) = end.filter(|&end| end <= buffer.desc.size) else {
            return Err(PipelineError::Backend(format!(
                "write of {} bytes at {offset} overruns buffer '{}'",
                data.len(),
                buffer.desc.label
            )));
        };
        buffer.data.lock()[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>> {
        let buffer = self.buffer(id)?;
        let Some(end) = offset.checked_add(len).filter(|&end| end <= buffer.desc.size) else {
            return Err(PipelineError::Backend(format!(
                "read of {len} bytes at {offset} overruns buffer '{}'",
                buffer.desc.label
            )));
        };
        Ok(buffer.data.lock()[offset as usize..end as usize].to_vec())
    }

    // ─── Textures ─────────────────────────────────────────────────────────────

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        let max = self.limits.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(PipelineError::Backend(format!(
                "texture '{}' extent {}x{} is outside 1..={max}",
                desc.label, desc.width, desc.height
            )));
        }
        let len = desc.width as usize * desc.height as usize * desc.format.byte_size() as usize;
        let texture = HostTexture {
            desc: desc.clone(),
            data: Mutex::new(vec![0; len]),
        };
        Ok(self.textures.write().insert(Arc::new(texture)))
    }

    fn destroy_texture(&self, id: TextureId) {
        self.textures.write().remove(id);
    }

    fn write_texture(&self, id: TextureId, region: ImageRegion, data: &[u8]) -> Result<()> {
        let texture = self.texture(id)?;
        let desc = &texture.desc;
        let fits = |start: u32, len: u32, limit: u32| {
            start.checked_add(len).is_some_and(|end| end <= limit)
        };
        if !fits(region.x, region.width, desc.width) || !fits(region.y, region.height, desc.height) {
            return Err(PipelineError::Backend(format!(
                "region {region:?} is outside texture '{}' ({}x{})",
                desc.label, desc.width, desc.height
            )));
        }

        let texel = desc.format.byte_size() as usize;
        let row = region.width as usize * texel;
        if data.len() != row * region.height as usize {
            return Err(PipelineError::Backend(format!(
                "texture '{}': {} bytes supplied for a {}x{} region",
                desc.label,
                data.len(),
                region.width,
                region.height
            )));
        }

        let pitch = desc.width as usize * texel;
        let mut texels = texture.data.lock();
        for (y, src) in data.chunks_exact(row).enumerate() {
            let start = (region.y as usize + y) * pitch + region.x as usize * texel;
            texels[start..start + row].copy_from_slice(src);
        }
        Ok(())
    }

    fn create_view(&self, texture: TextureId) -> Result<ViewId> {
        let texture_ref = self.texture(texture)?;
        let extent = Viewport::new(texture_ref.desc.width, texture_ref.desc.height);
        Ok(self.objects.lock().views.insert(HostView { texture, extent }))
    }

    fn destroy_view(&self, id: ViewId) {
        self.objects.lock().views.remove(id);
    }

    fn create_sampler(&self, desc: &SamplerDescription) -> Result<SamplerId> {
        Ok(self.objects.lock().samplers.insert(*desc))
    }

    fn destroy_sampler(&self, id: SamplerId) {
        self.objects.lock().samplers.remove(id);
    }

    // ─── Layouts, Shaders, Pipelines ──────────────────────────────────────────

    fn create_bind_layout(&self, label: &str, entries: &[LayoutEntry]) -> Result<BindLayoutId> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.binding == entry.binding) {
                return Err(PipelineError::Backend(format!(
                    "bind layout '{label}' declares binding {} twice",
                    entry.binding
                )));
            }
        }
        Ok(self.objects.lock().bind_layouts.insert(entries.to_vec()))
    }

    fn destroy_bind_layout(&self, id: BindLayoutId) {
        self.objects.lock().bind_layouts.remove(id);
    }

    fn create_pipeline_layout(&self, label: &str, sets: &[BindLayoutId]) -> Result<PipelineLayoutId> {
        let mut objects = self.objects.lock();
        if sets.iter().any(|s| !objects.bind_layouts.contains_key(*s)) {
            return Err(PipelineError::Backend(format!(
                "pipeline layout '{label}' references a destroyed bind layout"
            )));
        }
        Ok(objects.pipeline_layouts.insert(sets.to_vec()))
    }

    fn destroy_pipeline_layout(&self, id: PipelineLayoutId) {
        self.objects.lock().pipeline_layouts.remove(id);
    }

    fn create_shader(&self, source: &ShaderSource) -> Result<ShaderId> {
        Ok(self.objects.lock().shaders.insert(source.label().to_string()))
    }

    fn destroy_shader(&self, id: ShaderId) {
        self.objects.lock().shaders.remove(id);
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineId> {
        let mut objects = self.objects.lock();
        if !objects.pipeline_layouts.contains_key(desc.layout) {
            return Err(PipelineError::StaleHandle("pipeline layout"));
        }
        let modules = std::iter::once(&desc.vertex).chain(desc.fragment.as_ref());
        for module in modules {
            if !objects.shaders.contains_key(module.module) {
                return Err(PipelineError::StaleHandle("shader"));
            }
        }
        if desc.color_formats.is_empty() {
            return Err(PipelineError::Backend(format!(
                "pipeline '{}' has no color target",
                desc.label
            )));
        }
        if desc.viewport.is_empty() {
            return Err(PipelineError::Backend(format!(
                "pipeline '{}' has an empty viewport",
                desc.label
            )));
        }
        Ok(objects.pipelines.insert(HostPipeline {
            label: desc.label.clone(),
            layout: desc.layout,
            compute: false,
        }))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        let mut objects = self.objects.lock();
        if !objects.pipeline_layouts.contains_key(desc.layout) {
            return Err(PipelineError::StaleHandle("pipeline layout"));
        }
        if !objects.shaders.contains_key(desc.shader.module) {
            return Err(PipelineError::StaleHandle("shader"));
        }
        Ok(objects.pipelines.insert(HostPipeline {
            label: desc.label.clone(),
            layout: desc.layout,
            compute: true,
        }))
    }

    fn destroy_pipeline(&self, id: PipelineId) {
        self.objects.lock().pipelines.remove(id);
    }

    fn create_bind_set(&self, desc: &BindSetDesc) -> Result<BindSetId> {
        let mut objects = self.objects.lock();
        self.check_bind_set(&objects, desc)?;
        Ok(objects.bind_sets.insert(desc.clone()))
    }

    fn destroy_bind_set(&self, id: BindSetId) {
        self.objects.lock().bind_sets.remove(id);
    }

    // ─── Passes & Recording ───────────────────────────────────────────────────

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        let color_count = desc.colors.len() as u32;
        if desc.subpass.color.iter().any(|&c| c >= color_count)
            || desc.subpass.depth.is_some() != desc.depth.is_some()
        {
            return Err(PipelineError::Backend(format!(
                "render pass '{}' sub-pass references missing attachments",
                desc.label
            )));
        }
        Ok(self.objects.lock().render_passes.insert(desc.clone()))
    }

    fn destroy_render_pass(&self, id: RenderPassId) {
        self.objects.lock().render_passes.remove(id);
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId> {
        let mut objects = self.objects.lock();
        let pass = objects
            .render_passes
            .get(desc.render_pass)
            .ok_or(PipelineError::StaleHandle("render pass"))?;
        if pass.colors.len() != desc.color_views.len()
            || pass.depth.is_some() != desc.depth_view.is_some()
        {
            return Err(PipelineError::Backend(format!(
                "framebuffer '{}' does not match its render pass attachments",
                desc.label
            )));
        }

        for view in desc.color_views.iter().chain(desc.depth_view.as_ref()) {
            let view = objects
                .views
                .get(*view)
                .ok_or(PipelineError::StaleHandle("view"))?;
            if view.extent != desc.extent {
                return Err(PipelineError::Backend(format!(
                    "framebuffer '{}' is {}x{} but an attachment is {}x{}",
                    desc.label,
                    desc.extent.width,
                    desc.extent.height,
                    view.extent.width,
                    view.extent.height
                )));
            }
        }
        Ok(objects.framebuffers.insert(desc.clone()))
    }

    fn destroy_framebuffer(&self, id: FramebufferId) {
        self.objects.lock().framebuffers.remove(id);
    }

    fn record_draw(&self, recording: &DrawRecording) -> Result<CommandListId> {
        let mut objects = self.objects.lock();
        match objects.pipelines.get(recording.pipeline) {
            Some(p) if !p.compute => {}
            Some(_) => {
                return Err(PipelineError::Backend(format!(
                    "draw '{}' uses a compute pipeline",
                    recording.label
                )));
            }
            None => return Err(PipelineError::StaleHandle("pipeline")),
        }
        if recording
            .bind_sets
            .iter()
            .any(|s| !objects.bind_sets.contains_key(*s))
        {
            return Err(PipelineError::StaleHandle("bind set"));
        }
        {
            let buffers = self.buffers.read();
            let referenced = [recording.vertex_buffer, recording.indirect]
                .into_iter()
                .chain(recording.index.map(|(id, _)| id));
            for id in referenced {
                if !buffers.contains_key(id) {
                    return Err(PipelineError::StaleHandle("buffer"));
                }
            }
        }
        Ok(objects.command_lists.insert(recording.clone()))
    }

    fn destroy_command_list(&self, id: CommandListId) {
        self.objects.lock().command_lists.remove(id);
    }

    fn submit_frame(&self, frame: &FrameSubmission) -> Result<()> {
        self.ensure_alive()?;
        let mut passes = Vec::with_capacity(frame.passes.len());
        {
            let objects = self.objects.lock();
            for pass in &frame.passes {
                let mut record = PassRecord {
                    label: pass.label.clone(),
                    dispatch: None,
                    framebuffer: None,
                    color_views: Vec::new(),
                    draws: Vec::new(),
                };

                if let Some(dispatch) = &pass.dispatch {
                    let pipeline = objects
                        .pipelines
                        .get(dispatch.pipeline)
                        .ok_or(PipelineError::StaleHandle("pipeline"))?;
                    debug_assert!(objects.pipeline_layouts.contains_key(pipeline.layout));
                    if let Some(set) = dispatch.bind_set
                        && !objects.bind_sets.contains_key(set)
                    {
                        return Err(PipelineError::StaleHandle("bind set"));
                    }
                    record.dispatch = Some(dispatch.groups);
                }

                if let Some(render) = &pass.render {
                    if !objects.render_passes.contains_key(render.render_pass) {
                        return Err(PipelineError::StaleHandle("render pass"));
                    }
                    let framebuffer = objects
                        .framebuffers
                        .get(render.framebuffer)
                        .ok_or(PipelineError::StaleHandle("framebuffer"))?;
                    record.framebuffer = Some(render.framebuffer);
                    record.color_views.clone_from(&framebuffer.color_views);

                    for list in &render.commands {
                        let draw = objects
                            .command_lists
                            .get(*list)
                            .ok_or(PipelineError::StaleHandle("command list"))?;
                        let words = if draw.index.is_some() { 5 } else { 4 };
                        let bytes = self.read_buffer(draw.indirect, 0, words * 4)?;
                        record.draws.push(RecordedDraw {
                            label: draw.label.clone(),
                            indexed: draw.index.is_some(),
                            args: bytes
                                .chunks_exact(4)
                                .map(bytemuck::pod_read_unaligned::<u32>)
                                .collect(),
                        });
                    }
                }
                passes.push(record);
            }
        }

        if let Some(present) = frame.present {
            self.texture(present)?;
        }

        log::trace!(
            "Headless submit: slot {}, {} passes",
            frame.slot,
            passes.len()
        );
        self.submissions.lock().push(SubmissionRecord {
            slot: frame.slot,
            passes,
            presented: frame.present,
        });
        Ok(())
    }

    // Submissions complete synchronously; waits only report device loss.
    fn wait_for_slot(&self, _slot: usize) -> Result<()> {
        self.ensure_alive()
    }

    fn wait_idle(&self) -> Result<()> {
        self.ensure_alive()
    }

    fn resize_surface(&self, viewport: Viewport) {
        *self.surface.lock() = Some(viewport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferUsage, TextureUsage};
    use crate::model::Format;

    fn texture(backend: &HeadlessBackend, w: u32, h: u32) -> TextureId {
        backend
            .create_texture(&TextureDesc {
                label: "t".into(),
                width: w,
                height: h,
                format: Format::Rgba8Unorm,
                usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            })
            .unwrap()
    }

    #[test]
    fn destroyed_handles_go_stale() {
        let backend = HeadlessBackend::new(DeviceLimits::default());
        let id = backend
            .create_buffer(&BufferDesc {
                label: "b".into(),
                size: 16,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        backend.destroy_buffer(id);
        assert!(matches!(
            backend.write_buffer(id, 0, &[0; 4]),
            Err(PipelineError::StaleHandle("buffer"))
        ));

        let again = backend
            .create_buffer(&BufferDesc {
                label: "b".into(),
                size: 16,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        assert_ne!(id, again);
    }

    #[test]
    fn region_write_lands_in_rows() {
        let backend = HeadlessBackend::new(DeviceLimits::default());
        let id = texture(&backend, 4, 4);
        backend
            .write_texture(id, ImageRegion { x: 1, y: 2, width: 2, height: 1 }, &[7; 8])
            .unwrap();

        let data = backend.texture_data(id).unwrap();
        let row = 4 * 4;
        assert_eq!(&data[2 * row + 4..2 * row + 12], &[7; 8]);
        assert_eq!(data.iter().filter(|&&b| b == 7).count(), 8);
    }

    #[test]
    fn region_outside_texture_is_rejected() {
        let backend = HeadlessBackend::new(DeviceLimits::default());
        let id = texture(&backend, 4, 4);
        let region = ImageRegion { x: 3, y: 0, width: 2, height: 1 };
        assert!(backend.write_texture(id, region, &[0; 8]).is_err());
    }

    #[test]
    fn offsets_near_the_integer_limit_are_rejected() {
        let backend = HeadlessBackend::new(DeviceLimits::default());
        let buffer = backend
            .create_buffer(&BufferDesc {
                label: "b".into(),
                size: 16,
                usage: BufferUsage::STORAGE,
            })
            .unwrap();
        assert!(matches!(
            backend.write_buffer(buffer, u64::MAX - 1, &[1, 2, 3, 4]),
            Err(PipelineError::Backend(_))
        ));
        assert!(matches!(
            backend.read_buffer(buffer, 8, u64::MAX),
            Err(PipelineError::Backend(_))
        ));

        let id = texture(&backend, 4, 4);
        let region = ImageRegion { x: u32::MAX, y: 0, width: 2, height: 1 };
        assert!(backend.write_texture(id, region, &[0; 8]).is_err());
    }

    #[test]
    fn framebuffer_extent_must_match_views() {
        use crate::backend::{AttachmentDesc, LoadOp, SubpassDesc};

        let backend = HeadlessBackend::new(DeviceLimits::default());
        let view = backend.create_view(texture(&backend, 8, 8)).unwrap();
        let pass = backend
            .create_render_pass(&RenderPassDesc {
                label: "p".into(),
                colors: vec![AttachmentDesc {
                    format: Format::Rgba8Unorm,
                    load: LoadOp::Clear([0.0; 4]),
                    store: true,
                }],
                depth: None,
                subpass: SubpassDesc { color: vec![0], depth: None },
            })
            .unwrap();

        let mut desc = FramebufferDesc {
            label: "fb".into(),
            render_pass: pass,
            color_views: vec![view],
            depth_view: None,
            extent: Viewport::new(4, 4),
        };
        assert!(backend.create_framebuffer(&desc).is_err());
        desc.extent = Viewport::new(8, 8);
        assert!(backend.create_framebuffer(&desc).is_ok());
    }
}
