//! Backend Capability Interface
//!
//! Everything the pipeline needs from a device is expressed by the
//! [`DeviceBackend`] trait. Exactly one implementation is active per pipeline,
//! chosen at startup through the closed [`Backend`] enum:
//!
//! | Variant    | Storage                     | Typical use                      |
//! |------------|-----------------------------|----------------------------------|
//! | `Headless` | Host memory, logged submits | Tests, tooling, CI               |
//! | `Wgpu`     | `wgpu::Device` / `Queue`    | Rendering to a window or texture |
//!
//! Native objects never leave the backend. Callers hold lightweight
//! [`slotmap`] keys; destroying an object invalidates its key, so a recreated
//! object always has a different identity from the one it replaced.

pub mod headless;
pub mod wgpu_device;

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::compute::ComputeLimits;
use crate::errors::Result;
use crate::model::{
    Format, PrimitiveTopology, SamplerDescription, ShaderSource, ShaderStages, Viewport,
};

pub use headless::{HeadlessBackend, PassRecord, RecordedDraw, SubmissionRecord};
pub use wgpu_device::{SurfaceProvider, WgpuBackend};

// ─── Handles ──────────────────────────────────────────────────────────────────

new_key_type! {
    pub struct BufferId;
    pub struct TextureId;
    pub struct ViewId;
    pub struct SamplerId;
    pub struct BindLayoutId;
    pub struct PipelineLayoutId;
    pub struct ShaderId;
    pub struct PipelineId;
    pub struct BindSetId;
    pub struct RenderPassId;
    pub struct FramebufferId;
    pub struct CommandListId;
}

// ─── Usage Flags ──────────────────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDIRECT = 1 << 4;
        const COPY_SRC = 1 << 5;
        const COPY_DST = 1 << 6;
        const MAP_READ = 1 << 7;
        const MAP_WRITE = 1 << 8;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const STORAGE = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;
    }
}

// ─── Object Descriptors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub usage: TextureUsage,
}

/// Rectangle of texels inside an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ImageRegion {
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Resource type of one binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    SampledTexture { format: Format },
    Sampler { format: Format },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutEntry {
    pub binding: u32,
    pub stages: ShaderStages,
    pub ty: BindingType,
    /// Array length; 1 for a plain binding.
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundResource {
    Buffers(Vec<BufferId>),
    Views(Vec<ViewId>),
    Sampler(SamplerId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSetEntry {
    pub binding: u32,
    pub resource: BoundResource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindSetDesc {
    pub label: String,
    pub layout: BindLayoutId,
    pub entries: Vec<BindSetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttributeDesc {
    pub format: Format,
    pub offset: u64,
    pub location: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<VertexAttributeDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageRef {
    pub module: ShaderId,
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub vertex: ShaderStageRef,
    pub fragment: Option<ShaderStageRef>,
    pub vertex_layout: VertexLayout,
    pub topology: PrimitiveTopology,
    /// Present when the draw is indexed; needed by strip topologies.
    pub index_format: Option<Format>,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDesc {
    pub label: String,
    pub layout: PipelineLayoutId,
    pub shader: ShaderStageRef,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f64; 4]),
    ClearDepth(f32),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDesc {
    pub format: Format,
    pub load: LoadOp,
    pub store: bool,
}

/// Which attachments of a render pass the single sub-pass writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubpassDesc {
    pub color: Vec<u32>,
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub label: String,
    pub colors: Vec<AttachmentDesc>,
    pub depth: Option<AttachmentDesc>,
    pub subpass: SubpassDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    pub label: String,
    pub render_pass: RenderPassId,
    pub color_views: Vec<ViewId>,
    pub depth_view: Option<ViewId>,
    pub extent: Viewport,
}

/// A pre-recorded draw. Its parameters live in `indirect`, so changing them
/// never requires recording again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecording {
    pub label: String,
    pub pipeline: PipelineId,
    pub bind_sets: Vec<BindSetId>,
    pub vertex_buffer: BufferId,
    pub index: Option<(BufferId, Format)>,
    pub indirect: BufferId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecording {
    pub pipeline: PipelineId,
    pub bind_set: Option<BindSetId>,
    pub groups: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderSubmission {
    pub render_pass: RenderPassId,
    pub framebuffer: FramebufferId,
    pub commands: Vec<CommandListId>,
}

/// Work of one stage in one frame. The dispatch runs before the render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSubmission {
    pub label: String,
    pub dispatch: Option<DispatchRecording>,
    pub render: Option<RenderSubmission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSubmission {
    pub slot: usize,
    pub passes: Vec<PassSubmission>,
    /// Image copied to the swapchain after all passes.
    pub present: Option<TextureId>,
}

// ─── Limits ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub compute: ComputeLimits,
    pub max_texture_dimension: u32,
    pub max_buffer_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            compute: ComputeLimits::default(),
            max_texture_dimension: 8192,
            max_buffer_size: 256 << 20,
        }
    }
}

// ─── Capability Interface ─────────────────────────────────────────────────────

/// Which backend variant a pipeline is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    Headless,
    Wgpu,
}

/// Operations the pipeline consumes from a device.
///
/// All methods take `&self`: producer threads write through the same backend
/// the draw thread records with.
pub trait DeviceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId>;
    fn destroy_buffer(&self, id: BufferId);
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()>;
    fn read_buffer(&self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId>;
    fn destroy_texture(&self, id: TextureId);
    fn write_texture(&self, id: TextureId, region: ImageRegion, data: &[u8]) -> Result<()>;
    fn create_view(&self, texture: TextureId) -> Result<ViewId>;
    fn destroy_view(&self, id: ViewId);
    fn create_sampler(&self, desc: &SamplerDescription) -> Result<SamplerId>;
    fn destroy_sampler(&self, id: SamplerId);

    fn create_bind_layout(&self, label: &str, entries: &[LayoutEntry]) -> Result<BindLayoutId>;
    fn destroy_bind_layout(&self, id: BindLayoutId);
    fn create_pipeline_layout(
        &self,
        label: &str,
        sets: &[BindLayoutId],
    ) -> Result<PipelineLayoutId>;
    fn destroy_pipeline_layout(&self, id: PipelineLayoutId);
    fn create_shader(&self, source: &ShaderSource) -> Result<ShaderId>;
    fn destroy_shader(&self, id: ShaderId);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineId>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineId>;
    fn destroy_pipeline(&self, id: PipelineId);
    fn create_bind_set(&self, desc: &BindSetDesc) -> Result<BindSetId>;
    fn destroy_bind_set(&self, id: BindSetId);

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId>;
    fn destroy_render_pass(&self, id: RenderPassId);
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId>;
    fn destroy_framebuffer(&self, id: FramebufferId);
    fn record_draw(&self, recording: &DrawRecording) -> Result<CommandListId>;
    fn destroy_command_list(&self, id: CommandListId);

    /// Encodes and submits one frame; signals the fence of `frame.slot`.
    fn submit_frame(&self, frame: &FrameSubmission) -> Result<()>;
    /// Blocks until the last submission that used `slot` has finished.
    /// Fails when the device is lost or stops making progress.
    fn wait_for_slot(&self, slot: usize) -> Result<()>;
    /// Blocks until all submitted work has finished.
    fn wait_idle(&self) -> Result<()>;
    /// Notifies the backend that the presentation area changed size.
    fn resize_surface(&self, viewport: Viewport);
}

/// The backend selected for a pipeline.
pub enum Backend {
    Headless(HeadlessBackend),
    Wgpu(WgpuBackend),
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $body:expr) => {
        match $self {
            Backend::Headless($b) => $body,
            Backend::Wgpu($b) => $body,
        }
    };
}

impl Backend {
    /// Shared headless backend with default limits.
    #[must_use]
    pub fn headless() -> Arc<Self> {
        Arc::new(Self::Headless(HeadlessBackend::new(DeviceLimits::default())))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Headless(_) => "headless",
            Self::Wgpu(_) => "wgpu",
        }
    }

    #[must_use]
    pub fn as_headless(&self) -> Option<&HeadlessBackend> {
        match self {
            Self::Headless(b) => Some(b),
            Self::Wgpu(_) => None,
        }
    }

    #[must_use]
    pub fn as_wgpu(&self) -> Option<&WgpuBackend> {
        match self {
            Self::Wgpu(b) => Some(b),
            Self::Headless(_) => None,
        }
    }
}

impl DeviceBackend for Backend {
    fn kind(&self) -> BackendKind {
        dispatch!(self, b => b.kind())
    }

    fn limits(&self) -> DeviceLimits {
        dispatch!(self, b => b.limits())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        dispatch!(self, b => b.create_buffer(desc))
    }

    fn destroy_buffer(&self, id: BufferId) {
        dispatch!(self, b => b.destroy_buffer(id));
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        dispatch!(self, b => b.write_buffer(id, offset, data))
    }

    fn read_buffer(&self, id: BufferId, offset: u64, len: u64) -> Result<Vec<u8>> {
        dispatch!(self, b => b.read_buffer(id, offset, len))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        dispatch!(self, b => b.create_texture(desc))
    }

    fn destroy_texture(&self, id: TextureId) {
        dispatch!(self, b => b.destroy_texture(id));
    }

    fn write_texture(&self, id: TextureId, region: ImageRegion, data: &[u8]) -> Result<()> {
        dispatch!(self, b => b.write_texture(id, region, data))
    }

    fn create_view(&self, texture: TextureId) -> Result<ViewId> {
        dispatch!(self, b => b.create_view(texture))
    }

    fn destroy_view(&self, id: ViewId) {
        dispatch!(self, b => b.destroy_view(id));
    }

    fn create_sampler(&self, desc: &SamplerDescription) -> Result<SamplerId> {
        dispatch!(self, b => b.create_sampler(desc))
    }

    fn destroy_sampler(&self, id: SamplerId) {
        dispatch!(self, b => b.destroy_sampler(id));
    }

    fn create_bind_layout(&self, label: &str, entries: &[LayoutEntry]) -> Result<BindLayoutId> {
        dispatch!(self, b => b.create_bind_layout(label, entries))
    }

    fn destroy_bind_layout(&self, id: BindLayoutId) {
        dispatch!(self, b => b.destroy_bind_layout(id));
    }

    fn create_pipeline_layout(
        &self,
        label: &str,
        sets: &[BindLayoutId],
    ) -> Result<PipelineLayoutId> {
        dispatch!(self, b => b.create_pipeline_layout(label, sets))
    }

    fn destroy_pipeline_layout(&self, id: PipelineLayoutId) {
        dispatch!(self, b => b.destroy_pipeline_layout(id));
    }

    fn create_shader(&self, source: &ShaderSource) -> Result<ShaderId> {
        dispatch!(self, b => b.create_shader(source))
    }

    fn destroy_shader(&self, id: ShaderId) {
        dispatch!(self, b => b.destroy_shader(id));
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineId> {
        dispatch!(self, b => b.create_graphics_pipeline(desc))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        dispatch!(self, b => b.create_compute_pipeline(desc))
    }

    fn destroy_pipeline(&self, id: PipelineId) {
        dispatch!(self, b => b.destroy_pipeline(id));
    }

    fn create_bind_set(&self, desc: &BindSetDesc) -> Result<BindSetId> {
        dispatch!(self, b => b.create_bind_set(desc))
    }

    fn destroy_bind_set(&self, id: BindSetId) {
        dispatch!(self, b => b.destroy_bind_set(id));
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        dispatch!(self, b => b.create_render_pass(desc))
    }

    fn destroy_render_pass(&self, id: RenderPassId) {
        dispatch!(self, b => b.destroy_render_pass(id));
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId> {
        dispatch!(self, b => b.create_framebuffer(desc))
    }

    fn destroy_framebuffer(&self, id: FramebufferId) {
        dispatch!(self, b => b.destroy_framebuffer(id));
    }

    fn record_draw(&self, recording: &DrawRecording) -> Result<CommandListId> {
        dispatch!(self, b => b.record_draw(recording))
    }

    fn destroy_command_list(&self, id: CommandListId) {
        dispatch!(self, b => b.destroy_command_list(id));
    }

    fn submit_frame(&self, frame: &FrameSubmission) -> Result<()> {
        dispatch!(self, b => b.submit_frame(frame))
    }

    fn wait_for_slot(&self, slot: usize) -> Result<()> {
        dispatch!(self, b => b.wait_for_slot(slot))
    }

    fn wait_idle(&self) -> Result<()> {
        dispatch!(self, b => b.wait_idle())
    }

    fn resize_surface(&self, viewport: Viewport) {
        dispatch!(self, b => b.resize_surface(viewport));
    }
}
