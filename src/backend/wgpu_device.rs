//! wgpu Backend
//!
//! Implements [`DeviceBackend`] on top of an application-owned
//! `wgpu::Device` / `wgpu::Queue` pair.
//!
//! Pre-recorded draws are kept as [`DrawRecording`]s and replayed into the
//! render pass of every frame; their parameters come from an indirect buffer,
//! so replaying never observes stale arguments.
//!
//! Presentation goes through a [`SurfaceProvider`] supplied by the windowing
//! layer. The presentable render target is copied into the acquired swapchain
//! texture at the end of the frame.

use std::borrow::Cow;
use std::num::NonZeroU32;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use super::{
    BackendKind, BindLayoutId, BindSetDesc, BindSetId, BindingType, BoundResource, BufferDesc,
    BufferId, BufferUsage, CommandListId, ComputePipelineDesc, DeviceBackend, DeviceLimits,
    DrawRecording, FrameSubmission, FramebufferDesc, FramebufferId, GraphicsPipelineDesc,
    ImageRegion, LayoutEntry, LoadOp, PipelineId, PipelineLayoutId, RenderPassDesc, RenderPassId,
    SamplerId, ShaderId, TextureDesc, TextureId, TextureUsage, ViewId,
};
use crate::compute::ComputeLimits;
use crate::errors::{PipelineError, Result};
use crate::model::{
    AddressMode, FilterMode, Format, PrimitiveTopology, SamplerDescription, ShaderSource,
    ShaderStages, Viewport,
};

/// Swapchain access supplied by the windowing layer.
pub trait SurfaceProvider: Send + Sync {
    /// Acquires the texture to present this frame. `None` skips presentation.
    fn acquire(&self) -> Option<wgpu::Texture>;
    /// Presents the texture returned by the last [`acquire`](Self::acquire).
    fn present(&self);
    /// Reconfigures the surface for a new size.
    fn resize(&self, device: &wgpu::Device, viewport: Viewport);
}

enum WgpuPipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

#[derive(Default)]
struct WgpuObjects {
    views: SlotMap<ViewId, wgpu::TextureView>,
    samplers: SlotMap<SamplerId, wgpu::Sampler>,
    bind_layouts: SlotMap<BindLayoutId, wgpu::BindGroupLayout>,
    pipeline_layouts: SlotMap<PipelineLayoutId, wgpu::PipelineLayout>,
    shaders: SlotMap<ShaderId, wgpu::ShaderModule>,
    pipelines: SlotMap<PipelineId, WgpuPipeline>,
    bind_sets: SlotMap<BindSetId, wgpu::BindGroup>,
    render_passes: SlotMap<RenderPassId, RenderPassDesc>,
    framebuffers: SlotMap<FramebufferId, FramebufferDesc>,
    command_lists: SlotMap<CommandListId, DrawRecording>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<Box<dyn SurfaceProvider>>,
    limits: DeviceLimits,
    buffers: RwLock<SlotMap<BufferId, wgpu::Buffer>>,
    textures: RwLock<SlotMap<TextureId, wgpu::Texture>>,
    objects: Mutex<WgpuObjects>,
    /// Per frame slot: the last submission not yet waited on.
    in_flight: Mutex<Vec<Option<wgpu::SubmissionIndex>>>,
}

/// Longest a wait on the queue may block before the device is treated as lost.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

impl WgpuBackend {
    #[must_use]
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: Option<Box<dyn SurfaceProvider>>,
    ) -> Self {
        let raw = device.limits();
        let limits = DeviceLimits {
            compute: ComputeLimits {
                max_group_size: [
                    raw.max_compute_workgroup_size_x,
                    raw.max_compute_workgroup_size_y,
                    raw.max_compute_workgroup_size_z,
                ],
                max_group_count: [raw.max_compute_workgroups_per_dimension; 3],
                max_invocations: raw.max_compute_invocations_per_workgroup,
            },
            max_texture_dimension: raw.max_texture_dimension_2d,
            max_buffer_size: raw.max_buffer_size,
        };
        log::info!(
            "wgpu backend created (max texture {}, max buffer {} bytes)",
            limits.max_texture_dimension,
            limits.max_buffer_size
        );

        Self {
            device,
            queue,
            surface,
            limits,
            buffers: RwLock::new(SlotMap::with_key()),
            textures: RwLock::new(SlotMap::with_key()),
            objects: Mutex::new(WgpuObjects::default()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Native texture behind a handle, for interop with application passes.
    #[must_use]
    pub fn texture(&self, id: TextureId) -> Option<wgpu::Texture> {
        self.textures.read().get(id).cloned()
    }

    fn wait(&self, submission_index: Option<wgpu::SubmissionIndex>, what: &str) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index,
                timeout: Some(WAIT_TIMEOUT),
            })
            .map(|_| ())
            .map_err(|e| {
                log::error!("Waiting for {what} failed: {e}");
                PipelineError::Backend(format!("waiting for {what}: {e}"))
            })
    }

    fn encode_passes(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        frame: &FrameSubmission,
    ) -> Result<()> {
        let objects = self.objects.lock();
        let buffers = self.buffers.read();

        for pass in &frame.passes {
            if let Some(dispatch) = &pass.dispatch {
                let Some(WgpuPipeline::Compute(pipeline)) = objects.pipelines.get(dispatch.pipeline)
                else {
                    return Err(PipelineError::StaleHandle("compute pipeline"));
                };
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&pass.label),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(pipeline);
                if let Some(set) = dispatch.bind_set {
                    let group = objects
                        .bind_sets
                        .get(set)
                        .ok_or(PipelineError::StaleHandle("bind set"))?;
                    cpass.set_bind_group(0, group, &[]);
                }
                let [x, y, z] = dispatch.groups;
                cpass.dispatch_workgroups(x, y, z);
            }

            let Some(render) = &pass.render else {
                continue;
            };
            let pass_desc = objects
                .render_passes
                .get(render.render_pass)
                .ok_or(PipelineError::StaleHandle("render pass"))?;
            let framebuffer = objects
                .framebuffers
                .get(render.framebuffer)
                .ok_or(PipelineError::StaleHandle("framebuffer"))?;

            let mut color_attachments = Vec::with_capacity(framebuffer.color_views.len());
            for (view_id, attachment) in framebuffer.color_views.iter().zip(&pass_desc.colors) {
                let view = objects
                    .views
                    .get(*view_id)
                    .ok_or(PipelineError::StaleHandle("view"))?;
                let load = match attachment.load {
                    LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    LoadOp::ClearDepth(_) | LoadOp::Load => wgpu::LoadOp::Load,
                };
                color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: store_op(attachment.store),
                    },
                    depth_slice: None,
                }));
            }

            let depth_stencil_attachment = match (framebuffer.depth_view, &pass_desc.depth) {
                (Some(view_id), Some(attachment)) => {
                    let view = objects
                        .views
                        .get(view_id)
                        .ok_or(PipelineError::StaleHandle("view"))?;
                    let load = match attachment.load {
                        LoadOp::ClearDepth(depth) => wgpu::LoadOp::Clear(depth),
                        LoadOp::Clear(_) => wgpu::LoadOp::Clear(1.0),
                        LoadOp::Load => wgpu::LoadOp::Load,
                    };
                    Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load,
                            store: store_op(attachment.store),
                        }),
                        stencil_ops: None,
                    })
                }
                _ => None,
            };

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&pass.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            for list in &render.commands {
                let draw = objects
                    .command_lists
                    .get(*list)
                    .ok_or(PipelineError::StaleHandle("command list"))?;
                let Some(WgpuPipeline::Render(pipeline)) = objects.pipelines.get(draw.pipeline)
                else {
                    return Err(PipelineError::StaleHandle("render pipeline"));
                };
                rpass.set_pipeline(pipeline);
                for (group, set) in draw.bind_sets.iter().enumerate() {
                    let bind_group = objects
                        .bind_sets
                        .get(*set)
                        .ok_or(PipelineError::StaleHandle("bind set"))?;
                    rpass.set_bind_group(group as u32, bind_group, &[]);
                }

                let vertex = buffers
                    .get(draw.vertex_buffer)
                    .ok_or(PipelineError::StaleHandle("buffer"))?;
                let indirect = buffers
                    .get(draw.indirect)
                    .ok_or(PipelineError::StaleHandle("buffer"))?;
                rpass.set_vertex_buffer(0, vertex.slice(..));

                if let Some((index_id, format)) = draw.index {
                    let index = buffers
                        .get(index_id)
                        .ok_or(PipelineError::StaleHandle("buffer"))?;
                    rpass.set_index_buffer(index.slice(..), index_format(format)?);
                    rpass.draw_indexed_indirect(indirect, 0);
                } else {
                    rpass.draw_indirect(indirect, 0);
                }
            }
        }
        Ok(())
    }
}

// ─── Conversions ──────────────────────────────────────────────────────────────

fn unsupported(format: Format, usage: &'static str) -> PipelineError {
    PipelineError::UnsupportedFormat {
        format: format!("{format:?}"),
        usage,
    }
}

fn texture_format(format: Format) -> Result<wgpu::TextureFormat> {
    Ok(match format {
        Format::R8Unorm => wgpu::TextureFormat::R8Unorm,
        Format::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        Format::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        Format::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        Format::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        Format::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        Format::R16Float => wgpu::TextureFormat::R16Float,
        Format::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        Format::R32Float => wgpu::TextureFormat::R32Float,
        Format::Rg32Float => wgpu::TextureFormat::Rg32Float,
        Format::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        Format::R16Uint => wgpu::TextureFormat::R16Uint,
        Format::R32Uint => wgpu::TextureFormat::R32Uint,
        Format::Depth32Float => wgpu::TextureFormat::Depth32Float,
        Format::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        Format::Rgb32Float => return Err(unsupported(format, "textures")),
    })
}

fn vertex_format(format: Format) -> Result<wgpu::VertexFormat> {
    Ok(match format {
        Format::Rg8Unorm => wgpu::VertexFormat::Unorm8x2,
        Format::Rgba8Unorm => wgpu::VertexFormat::Unorm8x4,
        Format::Rgba16Float => wgpu::VertexFormat::Float16x4,
        Format::R32Float => wgpu::VertexFormat::Float32,
        Format::Rg32Float => wgpu::VertexFormat::Float32x2,
        Format::Rgb32Float => wgpu::VertexFormat::Float32x3,
        Format::Rgba32Float => wgpu::VertexFormat::Float32x4,
        Format::R32Uint => wgpu::VertexFormat::Uint32,
        _ => return Err(unsupported(format, "vertex attributes")),
    })
}

fn index_format(format: Format) -> Result<wgpu::IndexFormat> {
    match format {
        Format::R16Uint => Ok(wgpu::IndexFormat::Uint16),
        Format::R32Uint => Ok(wgpu::IndexFormat::Uint32),
        _ => Err(unsupported(format, "index data")),
    }
}

fn is_filterable(format: Format) -> bool {
    !matches!(
        format,
        Format::R32Float
            | Format::Rg32Float
            | Format::Rgb32Float
            | Format::Rgba32Float
            | Format::R16Uint
            | Format::R32Uint
    ) && !format.is_depth()
}

fn sample_type(format: Format) -> wgpu::TextureSampleType {
    match format {
        Format::R16Uint | Format::R32Uint => wgpu::TextureSampleType::Uint,
        f if f.is_depth() => wgpu::TextureSampleType::Depth,
        f => wgpu::TextureSampleType::Float {
            filterable: is_filterable(f),
        },
    }
}

fn shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::NONE;
    if stages.contains(ShaderStages::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        out |= wgpu::ShaderStages::COMPUTE;
    }
    out
}

fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let pairs = [
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
    ];
    pairs
        .into_iter()
        .filter(|(ours, _)| usage.contains(*ours))
        .fold(wgpu::BufferUsages::empty(), |acc, (_, theirs)| acc | theirs)
}

fn texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let pairs = [
        (TextureUsage::SAMPLED, wgpu::TextureUsages::TEXTURE_BINDING),
        (TextureUsage::RENDER_TARGET, wgpu::TextureUsages::RENDER_ATTACHMENT),
        (TextureUsage::STORAGE, wgpu::TextureUsages::STORAGE_BINDING),
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
    ];
    pairs
        .into_iter()
        .filter(|(ours, _)| usage.contains(*ours))
        .fold(wgpu::TextureUsages::empty(), |acc, (_, theirs)| acc | theirs)
}

fn topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn store_op(store: bool) -> wgpu::StoreOp {
    if store {
        wgpu::StoreOp::Store
    } else {
        wgpu::StoreOp::Discard
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

// ─── DeviceBackend ────────────────────────────────────────────────────────────

impl DeviceBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferId> {
        if desc.size == 0 || desc.size > self.limits.max_buffer_size {
            return Err(PipelineError::Backend(format!(
                "buffer '{}' size {} is outside 1..={}",
                desc.label, desc.size, self.limits.max_buffer_size
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        Ok(self.buffers.write().insert(buffer))
    }

    fn destroy_buffer(&self, id: BufferId) {
        if let Some(buffer) = self.buffers.write().remove(id) {
            buffer.destroy();
        }
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        if !offset.is_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            || !(data.len() as u64).is_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
        {
            return Err(PipelineError::Backend(format!(
                "buffer writes must be {}-byte aligned (offset {offset}, {} bytes)",
                wgpu::COPY_BUFFER_ALIGNMENT,
                data.len()
            )));
        }
        let buffers = self.buffers.read();
        let buffer = buffers.get(id).ok_or(PipelineError::StaleHandle("buffer"))?;
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn read_buffer(&self, _id: BufferId, _offset: u64, _len: u64) -> Result<Vec<u8>> {
        Err(PipelineError::Unsupported {
            backend: "wgpu",
            operation: "buffer readback",
        })
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureId> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: extent(desc.width, desc.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format)?,
            usage: texture_usage(desc.usage),
            view_formats: &[],
        });
        Ok(self.textures.write().insert(texture))
    }

    fn destroy_texture(&self, id: TextureId) {
        if let Some(texture) = self.textures.write().remove(id) {
            texture.destroy();
        }
    }

    fn write_texture(&self, id: TextureId, region: ImageRegion, data: &[u8]) -> Result<()> {
        let textures = self.textures.read();
        let texture = textures.get(id).ok_or(PipelineError::StaleHandle("texture"))?;
        let texel = texture
            .format()
            .block_copy_size(None)
            .ok_or_else(|| PipelineError::Backend("texture format has no copy size".into()))?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * texel),
                rows_per_image: Some(region.height),
            },
            extent(region.width, region.height),
        );
        Ok(())
    }

    fn create_view(&self, texture: TextureId) -> Result<ViewId> {
        let view = self
            .textures
            .read()
            .get(texture)
            .ok_or(PipelineError::StaleHandle("texture"))?
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.objects.lock().views.insert(view))
    }

    fn destroy_view(&self, id: ViewId) {
        self.objects.lock().views.remove(id);
    }

    fn create_sampler(&self, desc: &SamplerDescription) -> Result<SamplerId> {
        let mode = address_mode(desc.address_mode);
        let filter = filter_mode(desc.filter);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stage Sampler"),
            address_mode_u: mode,
            address_mode_v: mode,
            address_mode_w: mode,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        Ok(self.objects.lock().samplers.insert(sampler))
    }

    fn destroy_sampler(&self, id: SamplerId) {
        self.objects.lock().samplers.remove(id);
    }

    fn create_bind_layout(&self, label: &str, entries: &[LayoutEntry]) -> Result<BindLayoutId> {
        let mut raw = Vec::with_capacity(entries.len());
        for entry in entries {
            let ty = match entry.ty {
                BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                BindingType::SampledTexture { format } => wgpu::BindingType::Texture {
                    sample_type: sample_type(format),
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                BindingType::Sampler { format } => wgpu::BindingType::Sampler(if is_filterable(format) {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
            };
            raw.push(wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: shader_stages(entry.stages),
                ty,
                count: if entry.count > 1 {
                    NonZeroU32::new(entry.count)
                } else {
                    None
                },
            });
        }

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &raw,
            });
        Ok(self.objects.lock().bind_layouts.insert(layout))
    }

    fn destroy_bind_layout(&self, id: BindLayoutId) {
        self.objects.lock().bind_layouts.remove(id);
    }

    fn create_pipeline_layout(&self, label: &str, sets: &[BindLayoutId]) -> Result<PipelineLayoutId> {
        let mut objects = self.objects.lock();
        let mut layouts = Vec::with_capacity(sets.len());
        for set in sets {
            layouts.push(
                objects
                    .bind_layouts
                    .get(*set)
                    .ok_or(PipelineError::StaleHandle("bind layout"))
                    .map(Some)?,
            );
        }
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &layouts,
                immediate_size: 0,
            });
        Ok(objects.pipeline_layouts.insert(layout))
    }

    fn destroy_pipeline_layout(&self, id: PipelineLayoutId) {
        self.objects.lock().pipeline_layouts.remove(id);
    }

    fn create_shader(&self, source: &ShaderSource) -> Result<ShaderId> {
        let code = match source {
            ShaderSource::Path(path) => {
                std::fs::read_to_string(path).map_err(|e| PipelineError::ShaderLoad {
                    path: path.clone(),
                    reason: e.to_string(),
                })?
            }
            ShaderSource::Wgsl(code) => code.clone(),
        };
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label()),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(code)),
            });
        Ok(self.objects.lock().shaders.insert(module))
    }

    fn destroy_shader(&self, id: ShaderId) {
        self.objects.lock().shaders.remove(id);
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<PipelineId> {
        let mut attributes = Vec::with_capacity(desc.vertex_layout.attributes.len());
        for attribute in &desc.vertex_layout.attributes {
            attributes.push(wgpu::VertexAttribute {
                format: vertex_format(attribute.format)?,
                offset: attribute.offset,
                shader_location: attribute.location,
            });
        }
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.vertex_layout.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let mut targets = Vec::with_capacity(desc.color_formats.len());
        for format in &desc.color_formats {
            targets.push(Some(wgpu::ColorTargetState {
                format: texture_format(*format)?,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            }));
        }
        let depth_stencil = match desc.depth_format {
            Some(format) => Some(wgpu::DepthStencilState {
                format: texture_format(format)?,
                depth_write_enabled: Some(true),
                depth_compare: Some(wgpu::CompareFunction::Less),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            None => None,
        };

        let strip = matches!(
            desc.topology,
            PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
        );
        let strip_index_format = match desc.index_format {
            Some(format) if strip => Some(index_format(format)?),
            _ => None,
        };

        let mut objects = self.objects.lock();
        let layout = objects
            .pipeline_layouts
            .get(desc.layout)
            .ok_or(PipelineError::StaleHandle("pipeline layout"))?;
        let vertex_module = objects
            .shaders
            .get(desc.vertex.module)
            .ok_or(PipelineError::StaleHandle("shader"))?;
        let fragment = match &desc.fragment {
            Some(stage) => Some((
                objects
                    .shaders
                    .get(stage.module)
                    .ok_or(PipelineError::StaleHandle("shader"))?,
                stage.entry_point.as_str(),
            )),
            None => None,
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(&desc.vertex.entry_point),
                    buffers: &vertex_buffers,
                    compilation_options: Default::default(),
                },
                fragment: fragment.map(|(module, entry_point)| wgpu::FragmentState {
                    module,
                    entry_point: Some(entry_point),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: topology(desc.topology),
                    strip_index_format,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });
        Ok(objects.pipelines.insert(WgpuPipeline::Render(pipeline)))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        let mut objects = self.objects.lock();
        let layout = objects
            .pipeline_layouts
            .get(desc.layout)
            .ok_or(PipelineError::StaleHandle("pipeline layout"))?;
        let module = objects
            .shaders
            .get(desc.shader.module)
            .ok_or(PipelineError::StaleHandle("shader"))?;

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&desc.label),
                layout: Some(layout),
                module,
                entry_point: Some(&desc.shader.entry_point),
                compilation_options: Default::default(),
                cache: None,
            });
        Ok(objects.pipelines.insert(WgpuPipeline::Compute(pipeline)))
    }

    fn destroy_pipeline(&self, id: PipelineId) {
        self.objects.lock().pipelines.remove(id);
    }

    fn create_bind_set(&self, desc: &BindSetDesc) -> Result<BindSetId> {
        let mut objects = self.objects.lock();
        let buffers = self.buffers.read();

        let mut entries = Vec::with_capacity(desc.entries.len());
        for entry in &desc.entries {
            let resource = match &entry.resource {
                BoundResource::Buffers(ids) => match ids.as_slice() {
                    [id] => buffers
                        .get(*id)
                        .ok_or(PipelineError::StaleHandle("buffer"))?
                        .as_entire_binding(),
                    _ => {
                        return Err(PipelineError::Unsupported {
                            backend: "wgpu",
                            operation: "buffer array bindings",
                        });
                    }
                },
                BoundResource::Views(ids) => match ids.as_slice() {
                    [id] => wgpu::BindingResource::TextureView(
                        objects
                            .views
                            .get(*id)
                            .ok_or(PipelineError::StaleHandle("view"))?,
                    ),
                    _ => {
                        return Err(PipelineError::Unsupported {
                            backend: "wgpu",
                            operation: "texture array bindings",
                        });
                    }
                },
                BoundResource::Sampler(id) => wgpu::BindingResource::Sampler(
                    objects
                        .samplers
                        .get(*id)
                        .ok_or(PipelineError::StaleHandle("sampler"))?,
                ),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource,
            });
        }

        let layout = objects
            .bind_layouts
            .get(desc.layout)
            .ok_or(PipelineError::StaleHandle("bind layout"))?;
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&desc.label),
            layout,
            entries: &entries,
        });
        Ok(objects.bind_sets.insert(group))
    }

    fn destroy_bind_set(&self, id: BindSetId) {
        self.objects.lock().bind_sets.remove(id);
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        for attachment in desc.colors.iter().chain(desc.depth.as_ref()) {
            texture_format(attachment.format)?;
        }
        Ok(self.objects.lock().render_passes.insert(desc.clone()))
    }

    fn destroy_render_pass(&self, id: RenderPassId) {
        self.objects.lock().render_passes.remove(id);
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<FramebufferId> {
        let mut objects = self.objects.lock();
        if !objects.render_passes.contains_key(desc.render_pass) {
            return Err(PipelineError::StaleHandle("render pass"));
        }
        for view in desc.color_views.iter().chain(desc.depth_view.as_ref()) {
            if !objects.views.contains_key(*view) {
                return Err(PipelineError::StaleHandle("view"));
            }
        }
        Ok(objects.framebuffers.insert(desc.clone()))
    }

    fn destroy_framebuffer(&self, id: FramebufferId) {
        self.objects.lock().framebuffers.remove(id);
    }

    fn record_draw(&self, recording: &DrawRecording) -> Result<CommandListId> {
        let mut objects = self.objects.lock();
        if !matches!(
            objects.pipelines.get(recording.pipeline),
            Some(WgpuPipeline::Render(_))
        ) {
            return Err(PipelineError::StaleHandle("render pipeline"));
        }
        Ok(objects.command_lists.insert(recording.clone()))
    }

    fn destroy_command_list(&self, id: CommandListId) {
        self.objects.lock().command_lists.remove(id);
    }

    fn submit_frame(&self, frame: &FrameSubmission) -> Result<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stage Frame Encoder"),
            });
        self.encode_passes(&mut encoder, frame)?;

        let mut presenting = false;
        if let (Some(source_id), Some(surface)) = (frame.present, &self.surface)
            && let Some(target) = surface.acquire()
        {
            let textures = self.textures.read();
            let source = textures
                .get(source_id)
                .ok_or(PipelineError::StaleHandle("texture"))?;
            if source.size() == target.size() && source.format() == target.format() {
                encoder.copy_texture_to_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: source,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::TexelCopyTextureInfo {
                        texture: &target,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    source.size(),
                );
            } else {
                log::warn!(
                    "Presentable target {:?}/{:?} does not match the swapchain {:?}/{:?}; frame not copied",
                    source.size(),
                    source.format(),
                    target.size(),
                    target.format()
                );
            }
            presenting = true;
        }

        let index = self.queue.submit(std::iter::once(encoder.finish()));
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.len() <= frame.slot {
                in_flight.resize(frame.slot + 1, None);
            }
            in_flight[frame.slot] = Some(index);
        }

        if presenting && let Some(surface) = &self.surface {
            surface.present();
        }
        Ok(())
    }

    fn wait_for_slot(&self, slot: usize) -> Result<()> {
        let Some(index) = self.in_flight.lock().get(slot).cloned().flatten() else {
            return Ok(());
        };
        self.wait(Some(index), &format!("frame slot {slot}"))?;
        if let Some(entry) = self.in_flight.lock().get_mut(slot) {
            *entry = None;
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        if self.in_flight.lock().iter().all(Option::is_none) {
            return Ok(());
        }
        self.wait(None, "the queue to drain")?;
        self.in_flight.lock().fill(None);
        Ok(())
    }

    fn resize_surface(&self, viewport: Viewport) {
        if let Some(surface) = &self.surface {
            surface.resize(&self.device, viewport);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_flags_map_one_to_one() {
        let usage = buffer_usage(BufferUsage::VERTEX | BufferUsage::COPY_DST);
        assert_eq!(usage, wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST);

        let usage = texture_usage(TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET);
        assert_eq!(
            usage,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
        );
    }

    #[test]
    fn float32_textures_are_not_filterable() {
        assert!(!is_filterable(Format::Rgba32Float));
        assert!(is_filterable(Format::Rgba8Unorm));
        assert_eq!(sample_type(Format::R32Uint), wgpu::TextureSampleType::Uint);
    }

    #[test]
    fn unsupported_formats_are_reported() {
        assert!(matches!(
            texture_format(Format::Rgb32Float),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
        assert!(index_format(Format::R32Float).is_err());
        assert_eq!(vertex_format(Format::Rgb32Float).unwrap(), wgpu::VertexFormat::Float32x3);
    }
}
