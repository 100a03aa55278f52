//! Draw Pass
//!
//! Backend objects of one declared draw, built in a fixed order:
//!
//! ```text
//! bind layout → pipeline layout → shader modules → graphics pipeline
//!   → per-slot bind sets → per-slot indirect buffers → per-slot command lists
//! ```
//!
//! The recorded command list always issues an indirect draw. Changing the
//! draw arguments rewrites the small indirect buffer only; nothing is
//! recorded again.

use std::sync::Arc;

use smallvec::SmallVec;

use super::binding::BindingPlan;
use crate::backend::{
    Backend, BindLayoutId, BindSetDesc, BindSetId, BufferDesc, BufferId, BufferUsage,
    CommandListId, DeviceBackend, DrawRecording, GraphicsPipelineDesc, PipelineId,
    PipelineLayoutId, ShaderId, ShaderStageRef, VertexLayout,
};
use crate::errors::Result;
use crate::model::{DrawArgs, DrawDescription, Format, Viewport};

/// Indirect record of an indexed draw:
/// `[index_count, instance_count, first_index, base_vertex, first_instance]`.
const INDEXED_WORDS: usize = 5;
/// Indirect record of a non-indexed draw:
/// `[vertex_count, instance_count, first_vertex, first_instance]`.
const NON_INDEXED_WORDS: usize = 4;

/// Everything a draw pass needs, resolved by the owning stage.
pub(crate) struct DrawInputs<'a> {
    pub stage: &'a str,
    pub draw: &'a DrawDescription,
    pub args: DrawArgs,
    pub vertex_layout: VertexLayout,
    /// Vertex buffer per frame slot.
    pub vertex_buffers: SmallVec<[BufferId; 3]>,
    /// Index buffer per frame slot and its format.
    pub index: Option<(SmallVec<[BufferId; 3]>, Format)>,
    pub bindings: BindingPlan,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub viewport: Viewport,
}

/// Encodes draw arguments in the backend's indirect layout.
#[must_use]
pub fn indirect_words(args: DrawArgs, indexed: bool) -> SmallVec<[u32; INDEXED_WORDS]> {
    if indexed {
        SmallVec::from_slice(&[args.count, 1, args.first, args.vertex_offset.cast_unsigned(), 0])
    } else {
        SmallVec::from_slice(&[args.count, 1, args.first, 0])
    }
}

pub struct DrawPass {
    tag: String,
    indexed: bool,
    args: DrawArgs,
    bind_layout: Option<BindLayoutId>,
    pipeline_layout: Option<PipelineLayoutId>,
    shaders: SmallVec<[ShaderId; 2]>,
    pipeline: Option<PipelineId>,
    bind_sets: SmallVec<[BindSetId; 3]>,
    indirect: SmallVec<[BufferId; 3]>,
    commands: SmallVec<[CommandListId; 3]>,
    backend: Arc<Backend>,
}

impl DrawPass {
    pub(crate) fn build(backend: &Arc<Backend>, inputs: DrawInputs<'_>) -> Result<Self> {
        let draw = inputs.draw;
        let label = format!("{}/{}", inputs.stage, draw.tag());
        let indexed = inputs.index.is_some();

        // Partially built passes release what they hold on drop.
        let mut pass = Self {
            tag: draw.tag().to_string(),
            indexed,
            args: inputs.args,
            bind_layout: None,
            pipeline_layout: None,
            shaders: SmallVec::new(),
            pipeline: None,
            bind_sets: SmallVec::new(),
            indirect: SmallVec::new(),
            commands: SmallVec::new(),
            backend: backend.clone(),
        };

        let bind_layout = if inputs.bindings.is_empty() {
            None
        } else {
            let id = backend.create_bind_layout(&label, &inputs.bindings.entries)?;
            pass.bind_layout = Some(id);
            Some(id)
        };
        let pipeline_layout = backend.create_pipeline_layout(&label, bind_layout.as_slice())?;
        pass.pipeline_layout = Some(pipeline_layout);

        let shader = draw.shader();
        let vertex_module = backend.create_shader(&shader.vertex.source)?;
        pass.shaders.push(vertex_module);
        let fragment = match &shader.fragment {
            Some(entry) => {
                let module = if entry.source == shader.vertex.source {
                    vertex_module
                } else {
                    let module = backend.create_shader(&entry.source)?;
                    pass.shaders.push(module);
                    module
                };
                Some(ShaderStageRef {
                    module,
                    entry_point: entry.entry_point.clone(),
                })
            }
            None => None,
        };

        let pipeline = backend.create_graphics_pipeline(&GraphicsPipelineDesc {
            label: label.clone(),
            layout: pipeline_layout,
            vertex: ShaderStageRef {
                module: vertex_module,
                entry_point: shader.vertex.entry_point.clone(),
            },
            fragment,
            vertex_layout: inputs.vertex_layout,
            topology: draw.primitive_topology(),
            index_format: inputs.index.as_ref().map(|(_, format)| *format),
            color_formats: inputs.color_formats,
            depth_format: inputs.depth_format,
            viewport: inputs.viewport,
        })?;
        pass.pipeline = Some(pipeline);

        if let Some(layout) = bind_layout {
            for (slot, entries) in inputs.bindings.per_slot.into_iter().enumerate() {
                let set = backend.create_bind_set(&BindSetDesc {
                    label: format!("{label}[{slot}]"),
                    layout,
                    entries,
                })?;
                pass.bind_sets.push(set);
            }
        }

        let words = if indexed { INDEXED_WORDS } else { NON_INDEXED_WORDS };
        let record = indirect_words(inputs.args, indexed);
        for (slot, &vertex_buffer) in inputs.vertex_buffers.iter().enumerate() {
            let indirect = backend.create_buffer(&BufferDesc {
                label: format!("{label} indirect[{slot}]"),
                size: (words * size_of::<u32>()) as u64,
                usage: BufferUsage::INDIRECT | BufferUsage::COPY_DST,
            })?;
            pass.indirect.push(indirect);
            backend.write_buffer(indirect, 0, bytemuck::cast_slice(record.as_slice()))?;

            let command = backend.record_draw(&DrawRecording {
                label: label.clone(),
                pipeline,
                bind_sets: pass.bind_sets.get(slot).copied().into_iter().collect(),
                vertex_buffer,
                index: inputs.index.as_ref().map(|(buffers, format)| (buffers[slot], *format)),
                indirect,
            })?;
            pass.commands.push(command);
        }

        log::debug!(
            "Built draw pass '{label}' ({} slots, {})",
            pass.commands.len(),
            if indexed { "indexed" } else { "non-indexed" }
        );
        Ok(pass)
    }

    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    #[inline]
    #[must_use]
    pub fn args(&self) -> DrawArgs {
        self.args
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    #[must_use]
    pub fn command_list(&self, slot: usize) -> Option<CommandListId> {
        self.commands.get(slot).copied()
    }

    #[must_use]
    pub fn indirect_buffer(&self, slot: usize) -> Option<BufferId> {
        self.indirect.get(slot).copied()
    }

    #[must_use]
    pub fn bind_set(&self, slot: usize) -> Option<BindSetId> {
        self.bind_sets.get(slot).copied()
    }

    /// Rewrites the indirect record of every slot.
    pub fn set_args(&mut self, args: DrawArgs) -> Result<()> {
        let record = indirect_words(args, self.indexed);
        for &buffer in &self.indirect {
            self.backend
                .write_buffer(buffer, 0, bytemuck::cast_slice(record.as_slice()))?;
        }
        self.args = args;
        Ok(())
    }
}

impl Drop for DrawPass {
    fn drop(&mut self) {
        let backend = &self.backend;
        for command in self.commands.drain(..) {
            backend.destroy_command_list(command);
        }
        for buffer in self.indirect.drain(..) {
            backend.destroy_buffer(buffer);
        }
        for set in self.bind_sets.drain(..) {
            backend.destroy_bind_set(set);
        }
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        for shader in self.shaders.drain(..) {
            backend.destroy_shader(shader);
        }
        if let Some(layout) = self.pipeline_layout.take() {
            backend.destroy_pipeline_layout(layout);
        }
        if let Some(layout) = self.bind_layout.take() {
            backend.destroy_bind_layout(layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_record_carries_vertex_offset() {
        let words = indirect_words(DrawArgs::new(36, 6, -4), true);
        assert_eq!(words.as_slice(), &[36, 1, 6, (-4i32).cast_unsigned(), 0]);
    }

    #[test]
    fn non_indexed_record_ignores_vertex_offset() {
        let words = indirect_words(DrawArgs::new(3, 0, 9), false);
        assert_eq!(words.as_slice(), &[3, 1, 0, 0]);
    }
}
