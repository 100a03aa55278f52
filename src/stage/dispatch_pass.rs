//! Dispatch Pass
//!
//! The single compute kernel of a stage. Built like a draw pass (bind layout
//! → pipeline layout → shader → compute pipeline → per-slot bind sets) with
//! the group counts computed once by [`distribute`].

use std::sync::Arc;

use smallvec::SmallVec;

use super::binding::BindingPlan;
use crate::backend::{
    Backend, BindLayoutId, BindSetDesc, BindSetId, ComputePipelineDesc, DeviceBackend,
    DispatchRecording, PipelineId, PipelineLayoutId, ShaderId, ShaderStageRef,
};
use crate::compute::{WorkGrid, distribute};
use crate::errors::Result;
use crate::model::DispatchDescription;

pub struct DispatchPass {
    tag: String,
    grid: WorkGrid,
    bind_layout: Option<BindLayoutId>,
    pipeline_layout: Option<PipelineLayoutId>,
    shader: Option<ShaderId>,
    pipeline: Option<PipelineId>,
    bind_sets: SmallVec<[BindSetId; 3]>,
    backend: Arc<Backend>,
}

impl DispatchPass {
    pub(crate) fn build(
        backend: &Arc<Backend>,
        stage: &str,
        dispatch: &DispatchDescription,
        bindings: BindingPlan,
    ) -> Result<Self> {
        let label = format!("{stage}/{}", dispatch.tag());
        let grid = distribute(
            dispatch.work_items(),
            dispatch.local_shape(),
            &backend.limits().compute,
        )?;

        let mut pass = Self {
            tag: dispatch.tag().to_string(),
            grid,
            bind_layout: None,
            pipeline_layout: None,
            shader: None,
            pipeline: None,
            bind_sets: SmallVec::new(),
            backend: backend.clone(),
        };

        if !bindings.is_empty() {
            pass.bind_layout = Some(backend.create_bind_layout(&label, &bindings.entries)?);
        }
        let pipeline_layout =
            backend.create_pipeline_layout(&label, pass.bind_layout.as_slice())?;
        pass.pipeline_layout = Some(pipeline_layout);

        let shader = backend.create_shader(&dispatch.shader().source)?;
        pass.shader = Some(shader);
        pass.pipeline = Some(backend.create_compute_pipeline(&ComputePipelineDesc {
            label: label.clone(),
            layout: pipeline_layout,
            shader: ShaderStageRef {
                module: shader,
                entry_point: dispatch.shader().entry_point.clone(),
            },
        })?);

        if let Some(layout) = pass.bind_layout {
            for (slot, entries) in bindings.per_slot.into_iter().enumerate() {
                let set = backend.create_bind_set(&BindSetDesc {
                    label: format!("{label}[{slot}]"),
                    layout,
                    entries,
                })?;
                pass.bind_sets.push(set);
            }
        }

        log::debug!(
            "Built dispatch pass '{label}': global {:?}, groups {:?}",
            grid.global,
            grid.groups()
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
    pub fn grid(&self) -> WorkGrid {
        self.grid
    }

    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> Option<PipelineId> {
        self.pipeline
    }

    /// Dispatch of one frame slot.
    #[must_use]
    pub fn recording(&self, slot: usize) -> Option<DispatchRecording> {
        Some(DispatchRecording {
            pipeline: self.pipeline?,
            bind_set: self.bind_sets.get(slot).copied(),
            groups: self.grid.groups(),
        })
    }
}

impl Drop for DispatchPass {
    fn drop(&mut self) {
        let backend = &self.backend;
        for set in self.bind_sets.drain(..) {
            backend.destroy_bind_set(set);
        }
        if let Some(pipeline) = self.pipeline.take() {
            backend.destroy_pipeline(pipeline);
        }
        if let Some(shader) = self.shader.take() {
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
