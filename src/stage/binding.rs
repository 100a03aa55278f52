use smallvec::SmallVec;

use crate::backend::{
    BindSetEntry, BindingType, BoundResource, BufferId, LayoutEntry, SamplerId, ViewId,
};
use crate::model::{Format, ShaderStages};

/// Layout entries plus the matching bind set entries of every frame slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct BindingPlan {
    pub entries: Vec<LayoutEntry>,
    pub per_slot: Vec<Vec<BindSetEntry>>,
}

impl BindingPlan {
    pub fn new(frame_lag: usize) -> Self {
        Self {
            entries: Vec::new(),
            per_slot: vec![Vec::new(); frame_lag],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One buffer binding; `buffers[slot]` holds one id per array element.
    pub fn push_buffers(
        &mut self,
        binding: u32,
        stages: ShaderStages,
        ty: BindingType,
        buffers: Vec<SmallVec<[BufferId; 4]>>,
    ) {
        debug_assert_eq!(buffers.len(), self.per_slot.len());
        let count = buffers.first().map_or(1, SmallVec::len) as u32;
        self.entries.push(LayoutEntry {
            binding,
            stages,
            ty,
            count,
        });
        for (slot, ids) in buffers.into_iter().enumerate() {
            self.per_slot[slot].push(BindSetEntry {
                binding,
                resource: BoundResource::Buffers(ids.into_vec()),
            });
        }
    }

    /// A sampled texture at `binding` and its sampler at `sampler_binding`.
    pub fn push_texture(
        &mut self,
        binding: u32,
        sampler_binding: u32,
        stages: ShaderStages,
        format: Format,
        views: Vec<SmallVec<[ViewId; 4]>>,
        samplers: Vec<SamplerId>,
    ) {
        debug_assert_eq!(views.len(), self.per_slot.len());
        let count = views.first().map_or(1, SmallVec::len) as u32;
        self.entries.push(LayoutEntry {
            binding,
            stages,
            ty: BindingType::SampledTexture { format },
            count,
        });
        self.entries.push(LayoutEntry {
            binding: sampler_binding,
            stages,
            ty: BindingType::Sampler { format },
            count: 1,
        });
        for (slot, (ids, sampler)) in views.into_iter().zip(samplers).enumerate() {
            let entries = &mut self.per_slot[slot];
            entries.push(BindSetEntry {
                binding,
                resource: BoundResource::Views(ids.into_vec()),
            });
            entries.push(BindSetEntry {
                binding: sampler_binding,
                resource: BoundResource::Sampler(sampler),
            });
        }
    }
}
