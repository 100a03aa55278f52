//! Stage I/O
//!
//! Write endpoints that let producer threads push data into a stage's
//! resources while the draw thread records frames.
//!
//! Every endpoint keeps one [`WriteFence`] per physical instance. A write
//! holds the fence of the slot it targets for its whole duration; the draw
//! thread calls [`StageIo::wait_until_idle`] before encoding the stage, so a
//! write that started before the wait is complete when the frame reads it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::backend::{Backend, ImageRegion};
use crate::errors::{PipelineError, Result};
use crate::model::{DataKind, UpdateScheme};
use crate::resource::{Resource, ResourceManager};
use crate::sync::WriteFence;

/// Write endpoint for one `(kind, tag)` of a stage.
pub struct InputSlot {
    stage: String,
    kind: DataKind,
    tag: String,
    scheme: UpdateScheme,
    fences: SmallVec<[WriteFence; 3]>,
    targets: RwLock<SmallVec<[Arc<Resource>; 3]>>,
    backend: Arc<Backend>,
    current_slot: Arc<AtomicUsize>,
    frame_lag: usize,
    generation: AtomicU64,
}

impl InputSlot {
    pub(crate) fn new(
        stage: &str,
        kind: DataKind,
        tag: &str,
        scheme: UpdateScheme,
        targets: SmallVec<[Arc<Resource>; 3]>,
        backend: Arc<Backend>,
        current_slot: Arc<AtomicUsize>,
        frame_lag: usize,
    ) -> Self {
        let fences = (0..targets.len()).map(|_| WriteFence::new()).collect();
        Self {
            stage: stage.to_string(),
            kind,
            tag: tag.to_string(),
            scheme,
            fences,
            targets: RwLock::new(targets),
            backend,
            current_slot,
            frame_lag,
            generation: AtomicU64::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn scheme(&self) -> UpdateScheme {
        self.scheme
    }

    /// Number of successful writes so far.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Frame slot the next [`write`](Self::write) targets.
    #[inline]
    #[must_use]
    pub fn current_slot(&self) -> usize {
        self.current_slot.load(Ordering::Acquire)
    }

    fn instance(&self, slot: usize) -> Result<usize> {
        if slot >= self.frame_lag {
            return Err(PipelineError::InvalidFrameSlot {
                slot,
                frame_lag: self.frame_lag,
            });
        }
        Ok(match self.scheme {
            UpdateScheme::Static => 0,
            UpdateScheme::Dynamic => slot,
        })
    }

    /// Resource currently written for `slot`.
    pub fn target(&self, slot: usize) -> Result<Arc<Resource>> {
        let instance = self.instance(slot)?;
        Ok(self.targets.read()[instance].clone())
    }

    fn fenced<T>(&self, slot: usize, write: impl FnOnce(&Resource) -> Result<T>) -> Result<T> {
        let instance = self.instance(slot)?;
        let result = self.fences[instance].guard(|| {
            let target = self.targets.read()[instance].clone();
            write(&target)
        });
        if result.is_ok() {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    /// Writes `data` at `offset` into the current frame slot.
    pub fn write(&self, data: &[u8], offset: u64) -> Result<()> {
        self.write_to_slot(self.current_slot(), data, offset)
    }

    /// Writes `data` at `offset` into the instance of `slot`.
    pub fn write_to_slot(&self, slot: usize, data: &[u8], offset: u64) -> Result<()> {
        self.fenced(slot, |target| {
            ResourceManager::write_resource(&self.backend, target, offset, data)
        })
    }

    /// Writes a tightly packed texel block into the current slot's image.
    pub fn write_image_region(&self, region: ImageRegion, data: &[u8]) -> Result<()> {
        self.fenced(self.current_slot(), |target| {
            ResourceManager::write_image_region(&self.backend, target, region, data)
        })
    }

    /// Reads back `len` bytes at `offset` from the current frame slot.
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.read_slot(self.current_slot(), offset, len)
    }

    pub fn read_slot(&self, slot: usize, offset: u64, len: u64) -> Result<Vec<u8>> {
        let instance = self.instance(slot)?;
        self.fences[instance].wait_until_idle();
        let target = self.targets.read()[instance].clone();
        ResourceManager::read_resource(&self.backend, &target, offset, len)
    }

    /// Blocks until no write is pending on any instance.
    pub fn wait_until_idle(&self) {
        for fence in &self.fences {
            fence.wait_until_idle();
        }
    }

    /// Points the endpoint at rebuilt resources.
    pub(crate) fn retarget(&self, targets: SmallVec<[Arc<Resource>; 3]>) {
        debug_assert_eq!(targets.len(), self.fences.len());
        *self.targets.write() = targets;
    }
}

impl std::fmt::Debug for InputSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSlot")
            .field("stage", &self.stage)
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .field("scheme", &self.scheme)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// All write endpoints of one stage.
#[derive(Debug, Default)]
pub struct StageIo {
    endpoints: BTreeMap<(DataKind, String), Arc<InputSlot>>,
}

impl StageIo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, slot: InputSlot) -> Arc<InputSlot> {
        let key = (slot.kind, slot.tag.clone());
        let slot = Arc::new(slot);
        self.endpoints.insert(key, slot.clone());
        slot
    }

    #[must_use]
    pub fn get(&self, kind: DataKind, tag: &str) -> Option<&Arc<InputSlot>> {
        self.endpoints.get(&(kind, tag.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<InputSlot>> {
        self.endpoints.values()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Blocks until every endpoint is idle.
    pub fn wait_until_idle(&self) {
        for endpoint in self.endpoints.values() {
            endpoint.wait_until_idle();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.endpoints.clear();
    }
}
