//! Resource Manager
//!
//! Sole owner of the physical allocations behind descriptions. Every
//! resource lives in an `Arc`; data aliases clone it when they bind, and the
//! backend allocation is released when the last clone drops.
//!
//! Keys are derived from the description alone (see [`ResourceKey`]), so
//! creation is idempotent per key: creating an existing key returns it
//! untouched unless the caller forces a rebuild. A key is bound to the
//! description that first created it; a different description under the
//! same key is rejected.
//!
//! Tags are owned by the stage that first claims them. Only render targets
//! may be declared by several stages, and then only with equal descriptions.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::key::ResourceKey;
use crate::backend::{
    Backend, BufferDesc, BufferId, BufferUsage, DeviceBackend, ImageRegion, TextureDesc, TextureId,
    TextureUsage,
};
use crate::errors::{PipelineError, Result};
use crate::model::{Access, DataKind, Description, Format, UpdateScheme, Viewport};

/// Keys created for one description: one for Static, `frame_lag` for Dynamic.
pub type ResourceSet = SmallVec<[ResourceKey; 3]>;

/// Backend allocation behind a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Buffer(BufferId),
    Image { texture: TextureId, extent: Viewport },
}

/// One physical allocation.
pub struct Resource {
    key: ResourceKey,
    tag: String,
    kind: DataKind,
    slot: Option<usize>,
    allocation: Allocation,
    format: Option<Format>,
    stride: u64,
    unit_count: u64,
    access: Access,
    description: Description,
    backend: Arc<Backend>,
}

impl Resource {
    #[inline]
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    #[inline]
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Frame slot of a Dynamic instance; `None` for Static resources.
    #[inline]
    #[must_use]
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    #[inline]
    #[must_use]
    pub fn allocation(&self) -> Allocation {
        self.allocation
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> Option<Format> {
        self.format
    }

    #[inline]
    #[must_use]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    #[inline]
    #[must_use]
    pub fn unit_count(&self) -> u64 {
        self.unit_count
    }

    #[inline]
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.stride * self.unit_count
    }

    #[inline]
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Description this resource was created from.
    #[inline]
    #[must_use]
    pub fn description(&self) -> &Description {
        &self.description
    }

    #[must_use]
    pub fn buffer(&self) -> Option<BufferId> {
        match self.allocation {
            Allocation::Buffer(id) => Some(id),
            Allocation::Image { .. } => None,
        }
    }

    #[must_use]
    pub fn texture(&self) -> Option<TextureId> {
        match self.allocation {
            Allocation::Image { texture, .. } => Some(texture),
            Allocation::Buffer(_) => None,
        }
    }

    /// Pixel size of an image resource.
    #[must_use]
    pub fn extent(&self) -> Option<Viewport> {
        match self.allocation {
            Allocation::Image { extent, .. } => Some(extent),
            Allocation::Buffer(_) => None,
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.key)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("allocation", &self.allocation)
            .field("size", &self.byte_size())
            .finish_non_exhaustive()
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        log::trace!("Releasing resource '{}' {:?}", self.tag, self.key);
        match self.allocation {
            Allocation::Buffer(id) => self.backend.destroy_buffer(id),
            Allocation::Image { texture, .. } => self.backend.destroy_texture(texture),
        }
    }
}

fn buffer_usage(kind: DataKind, access: Access) -> BufferUsage {
    let mut usage = match kind {
        DataKind::Vertex => BufferUsage::VERTEX,
        DataKind::Index => BufferUsage::INDEX,
        DataKind::Uniform => BufferUsage::UNIFORM,
        DataKind::Storage => BufferUsage::STORAGE,
        DataKind::Draw => BufferUsage::INDIRECT,
        DataKind::Texture | DataKind::RenderTarget => BufferUsage::empty(),
    };
    if access.host_writable() {
        usage |= BufferUsage::COPY_DST;
    }
    if access.host_readable() {
        usage |= BufferUsage::COPY_SRC | BufferUsage::MAP_READ;
    }
    usage
}

fn texture_usage(description: &Description) -> TextureUsage {
    match description.kind() {
        DataKind::RenderTarget => {
            let mut usage = TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED;
            if description.is_presentable() || description.access_qualifier().host_readable() {
                usage |= TextureUsage::COPY_SRC;
            }
            usage
        }
        _ => TextureUsage::SAMPLED | TextureUsage::COPY_DST,
    }
}

pub struct ResourceManager {
    backend: Arc<Backend>,
    frame_lag: usize,
    resources: FxHashMap<ResourceKey, Arc<Resource>>,
    owners: FxHashMap<String, String>,
}

impl ResourceManager {
    #[must_use]
    pub fn new(backend: Arc<Backend>, frame_lag: usize) -> Self {
        Self {
            backend,
            frame_lag: frame_lag.max(1),
            resources: FxHashMap::default(),
            owners: FxHashMap::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn frame_lag(&self) -> usize {
        self.frame_lag
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Keys a description maps to, without touching any allocation.
    #[must_use]
    pub fn keys_for(&self, description: &Description) -> ResourceSet {
        match description.update_scheme() {
            UpdateScheme::Static => SmallVec::from_elem(ResourceKey::fixed(description.tag()), 1),
            UpdateScheme::Dynamic => (0..self.frame_lag)
                .map(|slot| ResourceKey::per_slot(description.tag(), slot))
                .collect(),
        }
    }

    /// Records `stage` as the owner of `description`'s tag.
    ///
    /// Fails when another stage already owns the tag, unless both declare
    /// it as a render target.
    pub fn claim(&mut self, stage: &str, description: &Description) -> Result<()> {
        match self.owners.get(description.tag()) {
            Some(owner) if owner != stage && description.kind() != DataKind::RenderTarget => {
                Err(PipelineError::InvalidDescription {
                    tag: description.tag().to_string(),
                    reason: format!("already owned by stage '{owner}'"),
                })
            }
            Some(_) => Ok(()),
            None => {
                self.owners
                    .insert(description.tag().to_string(), stage.to_string());
                Ok(())
            }
        }
    }

    /// Stage that claimed `tag`, if any.
    #[must_use]
    pub fn owner(&self, tag: &str) -> Option<&str> {
        self.owners.get(tag).map(String::as_str)
    }

    /// Allocates the resource(s) for `description`.
    ///
    /// Existing keys are kept unless `force` is set, in which case a new
    /// allocation replaces the table entry. Holders of the old `Arc` keep it
    /// alive until they rebind. Either way an existing key must have been
    /// created from an equal description.
    pub fn create_resource(
        &mut self,
        description: &Description,
        viewport: Viewport,
        force: bool,
    ) -> Result<ResourceSet> {
        description.validate()?;
        if description.byte_size(viewport) == 0 {
            return Err(PipelineError::InvalidDescription {
                tag: description.tag().to_string(),
                reason: format!("allocation for viewport {viewport:?} is empty"),
            });
        }

        let keys = self.keys_for(description);
        if let Some(existing) = keys.iter().find_map(|key| self.resources.get(key))
            && existing.description() != description
        {
            log::error!(
                "Tag '{}' redeclared with a different description",
                description.tag()
            );
            return Err(PipelineError::InvalidDescription {
                tag: description.tag().to_string(),
                reason: "conflicts with the description already allocated under this tag".into(),
            });
        }

        for (slot, &key) in keys.iter().enumerate() {
            if !force && self.resources.contains_key(&key) {
                continue;
            }
            let slot = (description.update_scheme() == UpdateScheme::Dynamic).then_some(slot);
            let resource = self.allocate(description, key, slot, viewport)?;
            log::debug!(
                "Created resource '{}' {:?} (slot {:?}, {} bytes)",
                resource.tag,
                key,
                slot,
                resource.byte_size()
            );
            self.resources.insert(key, Arc::new(resource));
        }
        Ok(keys)
    }

    fn allocate(
        &self,
        description: &Description,
        key: ResourceKey,
        slot: Option<usize>,
        viewport: Viewport,
    ) -> Result<Resource> {
        let label = match slot {
            Some(slot) => format!("{}[{slot}]", description.tag()),
            None => description.tag().to_string(),
        };

        let allocation = if description.kind().is_image() {
            let format = description
                .format()
                .ok_or_else(|| PipelineError::InvalidDescription {
                    tag: description.tag().to_string(),
                    reason: "image without texel format".into(),
                })?;
            let extent = description
                .image_extent()
                .map_or(viewport, |e| e.resolve(viewport));
            let texture = self.backend.create_texture(&TextureDesc {
                label,
                width: extent.width,
                height: extent.height,
                format,
                usage: texture_usage(description),
            })?;
            Allocation::Image { texture, extent }
        } else {
            let buffer = self.backend.create_buffer(&BufferDesc {
                label,
                size: description.byte_size(viewport),
                usage: buffer_usage(description.kind(), description.access_qualifier()),
            })?;
            Allocation::Buffer(buffer)
        };

        Ok(Resource {
            key,
            tag: description.tag().to_string(),
            kind: description.kind(),
            slot,
            allocation,
            format: description.format(),
            stride: description.stride(),
            unit_count: description.unit_count(viewport),
            access: description.access_qualifier(),
            description: description.clone(),
            backend: self.backend.clone(),
        })
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: ResourceKey) -> Option<&Arc<Resource>> {
        self.resources.get(&key)
    }

    /// Looks up the resource behind `key`.
    pub fn resolve(&self, key: ResourceKey) -> Result<Arc<Resource>> {
        self.resources.get(&key).cloned().ok_or_else(|| {
            log::error!("Resolving {key:?} before it was created");
            PipelineError::UnknownResource(key)
        })
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: ResourceKey) -> bool {
        self.resources.contains_key(&key)
    }

    /// Drops every resource created for `tag`. Returns how many were removed.
    pub fn release(&mut self, tag: &str) -> usize {
        let before = self.resources.len();
        self.resources.retain(|_, r| r.tag() != tag);
        self.owners.remove(tag);
        before - self.resources.len()
    }

    pub fn clear(&mut self) {
        log::debug!("Clearing {} resources", self.resources.len());
        self.resources.clear();
        self.owners.clear();
    }

    // ─── Data Transfer ────────────────────────────────────────────────────────

    /// Copies `data` into `resource` at `offset`.
    ///
    /// Takes the backend explicitly so producer threads can write without
    /// access to the manager itself.
    pub fn write_resource(
        backend: &Backend,
        resource: &Resource,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        if !resource.access.host_writable() {
            return Err(PipelineError::AccessViolation {
                tag: resource.tag.clone(),
                operation: "host writes",
            });
        }
        let end = offset.checked_add(data.len() as u64).unwrap_or(u64::MAX);
        if end > resource.byte_size() {
            return Err(PipelineError::OutOfBounds {
                tag: resource.tag.clone(),
                offset,
                end,
                size: resource.byte_size(),
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        match resource.allocation {
            Allocation::Buffer(id) => backend.write_buffer(id, offset, data),
            Allocation::Image { texture, extent } => {
                // Whole rows only; partial rows go through write_image_region.
                let pitch = u64::from(extent.width) * resource.stride;
                if !offset.is_multiple_of(pitch) || !(data.len() as u64).is_multiple_of(pitch) {
                    return Err(PipelineError::InvalidDescription {
                        tag: resource.tag.clone(),
                        reason: format!("image writes must cover whole rows of {pitch} bytes"),
                    });
                }
                let region = ImageRegion {
                    x: 0,
                    y: (offset / pitch) as u32,
                    width: extent.width,
                    height: (data.len() as u64 / pitch) as u32,
                };
                backend.write_texture(texture, region, data)
            }
        }
    }

    /// Copies a tightly packed block of texels into `region` of an image resource.
    pub fn write_image_region(
        backend: &Backend,
        resource: &Resource,
        region: ImageRegion,
        data: &[u8],
    ) -> Result<()> {
        if !resource.access.host_writable() {
            return Err(PipelineError::AccessViolation {
                tag: resource.tag.clone(),
                operation: "host writes",
            });
        }
        let Allocation::Image { texture, extent } = resource.allocation else {
            return Err(PipelineError::InvalidDescription {
                tag: resource.tag.clone(),
                reason: "region writes need an image resource".into(),
            });
        };
        let right = u64::from(region.x) + u64::from(region.width);
        let bottom = u64::from(region.y) + u64::from(region.height);
        if right > u64::from(extent.width) || bottom > u64::from(extent.height) {
            return Err(PipelineError::OutOfBounds {
                tag: resource.tag.clone(),
                offset: u64::from(region.y) * u64::from(extent.width) + u64::from(region.x),
                end: bottom * u64::from(extent.width),
                size: resource.unit_count,
            });
        }
        backend.write_texture(texture, region, data)
    }

    /// Reads `len` bytes at `offset` back to the host.
    pub fn read_resource(
        backend: &Backend,
        resource: &Resource,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        if !resource.access.host_readable() {
            return Err(PipelineError::AccessViolation {
                tag: resource.tag.clone(),
                operation: "host reads",
            });
        }
        let end = offset.checked_add(len).unwrap_or(u64::MAX);
        if end > resource.byte_size() {
            return Err(PipelineError::OutOfBounds {
                tag: resource.tag.clone(),
                offset,
                end,
                size: resource.byte_size(),
            });
        }
        match resource.allocation {
            Allocation::Buffer(id) => backend.read_buffer(id, offset, len),
            Allocation::Image { .. } => Err(PipelineError::Unsupported {
                backend: backend.name(),
                operation: "image readback",
            }),
        }
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeKind, Format};

    fn vertex(tag: &str) -> Description {
        Description::vertex(tag)
            .attribute(AttributeKind::Position, Format::Rgb32Float)
            .max_units(4)
    }

    #[test]
    fn dynamic_creates_one_instance_per_slot() {
        let mut manager = ResourceManager::new(Backend::headless(), 3);
        let keys = manager
            .create_resource(&vertex("mesh").dynamic(), Viewport::default(), false)
            .unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(manager.len(), 3);
        for (slot, key) in keys.iter().enumerate() {
            assert_eq!(manager.get(*key).unwrap().slot(), Some(slot));
        }
    }

    #[test]
    fn creation_is_idempotent_unless_forced() {
        let mut manager = ResourceManager::new(Backend::headless(), 2);
        let desc = vertex("mesh");
        let key = manager.create_resource(&desc, Viewport::default(), false).unwrap()[0];
        let first = manager.resolve(key).unwrap();

        manager.create_resource(&desc, Viewport::default(), false).unwrap();
        assert!(Arc::ptr_eq(&first, &manager.resolve(key).unwrap()));

        manager.create_resource(&desc, Viewport::default(), true).unwrap();
        assert!(!Arc::ptr_eq(&first, &manager.resolve(key).unwrap()));
    }

    #[test]
    fn last_reference_frees_the_allocation() {
        let backend = Backend::headless();
        let mut manager = ResourceManager::new(backend.clone(), 1);
        let key = manager
            .create_resource(&vertex("mesh"), Viewport::default(), false)
            .unwrap()[0];
        let held = manager.resolve(key).unwrap();
        let headless = backend.as_headless().unwrap();

        assert_eq!(manager.release("mesh"), 1);
        assert_eq!(headless.live_buffers(), 1);
        drop(held);
        assert_eq!(headless.live_buffers(), 0);
    }

    #[test]
    fn write_respects_access_and_bounds() {
        let backend = Backend::headless();
        let mut manager = ResourceManager::new(backend.clone(), 1);
        let key = manager
            .create_resource(&vertex("mesh"), Viewport::default(), false)
            .unwrap()[0];
        let resource = manager.resolve(key).unwrap();

        assert!(ResourceManager::write_resource(&backend, &resource, 0, &[1; 48]).is_ok());
        assert!(matches!(
            ResourceManager::write_resource(&backend, &resource, 40, &[1; 12]),
            Err(PipelineError::OutOfBounds { end: 52, size: 48, .. })
        ));
        assert!(matches!(
            ResourceManager::write_resource(&backend, &resource, u64::MAX - 1, &[1; 4]),
            Err(PipelineError::OutOfBounds { end: u64::MAX, .. })
        ));

        let key = manager
            .create_resource(
                &vertex("gpu").access(Access::DeviceOnly),
                Viewport::default(),
                false,
            )
            .unwrap()[0];
        let device_only = manager.resolve(key).unwrap();
        assert!(matches!(
            ResourceManager::write_resource(&backend, &device_only, 0, &[0; 4]),
            Err(PipelineError::AccessViolation { .. })
        ));
    }

    #[test]
    fn unknown_key_is_reported() {
        let manager = ResourceManager::new(Backend::headless(), 1);
        let key = ResourceKey::fixed("missing");
        assert!(matches!(
            manager.resolve(key),
            Err(PipelineError::UnknownResource(k)) if k == key
        ));
    }
}
