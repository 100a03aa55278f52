//! Data Aliases
//!
//! A [`DataAlias`] is the semantic handle a stage uses for one resource key.
//! It holds a strong reference to the resolved [`Resource`] plus the objects
//! derived from it (image view and sampler). Rebinding happens in a fixed
//! order so derived objects never outlive the allocation they were built
//! from:
//!
//! 1. take the new resource and drop the previous reference
//! 2. rebuild the view
//! 3. rebuild the sampler
//!
//! Aliases are created lazily in a per-stage [`AliasTable`] and rebuilt in
//! place when the stage resizes; their key never changes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::key::ResourceKey;
use super::manager::{Resource, ResourceManager};
use crate::backend::{Backend, DeviceBackend, SamplerId, TextureId, ViewId};
use crate::errors::Result;
use crate::model::SamplerDescription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasKind {
    Buffer,
    Image,
}

pub struct DataAlias {
    key: ResourceKey,
    kind: AliasKind,
    sampler_desc: Option<SamplerDescription>,
    resource: Option<Arc<Resource>>,
    view: Option<ViewId>,
    sampler: Option<SamplerId>,
    backend: Arc<Backend>,
}

impl DataAlias {
    #[must_use]
    pub fn new(
        key: ResourceKey,
        kind: AliasKind,
        sampler: Option<SamplerDescription>,
        backend: Arc<Backend>,
    ) -> Self {
        Self {
            key,
            kind,
            sampler_desc: sampler,
            resource: None,
            view: None,
            sampler: None,
            backend,
        }
    }

    /// Binds the alias to the current resource for its key and rebuilds the
    /// derived objects.
    pub fn resolve(&mut self, manager: &ResourceManager) -> Result<()> {
        let resource = manager.resolve(self.key)?;
        debug_assert_eq!(
            resource.kind().is_image(),
            self.kind == AliasKind::Image,
            "alias kind does not match resource '{}'",
            resource.tag()
        );

        self.release_derived();
        self.resource = Some(resource);

        if let (AliasKind::Image, Some(texture)) = (self.kind, self.texture_of_bound()) {
            self.view = Some(self.backend.create_view(texture)?);
            if let Some(desc) = &self.sampler_desc {
                self.sampler = Some(self.backend.create_sampler(desc)?);
            }
        }
        Ok(())
    }

    fn texture_of_bound(&self) -> Option<TextureId> {
        self.resource.as_ref().and_then(|r| r.texture())
    }

    fn release_derived(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            self.backend.destroy_sampler(sampler);
        }
        if let Some(view) = self.view.take() {
            self.backend.destroy_view(view);
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> AliasKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn view(&self) -> Option<ViewId> {
        self.view
    }

    #[inline]
    #[must_use]
    pub fn sampler(&self) -> Option<SamplerId> {
        self.sampler
    }

    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.resource.is_some()
    }
}

impl Drop for DataAlias {
    fn drop(&mut self) {
        self.release_derived();
    }
}

/// Per-stage table of aliases keyed by resource key.
#[derive(Default)]
pub struct AliasTable {
    aliases: FxHashMap<ResourceKey, DataAlias>,
}

impl AliasTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the alias for `key`, creating and resolving it on first use.
    pub fn get_or_resolve(
        &mut self,
        key: ResourceKey,
        kind: AliasKind,
        sampler: Option<SamplerDescription>,
        manager: &ResourceManager,
    ) -> Result<&DataAlias> {
        use std::collections::hash_map::Entry;

        match self.aliases.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let mut alias = DataAlias::new(key, kind, sampler, manager.backend().clone());
                alias.resolve(manager)?;
                Ok(entry.insert(alias))
            }
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: ResourceKey) -> Option<&DataAlias> {
        self.aliases.get(&key)
    }

    /// Rebinds an existing alias in place.
    pub fn rebind(&mut self, key: ResourceKey, manager: &ResourceManager) -> Result<bool> {
        match self.aliases.get_mut(&key) {
            Some(alias) => {
                alias.resolve(manager)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rebinds every alias whose bound resource is no longer the one the
    /// manager holds for its key. Returns how many were rebuilt.
    pub fn refresh(&mut self, manager: &ResourceManager) -> Result<usize> {
        let mut rebuilt = 0;
        for alias in self.aliases.values_mut() {
            let current = manager.get(alias.key());
            let stale = match (alias.resource(), current) {
                (Some(bound), Some(current)) => !Arc::ptr_eq(bound, current),
                (None, Some(_)) => true,
                (_, None) => false,
            };
            if stale {
                alias.resolve(manager)?;
                rebuilt += 1;
            }
        }
        Ok(rebuilt)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn clear(&mut self) {
        self.aliases.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Description, Format, Viewport};

    #[test]
    fn rebind_follows_forced_recreation() {
        let backend = Backend::headless();
        let mut manager = ResourceManager::new(backend.clone(), 1);
        let desc = Description::render_target("color", Format::Rgba8Unorm);
        let key = manager
            .create_resource(&desc, Viewport::new(8, 8), false)
            .unwrap()[0];

        let mut table = AliasTable::new();
        let first_view = table
            .get_or_resolve(key, AliasKind::Image, None, &manager)
            .unwrap()
            .view()
            .unwrap();

        manager.create_resource(&desc, Viewport::new(16, 16), true).unwrap();
        assert_eq!(table.refresh(&manager).unwrap(), 1);

        let alias = table.get(key).unwrap();
        assert_ne!(alias.view(), Some(first_view));
        assert_eq!(alias.resource().unwrap().extent(), Some(Viewport::new(16, 16)));
        // The old view and texture are gone: one texture, one view.
        let headless = backend.as_headless().unwrap();
        assert_eq!(headless.live_textures(), 1);
        assert_eq!(headless.view_texture(first_view), None);
    }

    #[test]
    fn strong_count_tracks_bindings() {
        let backend = Backend::headless();
        let mut manager = ResourceManager::new(backend, 1);
        let desc = Description::uniform("camera")
            .attribute(crate::model::AttributeKind::Matrix, Format::Rgba32Float)
            .max_units(4);
        let key = manager.create_resource(&desc, Viewport::default(), false).unwrap()[0];

        let mut a = AliasTable::new();
        let mut b = AliasTable::new();
        a.get_or_resolve(key, AliasKind::Buffer, None, &manager).unwrap();
        b.get_or_resolve(key, AliasKind::Buffer, None, &manager).unwrap();
        assert_eq!(Arc::strong_count(manager.get(key).unwrap()), 3);

        b.clear();
        assert_eq!(Arc::strong_count(manager.get(key).unwrap()), 2);
    }
}
