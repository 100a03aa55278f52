//! Resource Tests
//!
//! Tests for:
//! - ResourceKey: Static stability, Dynamic distinctness
//! - ResourceManager: instance count per scheme, idempotent creation, forced recreation
//! - Tag ownership: one description per tag, render targets shared between stages
//! - AliasTable: lazy resolution, reference counting, rebinding after recreation
//! - Description JSON round trip into a live resource

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;

use myth_stages::resource::{AliasKind, AliasTable};
use myth_stages::{
    Access, AttributeKind, Backend, DataKind, Description, Format, PipelineError, ResourceKey,
    ResourceManager, UpdateScheme, Viewport,
};

const FRAME_LAG: usize = 3;

fn manager() -> ResourceManager {
    ResourceManager::new(Backend::headless(), FRAME_LAG)
}

fn particles() -> Description {
    Description::storage("particles")
        .attribute(AttributeKind::Position, Format::Rgba32Float)
        .attribute(AttributeKind::Vector, Format::Rgba32Float)
        .max_units(256)
        .access(Access::HostOnly)
}

// ============================================================================
// Keys
// ============================================================================

#[test]
fn static_key_ignores_slot() {
    for tag in ["globals", "mesh", "", "ünïcode"] {
        let reference = ResourceKey::new(tag, UpdateScheme::Static, 0);
        for slot in 0..8 {
            assert_eq!(ResourceKey::new(tag, UpdateScheme::Static, slot), reference);
        }
        assert_eq!(reference, ResourceKey::fixed(tag));
    }
}

#[test]
fn dynamic_keys_are_distinct_per_slot_and_tag() {
    let mut seen = HashSet::new();
    for tag in ["mesh", "mesh2", "globals"] {
        for slot in 0..FRAME_LAG {
            assert!(seen.insert(ResourceKey::new(tag, UpdateScheme::Dynamic, slot)));
        }
        assert!(seen.insert(ResourceKey::fixed(tag)));
    }
    // Recomputable from (tag, scheme, slot) alone.
    assert!(seen.contains(&ResourceKey::per_slot("mesh2", 1)));
}

// ============================================================================
// ResourceManager
// ============================================================================

#[test]
fn dynamic_description_gets_one_instance_per_slot() -> Result<()> {
    let mut manager = manager();
    let keys = manager.create_resource(&particles().dynamic(), Viewport::default(), false)?;
    assert_eq!(keys.len(), FRAME_LAG);
    for (slot, key) in keys.iter().enumerate() {
        let resource = manager.resolve(*key)?;
        assert_eq!(resource.slot(), Some(slot));
        assert_eq!(resource.byte_size(), 32 * 256);
        assert_eq!(resource.kind(), DataKind::Storage);
    }

    let static_keys = manager.create_resource(&particles(), Viewport::default(), false)?;
    assert_eq!(static_keys.as_slice(), &[ResourceKey::fixed("particles")]);
    assert_eq!(manager.len(), FRAME_LAG + 1);
    Ok(())
}

#[test]
fn creation_is_idempotent_unless_forced() -> Result<()> {
    let mut manager = manager();
    let desc = particles();
    let key = manager.create_resource(&desc, Viewport::default(), false)?[0];
    let first = manager.resolve(key)?;

    manager.create_resource(&desc, Viewport::default(), false)?;
    assert!(Arc::ptr_eq(&first, &manager.resolve(key)?));

    manager.create_resource(&desc, Viewport::default(), true)?;
    let second = manager.resolve(key)?;
    assert!(!Arc::ptr_eq(&first, &second));
    assert_ne!(first.buffer(), second.buffer());
    Ok(())
}

#[test]
fn viewport_sized_images_follow_the_viewport() -> Result<()> {
    let mut manager = manager();
    let target = Description::render_target("hdr", Format::Rgba16Float);
    let key = manager.create_resource(&target, Viewport::new(64, 32), false)?[0];
    let resource = manager.resolve(key)?;
    assert_eq!(resource.extent(), Some(Viewport::new(64, 32)));
    assert_eq!(resource.byte_size(), 64 * 32 * 8);
    assert!(resource.texture().is_some());
    assert!(resource.buffer().is_none());
    Ok(())
}

#[test]
fn release_frees_every_instance() -> Result<()> {
    let backend = Backend::headless();
    let mut manager = ResourceManager::new(backend.clone(), FRAME_LAG);
    manager.create_resource(&particles().dynamic(), Viewport::default(), false)?;
    let headless = backend.as_headless().expect("headless");
    assert_eq!(headless.live_buffers(), FRAME_LAG);

    assert_eq!(manager.release("particles"), FRAME_LAG);
    assert_eq!(headless.live_buffers(), 0);
    assert!(manager.is_empty());
    Ok(())
}

#[test]
fn invalid_descriptions_are_rejected() {
    let mut manager = manager();
    let empty = Description::uniform("nothing").max_units(4);
    assert!(manager.create_resource(&empty, Viewport::default(), false).is_err());

    let zero_units = Description::uniform("zero").attribute(AttributeKind::Raw, Format::R32Float);
    assert!(manager.create_resource(&zero_units, Viewport::default(), false).is_err());

    let bad_index = Description::index("indices", Format::Rgba8Unorm).max_units(3);
    assert!(manager.create_resource(&bad_index, Viewport::default(), false).is_err());
    assert!(manager.is_empty());
}

#[test]
fn tag_keeps_its_first_description() -> Result<()> {
    let mut manager = manager();
    let small = Description::uniform("params")
        .attribute(AttributeKind::Raw, Format::R32Float)
        .max_units(1);
    let key = manager.create_resource(&small, Viewport::default(), false)?[0];

    let large = small.clone().max_units(16);
    for force in [false, true] {
        assert!(matches!(
            manager.create_resource(&large, Viewport::default(), force),
            Err(PipelineError::InvalidDescription { ref tag, .. }) if tag == "params"
        ));
    }
    let resource = manager.resolve(key)?;
    assert_eq!(resource.byte_size(), 4);
    assert_eq!(resource.description(), &small);
    Ok(())
}

#[test]
fn only_render_targets_are_shared_between_stages() -> Result<()> {
    let mut manager = manager();
    manager.claim("scene", &particles())?;
    manager.claim("scene", &particles())?;
    assert!(matches!(
        manager.claim("post", &particles()),
        Err(PipelineError::InvalidDescription { ref reason, .. }) if reason.contains("scene")
    ));
    assert_eq!(manager.owner("particles"), Some("scene"));

    let target = Description::render_target("color", Format::Rgba8Unorm);
    manager.claim("scene", &target)?;
    manager.claim("post", &target)?;
    assert_eq!(manager.owner("color"), Some("scene"));

    manager.create_resource(&particles(), Viewport::default(), false)?;
    manager.release("particles");
    assert_eq!(manager.owner("particles"), None);
    manager.claim("post", &particles())?;
    Ok(())
}

// ============================================================================
// Aliases
// ============================================================================

#[test]
fn alias_rebinds_after_forced_recreate() -> Result<()> {
    let mut manager = manager();
    let target = Description::render_target("color", Format::Rgba8Unorm);
    let key = manager.create_resource(&target, Viewport::new(16, 16), false)?[0];

    let mut aliases = AliasTable::new();
    let view = aliases
        .get_or_resolve(key, AliasKind::Image, Some(Default::default()), &manager)?
        .view();
    assert!(view.is_some());
    assert_eq!(aliases.refresh(&manager)?, 0);

    manager.create_resource(&target, Viewport::new(32, 32), true)?;
    assert_eq!(aliases.refresh(&manager)?, 1);

    let alias = aliases.get(key).expect("alias stays keyed");
    assert!(Arc::ptr_eq(
        alias.resource().expect("bound"),
        &manager.resolve(key)?
    ));
    assert_ne!(alias.view(), view);
    assert!(alias.sampler().is_some());
    Ok(())
}

#[test]
fn last_reference_releases_the_allocation() -> Result<()> {
    let backend = Backend::headless();
    let mut manager = ResourceManager::new(backend.clone(), FRAME_LAG);
    let key = manager.create_resource(&particles(), Viewport::default(), false)?[0];

    let mut aliases = AliasTable::new();
    aliases.get_or_resolve(key, AliasKind::Buffer, None, &manager)?;
    let resource = manager.resolve(key)?;
    // Manager, alias and this test.
    assert_eq!(Arc::strong_count(&resource), 3);
    drop(resource);

    manager.clear();
    let headless = backend.as_headless().expect("headless");
    assert_eq!(headless.live_buffers(), 1, "alias keeps the buffer alive");
    aliases.clear();
    assert_eq!(headless.live_buffers(), 0);
    Ok(())
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn description_from_json_allocates() -> Result<()> {
    let json = r#"{
        "tag": "lights",
        "kind": "Uniform",
        "attributes": [
            { "kind": "Position", "format": "Rgba32Float" },
            { "kind": "Color", "format": "Rgba32Float" }
        ],
        "max_units": 16,
        "scheme": "Dynamic"
    }"#;
    let desc: Description = serde_json::from_str(json)?;
    assert_eq!(desc.stride(), 32);
    assert_eq!(desc.access_qualifier(), Access::HostToDevice);

    let mut manager = manager();
    let keys = manager.create_resource(&desc, Viewport::default(), false)?;
    assert_eq!(keys.len(), FRAME_LAG);
    assert_eq!(manager.resolve(keys[2])?.byte_size(), 32 * 16);
    Ok(())
}
