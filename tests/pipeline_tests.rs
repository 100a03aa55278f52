//! Pipeline Tests
//!
//! Tests for:
//! - Stage chain initialization and frame submission on the headless backend
//! - Resize: static identity kept, framebuffers and pipelines rebuilt
//! - Render-target references across chained stages, before and after resize
//! - Indirect argument updates without re-recording
//! - Declaration and lifecycle errors, tag ownership, attachment extents
//! - Device loss surfacing as errors

use std::sync::Arc;

use anyhow::Result;

use myth_stages::backend::{HeadlessBackend, LoadOp};
use myth_stages::{
    AttributeKind, Backend, BackendKind, BindingDescription, DataKind, Description, DrawArgs,
    DrawDescription, Format, ImageExtent, Pipeline, PipelineError, PipelineSettings, ResourceKey,
    ShaderDescription, ShaderSource, ShaderStages, Stage, StageState, Viewport,
};

const TRIANGLE_WGSL: &str = r"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(1) color: vec4<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(position, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return in.color;
}
";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn shader() -> ShaderDescription {
    ShaderDescription::wgsl(ShaderSource::Wgsl(TRIANGLE_WGSL.into()))
}

fn headless(pipeline: &Pipeline) -> &HeadlessBackend {
    pipeline
        .backend()
        .as_headless()
        .expect("tests run on the headless backend")
}

fn mesh(tag: &str) -> Description {
    Description::vertex(tag)
        .attribute(AttributeKind::Position, Format::Rgb32Float)
        .attribute(AttributeKind::Color, Format::Rgba32Float)
        .max_units(3)
}

/// Stage 1 draws a dynamic mesh into its own `color` target.
fn scene_stage() -> Result<Stage> {
    let mut stage = Stage::new("scene");
    stage.register(mesh("mesh").dynamic())?;
    stage.register(
        Description::uniform("globals")
            .attribute(AttributeKind::Matrix, Format::Rgba32Float)
            .max_units(4),
    )?;
    stage.register(Description::render_target("color", Format::Rgba8Unorm).presentable())?;
    stage.register_draw(
        DrawDescription::new("triangle", "mesh", shader())
            .render_target("color")
            .bind(0, BindingDescription::new(ShaderStages::VERTEX, DataKind::Uniform, "globals"))
            .args(DrawArgs::new(3, 0, 0)),
    )?;
    Ok(stage)
}

/// Stage 2 draws an overlay on top of stage 1's `color`.
fn overlay_stage() -> Result<Stage> {
    let mut stage = Stage::new("overlay");
    stage.register(mesh("quad"))?;
    stage.register_draw(
        DrawDescription::new("composite", "quad", shader())
            .render_target("color")
            .args(DrawArgs::new(6, 0, 0)),
    )?;
    Ok(stage)
}

fn two_stage_pipeline(settings: PipelineSettings) -> Result<Pipeline> {
    let mut pipeline = Pipeline::headless(settings)?;
    pipeline.add_stage(scene_stage()?)?;
    pipeline.add_stage(overlay_stage()?)?;
    pipeline.initialize()?;
    Ok(pipeline)
}

// ============================================================================
// Initialization & Frames
// ============================================================================

#[test]
fn initialize_builds_every_stage() -> Result<()> {
    init_logger();
    let pipeline = two_stage_pipeline(PipelineSettings::default())?;

    for stage in pipeline.chain().iter() {
        assert_eq!(stage.state(), StageState::Initialized);
        assert!(stage.framebuffer(0).is_some());
        assert!(stage.framebuffer(1).is_some());
        assert!(stage.framebuffer(2).is_none());
    }

    // Dynamic mesh: one instance per slot. Static globals and color: one each. Quad: one.
    assert_eq!(pipeline.resources().len(), 5);
    let scene = pipeline.stage("scene")?;
    assert_eq!(scene.color_attachments(), vec!["color"]);
    assert_eq!(scene.extent(), Some(pipeline.settings().viewport));
    Ok(())
}

#[test]
fn frames_rotate_slots_and_record_indirect_draws() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;

    let slots: Vec<usize> = (0..3)
        .map(|_| pipeline.frame_draw())
        .collect::<Result<_, _>>()?;
    assert_eq!(slots, vec![0, 1, 0]);
    assert_eq!(pipeline.frame_index(), 3);

    let submissions = headless(&pipeline).submissions();
    assert_eq!(submissions.len(), 3);
    let last = submissions.last().expect("three submissions");
    assert_eq!(last.slot, 0);
    assert_eq!(last.passes.len(), 2);
    assert_eq!(last.passes[0].label, "scene");
    assert_eq!(last.passes[0].draws.len(), 1);
    assert_eq!(last.passes[0].draws[0].args, vec![3, 1, 0, 0]);
    assert_eq!(last.passes[1].draws[0].args, vec![6, 1, 0, 0]);
    Ok(())
}

#[test]
fn presentable_target_is_presented_unless_disabled() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    pipeline.frame_draw()?;
    let color = pipeline.resources().resolve(ResourceKey::fixed("color"))?;
    let submission = headless(&pipeline).last_submission().expect("one frame");
    assert_eq!(submission.presented, color.texture());
    drop(color);

    let mut quiet = two_stage_pipeline(PipelineSettings {
        present: false,
        ..Default::default()
    })?;
    quiet.frame_draw()?;
    assert_eq!(headless(&quiet).last_submission().expect("one frame").presented, None);
    Ok(())
}

#[test]
fn draw_args_update_rewrites_indirect_record_only() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    let before = pipeline
        .stage("scene")?
        .draw_pass("triangle")
        .and_then(|p| p.command_list(0))
        .expect("recorded draw");

    pipeline.set_draw_args("scene", "triangle", DrawArgs::new(2, 1, 0))?;
    pipeline.frame_draw()?;

    let pass = pipeline.stage("scene")?.draw_pass("triangle").expect("draw pass");
    assert_eq!(pass.command_list(0), Some(before));
    assert_eq!(pass.args(), DrawArgs::new(2, 1, 0));
    let submission = headless(&pipeline).last_submission().expect("one frame");
    assert_eq!(submission.passes[0].draws[0].args, vec![2, 1, 1, 0]);

    // The new arguments survive a rebuild.
    pipeline.resize(Viewport::new(320, 200))?;
    pipeline.frame_draw()?;
    let submission = headless(&pipeline).last_submission().expect("two frames");
    assert_eq!(submission.passes[0].draws[0].args, vec![2, 1, 1, 0]);
    Ok(())
}

#[test]
fn depth_stage_attaches_depth_view() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    let mut stage = pipeline.depth_stage("scene")?;
    stage.register(mesh("mesh"))?;
    stage.register(Description::render_target("color", Format::Bgra8Unorm))?;
    stage.register_draw(DrawDescription::new("triangle", "mesh", shader()).render_target("color"))?;
    pipeline.add_stage(stage)?;
    pipeline.initialize()?;

    let scene = pipeline.stage("scene")?;
    let framebuffer = scene.framebuffer(0).expect("framebuffer");
    let desc = headless(&pipeline)
        .framebuffer_desc(framebuffer)
        .expect("live framebuffer");
    assert!(desc.depth_view.is_some());
    Ok(())
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn resize_twice_keeps_static_identity_and_rebuilds_passes() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    let viewport = Viewport::new(800, 600);
    pipeline.resize(viewport)?;

    let globals = pipeline.resources().resolve(ResourceKey::fixed("globals"))?;
    let color = pipeline.resources().resolve(ResourceKey::fixed("color"))?;
    let mesh_endpoint = pipeline.endpoint("scene", DataKind::Vertex, "mesh")?;
    let scene = pipeline.stage("scene")?;
    let framebuffers: Vec<_> = (0..2).map(|slot| scene.framebuffer(slot)).collect();
    let draw_pipeline = scene.draw_pass("triangle").and_then(|p| p.pipeline());

    pipeline.resize(viewport)?;

    assert!(Arc::ptr_eq(
        &globals,
        &pipeline.resources().resolve(ResourceKey::fixed("globals"))?
    ));
    assert!(Arc::ptr_eq(
        &color,
        &pipeline.resources().resolve(ResourceKey::fixed("color"))?
    ));
    assert!(Arc::ptr_eq(
        &mesh_endpoint,
        &pipeline.endpoint("scene", DataKind::Vertex, "mesh")?
    ));
    let scene = pipeline.stage("scene")?;
    let bound = scene
        .resource(DataKind::Uniform, "globals", 0)
        .expect("globals alias");
    assert!(Arc::ptr_eq(&globals, &bound));

    for slot in 0..2 {
        assert!(scene.framebuffer(slot).is_some());
        assert_ne!(scene.framebuffer(slot), framebuffers[slot]);
    }
    assert_ne!(scene.draw_pass("triangle").and_then(|p| p.pipeline()), draw_pipeline);
    Ok(())
}

#[test]
fn resize_recreates_viewport_sized_targets_only() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    let globals = pipeline.resources().resolve(ResourceKey::fixed("globals"))?;
    let color = pipeline.resources().resolve(ResourceKey::fixed("color"))?;
    let buffers = headless(&pipeline).live_buffers();

    pipeline.resize(Viewport::new(640, 480))?;

    assert!(Arc::ptr_eq(
        &globals,
        &pipeline.resources().resolve(ResourceKey::fixed("globals"))?
    ));
    let resized = pipeline.resources().resolve(ResourceKey::fixed("color"))?;
    assert!(!Arc::ptr_eq(&color, &resized));
    assert_eq!(resized.extent(), Some(Viewport::new(640, 480)));
    assert_eq!(headless(&pipeline).live_buffers(), buffers);
    Ok(())
}

#[test]
fn empty_viewport_resize_is_ignored() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    let framebuffer = pipeline.stage("scene")?.framebuffer(0);
    pipeline.resize(Viewport::new(0, 600))?;
    assert_eq!(pipeline.stage("scene")?.framebuffer(0), framebuffer);
    assert_eq!(pipeline.viewport(), PipelineSettings::default().viewport);
    Ok(())
}

// ============================================================================
// Chained Render Targets
// ============================================================================

#[test]
fn successor_framebuffer_references_predecessor_target_after_resize() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    pipeline.resize(Viewport::new(640, 480))?;

    let color = pipeline.resources().resolve(ResourceKey::fixed("color"))?;
    let overlay = pipeline.stage("overlay")?;
    let backend = headless(&pipeline);
    for slot in 0..2 {
        let framebuffer = overlay.framebuffer(slot).expect("framebuffer");
        let desc = backend.framebuffer_desc(framebuffer).expect("live framebuffer");
        assert_eq!(desc.extent, Viewport::new(640, 480));
        assert_eq!(backend.view_texture(desc.color_views[0]), color.texture());
    }

    let inherited = overlay
        .resource(DataKind::RenderTarget, "color", 0)
        .expect("overlay aliases the scene target");
    assert!(Arc::ptr_eq(&color, &inherited));

    // The successor loads what the predecessor drew; the owner clears it.
    let load = |stage: &str| -> Result<LoadOp> {
        let pass = pipeline.stage(stage)?.render_pass().expect("render pass");
        Ok(backend.render_pass_desc(pass).expect("live pass").colors[0].load)
    };
    assert!(matches!(load("scene")?, LoadOp::Clear(_)));
    assert_eq!(load("overlay")?, LoadOp::Load);

    pipeline.frame_draw()?;
    let backend = headless(&pipeline);
    let submission = backend.last_submission().expect("one frame");
    assert_eq!(
        backend.view_texture(submission.passes[1].color_views[0]),
        color.texture()
    );
    Ok(())
}

#[test]
fn successor_samples_predecessor_target() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    pipeline.add_stage(scene_stage()?)?;

    let mut post = Stage::new("post");
    post.register(mesh("quad"))?;
    post.register(Description::render_target("final", Format::Rgba16Float).presentable())?;
    post.register_draw(
        DrawDescription::new("tonemap", "quad", shader())
            .render_target("final")
            .bind(0, BindingDescription::new(ShaderStages::FRAGMENT, DataKind::RenderTarget, "color")),
    )?;
    pipeline.add_stage(post)?;
    pipeline.initialize()?;
    pipeline.frame_draw()?;

    let final_target = pipeline.resources().resolve(ResourceKey::fixed("final"))?;
    let submission = headless(&pipeline).last_submission().expect("one frame");
    assert_eq!(submission.presented, final_target.texture());
    let tonemap = pipeline.stage("post")?.draw_pass("tonemap");
    assert!(tonemap.and_then(|p| p.bind_set(0)).is_some());
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn unresolved_vertex_tag_fails_initialize() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    let mut stage = Stage::new("scene");
    stage.register(Description::render_target("color", Format::Rgba8Unorm))?;
    stage.register_draw(DrawDescription::new("triangle", "missing", shader()).render_target("color"))?;
    pipeline.add_stage(stage)?;

    let err = pipeline.initialize().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnresolvedTag { kind: DataKind::Vertex, ref tag, .. } if tag == "missing"
    ));
    Ok(())
}

#[test]
fn data_tags_belong_to_one_stage() -> Result<()> {
    init_logger();
    for units in [4, 1] {
        let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
        pipeline.add_stage(scene_stage()?)?;

        let mut hud = overlay_stage()?;
        hud.register(
            Description::uniform("globals")
                .attribute(AttributeKind::Matrix, Format::Rgba32Float)
                .max_units(units),
        )?;
        pipeline.add_stage(hud)?;

        let err = pipeline.initialize().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidDescription { ref tag, ref reason }
                if tag == "globals" && reason.contains("scene")
        ));
        let globals = pipeline.resources().resolve(ResourceKey::fixed("globals"))?;
        assert_eq!(globals.unit_count(), 4);
    }
    Ok(())
}

#[test]
fn attachments_of_one_pass_share_an_extent() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    let mut stage = Stage::new("scene");
    stage.register(mesh("mesh"))?;
    stage.register(Description::render_target("color", Format::Rgba8Unorm))?;
    stage.register(
        Description::render_target("mask", Format::R8Unorm)
            .extent(ImageExtent::Fixed { width: 17, height: 9 }),
    )?;
    stage.register_draw(
        DrawDescription::new("triangle", "mesh", shader())
            .render_target("color")
            .render_target("mask"),
    )?;
    pipeline.add_stage(stage)?;

    let err = pipeline.initialize().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::InvalidDescription { ref tag, ref reason }
            if tag == "mask" && reason.contains("17x9")
    ));
    Ok(())
}

#[test]
fn sampled_target_reserves_the_next_binding() {
    let color = BindingDescription::new(ShaderStages::FRAGMENT, DataKind::RenderTarget, "color");
    let exposure = BindingDescription::new(ShaderStages::FRAGMENT, DataKind::Uniform, "exposure");
    let mut post = Stage::new("post");
    let err = post
        .register_draw(
            DrawDescription::new("tonemap", "quad", shader())
                .render_target("final")
                .bind(0, color)
                .bind(1, exposure),
        )
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidDescription { .. }));
}

#[test]
fn lost_device_fails_frames_instead_of_hanging() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    pipeline.frame_draw()?;
    headless(&pipeline).lose_device();

    assert!(matches!(pipeline.frame_draw(), Err(PipelineError::Backend(_))));
    assert!(matches!(
        pipeline.resize(Viewport::new(300, 300)),
        Err(PipelineError::Backend(_))
    ));
    assert_eq!(pipeline.frame_index(), 1);
    assert_eq!(pipeline.viewport(), PipelineSettings::default().viewport);
    Ok(())
}

#[test]
fn chain_is_sealed_after_initialize() -> Result<()> {
    init_logger();
    let mut pipeline = two_stage_pipeline(PipelineSettings::default())?;
    assert!(matches!(
        pipeline.add_stage(Stage::new("late")),
        Err(PipelineError::ChainSealed)
    ));
    assert!(matches!(pipeline.initialize(), Err(PipelineError::ChainSealed)));
    Ok(())
}

#[test]
fn frame_before_initialize_is_rejected() -> Result<()> {
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    assert!(matches!(
        pipeline.frame_draw(),
        Err(PipelineError::InvalidState { .. })
    ));
    Ok(())
}

#[test]
fn endpoint_lookup_errors() -> Result<()> {
    init_logger();
    let pipeline = two_stage_pipeline(PipelineSettings::default())?;
    assert!(matches!(
        pipeline.endpoint("nowhere", DataKind::Vertex, "mesh"),
        Err(PipelineError::UnknownStage(_))
    ));
    assert!(matches!(
        pipeline.endpoint("scene", DataKind::Uniform, "nope"),
        Err(PipelineError::UnknownEndpoint { .. })
    ));
    // Render targets are written by the device only.
    assert!(matches!(
        pipeline.endpoint("scene", DataKind::RenderTarget, "color"),
        Err(PipelineError::UnknownEndpoint { .. })
    ));
    Ok(())
}

#[test]
fn settings_must_match_backend() {
    let settings = PipelineSettings {
        backend: BackendKind::Wgpu,
        ..Default::default()
    };
    assert!(matches!(
        Pipeline::new(settings, Backend::headless()),
        Err(PipelineError::BackendInit(_))
    ));
}

#[test]
fn dropping_the_pipeline_releases_backend_objects() -> Result<()> {
    init_logger();
    let backend = Backend::headless();
    {
        let mut pipeline = Pipeline::new(PipelineSettings::default(), backend.clone())?;
        pipeline.add_stage(scene_stage()?)?;
        pipeline.add_stage(overlay_stage()?)?;
        pipeline.initialize()?;
        pipeline.frame_draw()?;
        pipeline.resize(Viewport::new(300, 300))?;
    }
    let headless = backend.as_headless().expect("headless");
    assert_eq!(headless.live_objects(), 0);
    assert_eq!(headless.live_buffers(), 0);
    assert_eq!(headless.live_textures(), 0);
    Ok(())
}
