//! Compute Distribution Tests
//!
//! Tests for:
//! - distribute: exact fits, spilling across dimensions, divisibility and limit errors
//! - Dispatch passes built by a compute-only stage and submitted with a frame

use anyhow::Result;

use myth_stages::compute::{DistributionError, pad_to_local};
use myth_stages::{
    Access, AttributeKind, BindingDescription, ComputeLimits, DataKind, Description,
    DispatchDescription, Format, Pipeline, PipelineError, PipelineSettings, ShaderEntry,
    ShaderSource, ShaderStages, Stage, distribute,
};

const GENEROUS: ComputeLimits = ComputeLimits::with_group_count([65535, 65535, 65535]);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// distribute
// ============================================================================

#[test]
fn exact_fit_in_first_dimension() {
    let grid = distribute(1024, &[32, 1, 1], &GENEROUS).unwrap();
    assert_eq!(grid.global, [1024, 1, 1]);
    assert_eq!(grid.local, [32, 1, 1]);
    assert_eq!(grid.groups(), [32, 1, 1]);
}

#[test]
fn non_divisible_total_reports_error() {
    let err = distribute(1000, &[32, 1, 1], &GENEROUS).unwrap_err();
    assert_eq!(
        err,
        DistributionError::NotDivisible {
            total: 1000,
            group_items: 32
        }
    );
}

#[test]
fn every_grid_covers_the_workload_within_limits() {
    let limits = ComputeLimits::with_group_count([64, 64, 64]);
    let shapes: [&[u32]; 3] = [&[8, 1, 1], &[4, 4], &[2, 2, 2]];
    for shape in shapes {
        let group: u64 = shape.iter().map(|&l| u64::from(l)).product();
        for groups in [1u64, 7, 64, 128, 4096, 64 * 64 * 32] {
            let Ok(grid) = distribute(groups * group, shape, &limits) else {
                continue;
            };
            assert_eq!(grid.total_items(), groups * group, "shape {shape:?}");
            for d in 0..3 {
                assert_eq!(grid.global[d] % u64::from(grid.local[d]), 0);
                assert!(grid.groups()[d] <= limits.max_group_count[d]);
            }
        }
    }
}

#[test]
fn spill_into_second_dimension() {
    let limits = ComputeLimits::with_group_count([256, 65535, 65535]);
    let grid = distribute(64 * 1024, &[64, 1], &limits).unwrap();
    assert_eq!(grid.groups(), [256, 4, 1]);
    assert_eq!(grid.dimensions, 2);
}

#[test]
fn exhausted_limits_are_reported() {
    let limits = ComputeLimits::with_group_count([8, 8, 8]);
    let err = distribute(32 * 8 * 8 * 16, &[32, 1, 1], &limits).unwrap_err();
    assert!(matches!(err, DistributionError::ExceedsLimits { dimension: 2, .. }));
}

#[test]
fn padding_makes_any_total_distributable() {
    for total in [1u64, 31, 33, 1000, 4097] {
        let padded = pad_to_local(total, &[32]);
        assert!(padded >= total && padded - total < 32);
        assert!(distribute(padded, &[32], &GENEROUS).is_ok());
    }
}

// ============================================================================
// Dispatch passes
// ============================================================================

fn simulation_stage(work_items: u64) -> Result<Stage> {
    let mut stage = Stage::new("simulate");
    stage.register(
        Description::storage("particles")
            .attribute(AttributeKind::Vector, Format::Rgba32Float)
            .max_units(1024)
            .access(Access::DeviceOnly),
    )?;
    stage.register_dispatch(
        DispatchDescription::new(
            "step",
            ShaderEntry::new(ShaderSource::Path("shaders/step.wgsl".into()), "main"),
            &[32],
            work_items,
        )
        .bind(
            0,
            BindingDescription::new(ShaderStages::COMPUTE, DataKind::Storage, "particles"),
        ),
    )?;
    Ok(stage)
}

#[test]
fn compute_stage_dispatches_every_frame() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    pipeline.add_stage(simulation_stage(1024)?)?;
    pipeline.initialize()?;

    let stage = pipeline.stage("simulate")?;
    assert!(stage.framebuffer(0).is_none());
    let pass = stage.dispatch_pass().expect("dispatch pass");
    assert_eq!(pass.grid().groups(), [32, 1, 1]);

    pipeline.frame_draw()?;
    pipeline.frame_draw()?;
    let submissions = pipeline
        .backend()
        .as_headless()
        .expect("headless")
        .submissions();
    assert_eq!(submissions.len(), 2);
    for submission in submissions {
        assert_eq!(submission.passes[0].dispatch, Some([32, 1, 1]));
        assert!(submission.passes[0].framebuffer.is_none());
    }
    Ok(())
}

#[test]
fn non_divisible_dispatch_fails_initialize() -> Result<()> {
    init_logger();
    let mut pipeline = Pipeline::headless(PipelineSettings::default())?;
    pipeline.add_stage(simulation_stage(1000)?)?;
    let err = pipeline.initialize().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Distribution(DistributionError::NotDivisible { total: 1000, .. })
    ));
    Ok(())
}

#[test]
fn second_kernel_in_a_stage_is_rejected() -> Result<()> {
    let mut stage = simulation_stage(1024)?;
    let other = DispatchDescription::new(
        "other",
        ShaderEntry::new(ShaderSource::Wgsl(String::new()), "main"),
        &[64],
        64,
    );
    assert!(matches!(
        stage.register_dispatch(other),
        Err(PipelineError::InvalidDescription { .. })
    ));
    Ok(())
}
