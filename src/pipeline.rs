//! Pipeline
//!
//! Top-level object owned by the draw thread. Ties together the backend, the
//! resource manager, the stage chain and frame-slot rotation.
//!
//! # Frame
//!
//! [`Pipeline::frame_draw`] runs once per frame:
//!
//! 1. For every stage in chain order, wait until its endpoints are idle and
//!    encode its passes for the current slot.
//! 2. Submit all passes at once, presenting the presentable render target.
//! 3. Advance to the next slot, waiting for the backend to finish with it.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut pipeline = Pipeline::new(PipelineSettings::default(), Backend::headless())?;
//! let mut stage = Stage::new("scene");
//! stage.register(Description::vertex("mesh").attribute(AttributeKind::Position, Format::Rgb32Float).max_units(3).dynamic())?;
//! stage.register(Description::render_target("color", Format::Rgba8Unorm).presentable())?;
//! stage.register_draw(DrawDescription::new("triangle", "mesh", shader).render_target("color"))?;
//! pipeline.add_stage(stage)?;
//! pipeline.initialize()?;
//!
//! let mesh = pipeline.endpoint("scene", DataKind::Vertex, "mesh")?;
//! std::thread::spawn(move || mesh.write(bytemuck::cast_slice(&vertices), 0));
//! pipeline.frame_draw()?;
//! ```

use std::sync::Arc;

use crate::backend::{Backend, DeviceBackend, FrameSubmission};
use crate::errors::{PipelineError, Result};
use crate::model::{DataKind, DrawArgs, Viewport};
use crate::resource::ResourceManager;
use crate::settings::PipelineSettings;
use crate::stage::{InputSlot, Stage, StageChain, StageContext};
use crate::sync::FrameSync;

const PIPELINE: &str = "pipeline";

pub struct Pipeline {
    settings: PipelineSettings,
    viewport: Viewport,
    initialized: bool,
    // Stages release their aliases before the manager drops the resources.
    chain: StageChain,
    manager: ResourceManager,
    frame_sync: FrameSync,
    backend: Arc<Backend>,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, backend: Arc<Backend>) -> Result<Self> {
        settings.validate()?;
        if backend.kind() != settings.backend {
            return Err(PipelineError::BackendInit(format!(
                "settings request a {:?} backend but a {} backend was supplied",
                settings.backend,
                backend.name()
            )));
        }
        log::info!(
            "Creating pipeline on {} backend: frame lag {}, viewport {}x{}",
            backend.name(),
            settings.frame_lag,
            settings.viewport.width,
            settings.viewport.height
        );

        Ok(Self {
            viewport: settings.viewport,
            initialized: false,
            chain: StageChain::new(),
            manager: ResourceManager::new(backend.clone(), settings.frame_lag),
            frame_sync: FrameSync::new(settings.frame_lag),
            backend,
            settings,
        })
    }

    /// Pipeline over a fresh headless backend.
    pub fn headless(settings: PipelineSettings) -> Result<Self> {
        Self::new(settings, Backend::headless())
    }

    /// A new stage that owns a depth attachment in the configured depth format.
    pub fn depth_stage(&self, name: impl Into<String>) -> Result<Stage> {
        let mut stage = Stage::new(name);
        stage.set_depth_format(Some(self.settings.depth_format))?;
        Ok(stage)
    }

    /// Appends a stage to the chain. Fails once the pipeline is initialized.
    pub fn add_stage(&mut self, stage: Stage) -> Result<usize> {
        self.chain.push(stage)
    }

    /// Builds every stage in chain order.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(PipelineError::ChainSealed);
        }
        let mut ctx = StageContext {
            manager: &mut self.manager,
            viewport: self.viewport,
            current_slot: self.frame_sync.slot_handle(),
            clear_color: self.settings.clear_color,
        };
        self.chain.initialize(&mut ctx)?;
        self.initialized = true;
        log::info!(
            "Pipeline initialized: {} stages, {} resources",
            self.chain.len(),
            self.manager.len()
        );
        Ok(())
    }

    /// Encodes and submits one frame. Returns the slot that was drawn.
    pub fn frame_draw(&mut self) -> Result<usize> {
        if !self.initialized {
            return Err(PipelineError::InvalidState {
                stage: PIPELINE.into(),
                action: "draw a frame",
                state: "uninitialized",
            });
        }

        let slot = self.frame_sync.current_slot();
        let mut passes = Vec::with_capacity(self.chain.len());
        let mut present = None;
        for stage in self.chain.iter_mut() {
            stage.io().wait_until_idle();
            passes.push(stage.encode(slot)?);
            if self.settings.present
                && let Some(texture) = stage.presentable_texture(slot)
            {
                present = Some(texture);
            }
        }

        self.backend.submit_frame(&FrameSubmission {
            slot,
            passes,
            present,
        })?;
        let next = self.frame_sync.advance(self.backend.as_ref())?;
        log::trace!("Frame {slot} submitted, next slot {next}");
        Ok(slot)
    }

    /// Rebuilds viewport-dependent objects of every stage.
    ///
    /// A zero-sized viewport (minimized window) is ignored.
    pub fn resize(&mut self, viewport: Viewport) -> Result<()> {
        if viewport.is_empty() {
            log::debug!("Ignoring resize to empty viewport");
            return Ok(());
        }
        if !self.initialized {
            self.viewport = viewport;
            return Ok(());
        }

        log::info!("Resizing pipeline to {}x{}", viewport.width, viewport.height);
        self.backend.wait_idle()?;
        self.viewport = viewport;
        self.backend.resize_surface(viewport);
        let mut ctx = StageContext {
            manager: &mut self.manager,
            viewport,
            current_slot: self.frame_sync.slot_handle(),
            clear_color: self.settings.clear_color,
        };
        self.chain.resize(&mut ctx)
    }

    /// Write endpoint of `(kind, tag)` in `stage`.
    pub fn endpoint(&self, stage: &str, kind: DataKind, tag: &str) -> Result<Arc<InputSlot>> {
        self.chain.stage(stage)?.endpoint(kind, tag)
    }

    /// Changes the arguments of a recorded draw.
    pub fn set_draw_args(&mut self, stage: &str, draw: &str, args: DrawArgs) -> Result<()> {
        self.chain.stage_mut(stage)?.set_draw_args(draw, args)
    }

    pub fn stage(&self, name: &str) -> Result<&Stage> {
        self.chain.stage(name)
    }

    #[inline]
    #[must_use]
    pub fn chain(&self) -> &StageChain {
        &self.chain
    }

    #[inline]
    #[must_use]
    pub fn resources(&self) -> &ResourceManager {
        &self.manager
    }

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    #[must_use]
    pub fn current_slot(&self) -> usize {
        self.frame_sync.current_slot()
    }

    /// Frames submitted so far.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_sync.frame_index()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Releasing pipeline objects without a drained queue: {e}");
        }
        self.chain.destroy();
        self.manager.clear();
        log::debug!("Pipeline dropped");
    }
}
