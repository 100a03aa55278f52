//! Stage Chain
//!
//! Ordered list of stages. Order is fixed once the chain is initialized;
//! every stage is built and resized after all of its predecessors so render
//! targets produced upstream already exist when a successor attaches to them.

use super::stage::{Stage, StageContext};
use crate::errors::{PipelineError, Result};

#[derive(Default)]
pub struct StageChain {
    stages: Vec<Stage>,
    sealed: bool,
}

impl StageChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage. Names must be unique.
    pub fn push(&mut self, stage: Stage) -> Result<usize> {
        if self.sealed {
            return Err(PipelineError::ChainSealed);
        }
        if self.index_of(stage.name()).is_some() {
            return Err(PipelineError::InvalidDescription {
                tag: stage.name().to_string(),
                reason: "a stage with this name is already in the chain".into(),
            });
        }
        self.stages.push(stage);
        Ok(self.stages.len() - 1)
    }

    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.name() == name)
    }

    /// Looks a stage up by name, failing with `UnknownStage`.
    pub fn stage(&self, name: &str) -> Result<&Stage> {
        self.get(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    pub fn stage_mut(&mut self, name: &str) -> Result<&mut Stage> {
        self.get_mut(name)
            .ok_or_else(|| PipelineError::UnknownStage(name.to_string()))
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Stage before `index`, if any.
    #[must_use]
    pub fn prev(&self, index: usize) -> Option<&Stage> {
        index.checked_sub(1).and_then(|i| self.stages.get(i))
    }

    /// Stage after `index`, if any.
    #[must_use]
    pub fn next(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stage> {
        self.stages.iter_mut()
    }

    /// Initializes every stage in order and seals the chain.
    pub(crate) fn initialize(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        self.sealed = true;
        for index in 0..self.stages.len() {
            let (predecessors, rest) = self.stages.split_at_mut(index);
            rest[0].initialize(ctx, predecessors)?;
        }
        Ok(())
    }

    /// Rebuilds every stage in order for `ctx.viewport`.
    pub(crate) fn resize(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for stage in &mut self.stages {
            stage.mark_resize_pending()?;
        }
        for index in 0..self.stages.len() {
            let (predecessors, rest) = self.stages.split_at_mut(index);
            rest[0].resize(ctx, predecessors)?;
        }
        Ok(())
    }

    /// Destroys stages back to front.
    pub(crate) fn destroy(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            stage.destroy();
        }
    }
}

impl Drop for StageChain {
    fn drop(&mut self) {
        self.destroy();
    }
}
