use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::DeviceBackend;
use crate::errors::Result;

/// Rotation of the frames-in-flight slots.
///
/// The current slot is shared with every stage I/O endpoint through an
/// `Arc<AtomicUsize>`, so producers always write the instance the next frame
/// will draw from.
#[derive(Debug)]
pub struct FrameSync {
    frame_lag: usize,
    current: Arc<AtomicUsize>,
    frame_index: u64,
}

impl FrameSync {
    #[must_use]
    pub fn new(frame_lag: usize) -> Self {
        Self {
            frame_lag: frame_lag.max(1),
            current: Arc::new(AtomicUsize::new(0)),
            frame_index: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn frame_lag(&self) -> usize {
        self.frame_lag
    }

    #[inline]
    #[must_use]
    pub fn current_slot(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Number of completed rotations.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Shared handle to the current slot, read by producer threads.
    #[must_use]
    pub fn slot_handle(&self) -> Arc<AtomicUsize> {
        self.current.clone()
    }

    /// Moves to the next slot.
    ///
    /// Waits on the backend until the previous submission that used the next
    /// slot has finished, then publishes it as current. A failed wait leaves
    /// the rotation where it was.
    pub fn advance(&mut self, backend: &impl DeviceBackend) -> Result<usize> {
        let next = (self.current_slot() + 1) % self.frame_lag;
        backend.wait_for_slot(next)?;
        self.current.store(next, Ordering::Release);
        self.frame_index += 1;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    #[test]
    fn rotation_wraps_modulo_lag() {
        let backend = Backend::headless();
        let mut sync = FrameSync::new(3);
        let seen: Vec<_> = (0..7)
            .map(|_| sync.advance(backend.as_ref()).unwrap())
            .collect();
        assert_eq!(seen, [1, 2, 0, 1, 2, 0, 1]);
        assert_eq!(sync.frame_index(), 7);
    }

    #[test]
    fn shared_handle_follows_rotation() {
        let backend = Backend::headless();
        let mut sync = FrameSync::new(2);
        let handle = sync.slot_handle();
        sync.advance(backend.as_ref()).unwrap();
        assert_eq!(handle.load(Ordering::Acquire), 1);
    }

    #[test]
    fn failed_wait_keeps_the_slot() {
        let backend = Backend::headless();
        let mut sync = FrameSync::new(2);
        backend.as_headless().unwrap().lose_device();
        assert!(sync.advance(backend.as_ref()).is_err());
        assert_eq!(sync.current_slot(), 0);
        assert_eq!(sync.frame_index(), 0);
    }
}
