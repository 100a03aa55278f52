use parking_lot::{Condvar, Mutex};

/// Single-writer fence guarding one stage I/O endpoint.
///
/// A boolean "write pending" flag under a mutex, with broadcast wake-up on
/// release. Writers on the same endpoint are serialized: a second
/// [`acquire_for_write`](Self::acquire_for_write) blocks until the first
/// writer releases.
#[derive(Debug, Default)]
pub struct WriteFence {
    pending: Mutex<bool>,
    idle: Condvar,
}

impl WriteFence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a write as in progress, waiting for any current writer first.
    pub fn acquire_for_write(&self) {
        let mut pending = self.pending.lock();
        while *pending {
            self.idle.wait(&mut pending);
        }
        *pending = true;
    }

    /// Clears the pending flag and wakes every waiter.
    pub fn release_after_write(&self) {
        let mut pending = self.pending.lock();
        debug_assert!(*pending, "release without a matching acquire");
        *pending = false;
        drop(pending);
        self.idle.notify_all();
    }

    /// Blocks while a write is pending.
    pub fn wait_until_idle(&self) {
        let mut pending = self.pending.lock();
        while *pending {
            self.idle.wait(&mut pending);
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        *self.pending.lock()
    }

    /// Runs `write` between acquire and release.
    ///
    /// The fence is released even if `write` returns an error.
    pub fn guard<T>(&self, write: impl FnOnce() -> T) -> T {
        self.acquire_for_write();
        let _release = ReleaseOnDrop(self);
        write()
    }
}

struct ReleaseOnDrop<'a>(&'a WriteFence);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.release_after_write();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn waiter_sees_completed_write() {
        let fence = Arc::new(WriteFence::new());
        let value = Arc::new(AtomicUsize::new(0));

        fence.acquire_for_write();
        let writer = {
            let fence = fence.clone();
            let value = value.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                value.store(7, Ordering::Relaxed);
                fence.release_after_write();
            })
        };

        fence.wait_until_idle();
        assert_eq!(value.load(Ordering::Relaxed), 7);
        writer.join().unwrap();
    }

    #[test]
    fn same_endpoint_writers_are_serialized() {
        let fence = Arc::new(WriteFence::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (fence, inside, overlap) = (fence.clone(), inside.clone(), overlap.clone());
                thread::spawn(move || {
                    for _ in 0..100 {
                        fence.guard(|| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlap.fetch_add(1, Ordering::SeqCst);
                            }
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert!(!fence.is_pending());
    }
}
