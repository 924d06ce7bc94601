//! Bounded worker pools.
//!
//! Compile and link work each run on their own rayon pool. The dispatcher
//! acquires a [`SlotGuard`] before handing a job over, so it blocks while
//! every worker is busy instead of queueing unbounded work inside rayon.

use crate::error::BuildError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Counting semaphore.
#[derive(Debug)]
pub struct Slots {
    in_use: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl Slots {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            in_use: Mutex::new(0),
            released: Condvar::new(),
            capacity: capacity.max(1),
        })
    }

    /// Block until a slot is free and take it.
    pub fn acquire(self: &Arc<Self>) -> SlotGuard {
        let mut in_use = self.in_use.lock();
        while *in_use >= self.capacity {
            self.released.wait(&mut in_use);
        }
        *in_use += 1;
        SlotGuard {
            slots: Arc::clone(self),
        }
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A held slot, returned to its pool on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<Slots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut in_use = self.slots.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.slots.released.notify_one();
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    slots: Arc<Slots>,
}

impl WorkerPool {
    pub fn new(threads: usize, name: &'static str) -> Result<Self, BuildError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("ccf-{}-{}", name, i))
            .build()
            .map_err(|e| BuildError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            slots: Slots::new(threads),
        })
    }

    pub fn acquire(&self) -> SlotGuard {
        self.slots.acquire()
    }

    /// Run `job` on the pool; the slot is released when it returns.
    pub fn spawn<F>(&self, slot: SlotGuard, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(move || {
            let _slot = slot;
            job();
        });
    }

    pub fn threads(&self) -> usize {
        self.slots.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_slots_release_on_drop() {
        let slots = Slots::new(2);
        let a = slots.acquire();
        let _b = slots.acquire();
        assert_eq!(slots.in_use(), 2);
        drop(a);
        assert_eq!(slots.in_use(), 1);
    }

    #[test]
    fn test_zero_capacity_means_one() {
        let slots = Slots::new(0);
        assert_eq!(slots.capacity(), 1);
        let _held = slots.acquire();
        assert_eq!(slots.in_use(), 1);
    }

    #[test]
    fn test_pool_never_exceeds_capacity() {
        let pool = WorkerPool::new(3, "test").unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let slot = pool.acquire();
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            pool.spawn(slot, move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        // Taking every slot waits for the remaining jobs.
        let held: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        drop(held);
    }
}
