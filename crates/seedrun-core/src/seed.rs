//! Seed allocation shared by all workers.

use std::sync::atomic::{AtomicU64, Ordering};

pub type Seed = u64;

/// Hands out strictly increasing, never repeated seeds starting at an origin.
///
/// A seed is consumed the moment it is returned, whether or not its trial
/// ever manages to run.
#[derive(Debug)]
pub struct SeedAllocator {
    origin: Seed,
    next: AtomicU64,
}

impl SeedAllocator {
    pub fn new(origin: Seed) -> Self {
        Self {
            origin,
            next: AtomicU64::new(origin),
        }
    }

    pub fn next(&self) -> Seed {
        let seed = self.next.fetch_add(1, Ordering::Relaxed);
        debug_assert!(seed != Seed::MAX, "seed space exhausted");
        seed
    }

    /// Seed the next call to [`next`](Self::next) would return.
    pub fn peek(&self) -> Seed {
        self.next.load(Ordering::Relaxed)
    }

    /// Number of seeds handed out so far.
    pub fn issued(&self) -> u64 {
        self.peek() - self.origin
    }
}

impl Default for SeedAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
