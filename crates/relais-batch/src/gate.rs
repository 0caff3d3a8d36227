//! Concurrency gate: caps total in-flight database + cache-server
//! requests per worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Semaphore over the worker's combined I/O budget, with acquire/release
/// counters exposed for diagnostics.
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    acquires: AtomicU64,
    releases: AtomicU64,
}

/// Holding this permit counts one in-flight request; dropping it releases
/// the slot.
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
    gate: &'a ConcurrencyGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.releases.fetch_add(1, Ordering::Relaxed);
    }
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    pub async fn acquire(&self) -> GatePermit<'_> {
        // The semaphore is never closed, so acquisition cannot fail.
        #[allow(clippy::expect_used)]
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("gate semaphore closed");
        self.acquires.fetch_add(1, Ordering::Relaxed);
        GatePermit { _permit: permit, gate: self }
    }

    pub fn in_flight(&self) -> u64 {
        self.acquires.load(Ordering::Relaxed) - self.releases.load(Ordering::Relaxed)
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquires.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let gate = ConcurrencyGate::new(2);
        let p1 = gate.acquire().await;
        let p2 = gate.acquire().await;
        assert_eq!(gate.in_flight(), 2);

        drop(p1);
        assert_eq!(gate.in_flight(), 1);
        let _p3 = gate.acquire().await;
        assert_eq!(gate.in_flight(), 2);
        drop(p2);
        assert_eq!(gate.acquire_count(), 3);
        assert_eq!(gate.release_count(), 2);
    }
}
