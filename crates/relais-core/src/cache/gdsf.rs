//! Global GDSF eviction policy.
//!
//! One policy instance is shared by every GDSF-enabled repository in the
//! process. It owns the generation counter, the memory budget accounting,
//! the admission threshold with its correction coefficient, and the
//! registry of enrolled repositories used for emergency cleanup.
//!
//! Score model: `score = decayed_access_count x avg_construction_cost_us
//! / memory_usage_bytes`. Scores are derived on demand, never stored.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::metrics::StripedGauge;

use super::metadata::GdsfMeta;

/// Per-generation decay multiplier applied to access counts.
pub const DECAY_FACTOR: f32 = 0.8;

/// Bytes charged for a ghost slot (metadata only, no entity value).
pub const GHOST_OVERHEAD_BYTES: usize = 64;

/// Precomputed powers of the decay factor; a generation delta beyond the
/// table saturates to the last entry (effectively zero).
const DECAY_TABLE_LEN: usize = 32;

/// Callbacks a repository registers with the policy so emergency cleanup
/// and cross-repository coordination work without knowing its type.
pub struct RepoHandle {
    pub name: String,
    pub sweep: Box<dyn Fn() -> bool + Send + Sync>,
    pub size: Box<dyn Fn() -> usize + Send + Sync>,
    pub repo_score: Box<dyn Fn() -> f32 + Send + Sync>,
}

/// Global GDSF state: generation, used-bytes accounting, threshold and
/// correction, enrolled repositories. All lock-free except the registry.
pub struct GdsfPolicy {
    budget_bytes: u64,
    generation: AtomicU32,
    used: StripedGauge,
    threshold_bits: AtomicU32,
    correction_bits: AtomicU32,
    registry: RwLock<Vec<RepoHandle>>,
    decay_table: [f32; DECAY_TABLE_LEN + 1],
}

fn f32_bits(v: f32) -> u32 {
    v.to_bits()
}

fn bits_f32(v: u32) -> f32 {
    f32::from_bits(v)
}

impl GdsfPolicy {
    /// Create a policy with the given L1 memory budget in bytes.
    pub fn new(budget_bytes: u64) -> Arc<Self> {
        let mut decay_table = [1.0f32; DECAY_TABLE_LEN + 1];
        for i in 1..=DECAY_TABLE_LEN {
            decay_table[i] = decay_table[i - 1] * DECAY_FACTOR;
        }
        Arc::new(Self {
            budget_bytes,
            generation: AtomicU32::new(0),
            used: StripedGauge::new(),
            threshold_bits: AtomicU32::new(f32_bits(0.0)),
            correction_bits: AtomicU32::new(f32_bits(1.0)),
            registry: RwLock::new(Vec::new()),
            decay_table,
        })
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Advance the generation; called after each sweep cycle.
    pub fn tick(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Decay multiplier for a generation delta.
    pub fn decay_pow(&self, delta: u32) -> f32 {
        self.decay_table[(delta as usize).min(DECAY_TABLE_LEN)]
    }

    /// Lazily decay a metadata word up to the current generation.
    pub fn decay(&self, meta: &GdsfMeta) -> u32 {
        meta.decay(self.generation(), |d| self.decay_pow(d))
    }

    /// Decay and record one access.
    pub fn bump(&self, meta: &GdsfMeta) -> u32 {
        meta.bump(self.generation(), |d| self.decay_pow(d))
    }

    /// Derived score for an entry.
    pub fn score(count: u32, cost_us: f32, bytes: usize) -> f32 {
        if bytes == 0 {
            return f32::MAX;
        }
        count as f32 * cost_us / bytes as f32
    }

    // =========================================================================
    // Memory accounting
    // =========================================================================

    pub fn add_bytes(&self, bytes: usize) {
        self.used.add(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub fn sub_bytes(&self, bytes: usize) {
        self.used.add(-i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load().max(0) as u64
    }

    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.budget_bytes as f64
    }

    pub fn is_over_budget(&self) -> bool {
        self.used_bytes() > self.budget_bytes
    }

    /// Eviction pressure as a function of budget utilization.
    ///
    /// Flat 1.0 below 0.75, linear ramp to 2.0 at 0.95, quadratic above.
    /// Monotonically non-decreasing.
    pub fn pressure_factor(&self) -> f32 {
        let u = self.utilization();
        if u < 0.75 {
            1.0
        } else if u < 0.95 {
            (1.0 + (u - 0.75) / 0.20) as f32
        } else {
            (2.0 + 300.0 * (u - 0.95) * (u - 0.95)) as f32
        }
    }

    // =========================================================================
    // Threshold
    // =========================================================================

    /// Current eviction threshold (before the pressure factor).
    pub fn threshold(&self) -> f32 {
        bits_f32(self.threshold_bits.load(Ordering::Relaxed))
    }

    /// Threshold applied at admission time: threshold x pressure.
    pub fn admission_threshold(&self) -> f32 {
        self.threshold() * self.pressure_factor()
    }

    #[cfg(any(test, feature = "test-internals"))]
    pub fn set_threshold(&self, t: f32) {
        self.threshold_bits.store(f32_bits(t), Ordering::Relaxed);
    }

    fn correction(&self) -> f32 {
        bits_f32(self.correction_bits.load(Ordering::Relaxed))
    }

    /// Fold one sweep's survivor statistics into the threshold.
    ///
    /// The threshold tracks the average surviving-entry score (EMA) times a
    /// correction coefficient nudged by how much the sweep had to reject.
    pub fn record_sweep(&self, kept_avg_score: f32, kept: usize, rejected: usize) {
        let scanned = kept + rejected;
        if scanned > 0 {
            let reject_ratio = rejected as f32 / scanned as f32;
            let old_corr = self.correction();
            // Over budget with nothing rejected: the threshold is too low.
            // Healthy sweeps relax the correction back toward 1.
            let target = if self.is_over_budget() && reject_ratio < 0.05 {
                old_corr * 1.05
            } else {
                old_corr + 0.05 * (1.0 - old_corr)
            };
            self.correction_bits
                .store(f32_bits(target.clamp(0.25, 4.0)), Ordering::Relaxed);
        }

        if kept > 0 {
            let old = self.threshold();
            let next = if old == 0.0 {
                kept_avg_score * self.correction()
            } else {
                old + 0.2 * (kept_avg_score * self.correction() - old)
            };
            self.threshold_bits.store(f32_bits(next), Ordering::Relaxed);
        }

        self.tick();
    }

    // =========================================================================
    // Registry + emergency cleanup
    // =========================================================================

    /// Register a repository's sweep callbacks. Called once per repository
    /// on construction.
    pub fn enroll(&self, handle: RepoHandle) {
        self.registry.write().push(handle);
    }

    pub fn enrolled_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Synchronous cleanup on the caller's thread: sweep enrolled
    /// repositories, lowest repo score first, until usage drops to 95% of
    /// budget or a full round makes no progress.
    pub fn emergency_cleanup(&self) {
        let target = self.budget_bytes.saturating_mul(95) / 100;
        let registry = self.registry.read();
        if registry.is_empty() {
            return;
        }

        let mut order: Vec<usize> = (0..registry.len()).collect();
        order.sort_by(|&a, &b| {
            let sa = (registry[a].repo_score)();
            let sb = (registry[b].repo_score)();
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });

        loop {
            let before = self.used_bytes();
            if before <= target {
                return;
            }
            let mut progressed = false;
            for &idx in &order {
                if (registry[idx].sweep)() {
                    progressed = true;
                }
                if self.used_bytes() <= target {
                    return;
                }
            }
            if !progressed || self.used_bytes() >= before {
                tracing::warn!(
                    used = self.used_bytes(),
                    budget = self.budget_bytes,
                    "emergency cleanup could not reach target; admission control takes over"
                );
                return;
            }
        }
    }
}
