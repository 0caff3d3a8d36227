//! Adaptive estimation of network and per-query costs for batch
//! scheduling decisions.
//!
//! Maintains:
//! - per-stream network round-trip time (EMA, alpha 0.01), computed as
//!   the residual after subtracting known request cost from measured
//!   wall-clock time;
//! - per-SQL request time (EMA, alpha 0.1 scaled by batch fraction),
//!   keyed by the statement's pointer identity;
//! - a bootstrap counter (the first requests on a stream bypass batching
//!   to calibrate) and a staleness clock (no solo measurement for five
//!   minutes forces recalibration).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// First N requests on a stream are sent immediately to calibrate.
pub const BOOTSTRAP_THRESHOLD: u32 = 5;

/// A solo calibration older than this forces batching off until renewed.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default)]
struct SqlTiming {
    request_time_ns: f64,
    sample_count: u32,
}

/// Per-worker timing model. Not thread-safe by design - it lives inside
/// the scheduler's `RefCell`.
#[derive(Debug, Default)]
pub struct TimingEstimator {
    pub pg_network_time_ns: f64,
    pub redis_network_time_ns: f64,
    pg_bootstrap_count: u32,
    redis_bootstrap_count: u32,
    pg_last_solo: Option<Instant>,
    redis_last_solo: Option<Instant>,
    /// Keyed by SQL pointer identity - stable for the generated
    /// per-entity `&'static str` templates.
    sql_timings: HashMap<usize, SqlTiming>,
}

fn sql_key(sql: &'static str) -> usize {
    sql.as_ptr() as usize
}

impl TimingEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pg_bootstrapping(&self) -> bool {
        self.pg_bootstrap_count < BOOTSTRAP_THRESHOLD
    }

    pub fn is_redis_bootstrapping(&self) -> bool {
        self.redis_bootstrap_count < BOOTSTRAP_THRESHOLD
    }

    pub fn is_pg_stale(&self) -> bool {
        self.pg_last_solo
            .is_none_or(|at| at.elapsed() > STALENESS_THRESHOLD)
    }

    pub fn is_redis_stale(&self) -> bool {
        self.redis_last_solo
            .is_none_or(|at| at.elapsed() > STALENESS_THRESHOLD)
    }

    /// Estimated per-query cost for a statement (ns); 0 when unknown.
    pub fn request_time(&self, sql: &'static str) -> f64 {
        self.sql_timings
            .get(&sql_key(sql))
            .map_or(0.0, |t| t.request_time_ns)
    }

    /// Fold a solo-probe measurement into the PG network-time EMA.
    /// `measured_ns` is wall-clock; the statement's known cost is
    /// subtracted to isolate the network share.
    pub fn update_pg_network_time(&mut self, measured_ns: f64, request_time_ns: f64) {
        let mut net = measured_ns - request_time_ns;
        if net < 0.0 {
            // Estimate was off; assume an even split.
            net = measured_ns * 0.5;
        }
        if self.pg_bootstrap_count == 0 {
            self.pg_network_time_ns = net;
        } else {
            self.pg_network_time_ns += 0.01 * (net - self.pg_network_time_ns);
        }
        self.pg_bootstrap_count += 1;
        self.pg_last_solo = Some(Instant::now());
    }

    pub fn update_redis_network_time(&mut self, measured_ns: f64) {
        if self.redis_bootstrap_count == 0 {
            self.redis_network_time_ns = measured_ns;
        } else {
            self.redis_network_time_ns += 0.01 * (measured_ns - self.redis_network_time_ns);
        }
        self.redis_bootstrap_count += 1;
        self.redis_last_solo = Some(Instant::now());
    }

    /// Fold one statement's share of a batch measurement into its EMA.
    /// The learning rate scales with the statement's share of the batch,
    /// so a statement that contributed one query out of hundreds nudges
    /// its estimate only slightly.
    pub fn update_sql_timing(
        &mut self,
        sql: &'static str,
        batch_size: u32,
        total_batch_size: u32,
        measured_ns: f64,
    ) {
        let timing = self.sql_timings.entry(sql_key(sql)).or_default();
        let mut per_query = (measured_ns - self.pg_network_time_ns) / f64::from(batch_size.max(1));
        if per_query < 0.0 {
            per_query = measured_ns / f64::from(batch_size.max(1));
        }
        if timing.sample_count == 0 {
            timing.request_time_ns = per_query;
        } else {
            let alpha = 0.1 * f64::from(batch_size) / f64::from(total_batch_size.max(1));
            timing.request_time_ns += alpha * (per_query - timing.request_time_ns);
        }
        timing.sample_count += 1;
    }

    /// Seed the model as already calibrated. For services that know their
    /// round-trip times (and for tests) - skips the bootstrap phase.
    pub fn precalibrate(&mut self, pg_network_ns: f64, redis_network_ns: f64) {
        self.pg_network_time_ns = pg_network_ns;
        self.redis_network_time_ns = redis_network_ns;
        self.pg_bootstrap_count = BOOTSTRAP_THRESHOLD;
        self.redis_bootstrap_count = BOOTSTRAP_THRESHOLD;
        let now = Instant::now();
        self.pg_last_solo = Some(now);
        self.redis_last_solo = Some(now);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SQL_A: &str = "SELECT * FROM a WHERE id = $1";

    #[test]
    fn bootstrap_then_calibrated() {
        let mut est = TimingEstimator::new();
        assert!(est.is_pg_bootstrapping());
        assert!(est.is_pg_stale());

        for _ in 0..BOOTSTRAP_THRESHOLD {
            est.update_pg_network_time(1_000_000.0, 0.0);
        }
        assert!(!est.is_pg_bootstrapping());
        assert!(!est.is_pg_stale());
        assert!((est.pg_network_time_ns - 1_000_000.0).abs() < 1.0);
    }

    #[test]
    fn first_sample_seeds_directly() {
        let mut est = TimingEstimator::new();
        est.update_pg_network_time(2_000_000.0, 500_000.0);
        assert!((est.pg_network_time_ns - 1_500_000.0).abs() < 1.0);
    }

    #[test]
    fn negative_residual_falls_back_to_half() {
        let mut est = TimingEstimator::new();
        est.update_pg_network_time(1_000_000.0, 5_000_000.0);
        assert!((est.pg_network_time_ns - 500_000.0).abs() < 1.0);
    }

    #[test]
    fn sql_timing_keyed_by_pointer_identity() {
        let mut est = TimingEstimator::new();
        assert!((est.request_time(SQL_A) - 0.0).abs() < f64::EPSILON);
        est.update_sql_timing(SQL_A, 1, 1, 300_000.0);
        assert!(est.request_time(SQL_A) > 0.0);
    }

    #[test]
    fn batch_fraction_scales_learning_rate() {
        let mut est = TimingEstimator::new();
        est.update_sql_timing(SQL_A, 1, 1, 100_000.0);
        let seeded = est.request_time(SQL_A);

        // A tiny share of a large batch barely moves the estimate.
        est.update_sql_timing(SQL_A, 1, 100, 10_000_000.0);
        let nudged = est.request_time(SQL_A);
        assert!(nudged > seeded);
        assert!(nudged < seeded * 2.0);
    }

    #[test]
    fn precalibrate_skips_bootstrap() {
        let mut est = TimingEstimator::new();
        est.precalibrate(800_000.0, 200_000.0);
        assert!(!est.is_pg_bootstrapping());
        assert!(!est.is_redis_bootstrapping());
        assert!(!est.is_pg_stale());
        assert!(!est.is_redis_stale());
    }
}
