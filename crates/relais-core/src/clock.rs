//! Background-refreshed monotonic clock for hot paths.
//!
//! A dedicated process-wide thread updates an atomic nanosecond counter
//! every 100 ms. TTL checks read it with a single relaxed load; paths
//! that need real precision (GDSF construction-cost measurement,
//! modification-log timestamps) use [`precise_nanos`] instead, which
//! reads the monotonic clock directly.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

static ANCHOR: OnceLock<Instant> = OnceLock::new();
static CACHED_NANOS: AtomicI64 = AtomicI64::new(0);
static REFRESHER_STARTED: AtomicU64 = AtomicU64::new(0);

fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Nanoseconds elapsed since the process-wide anchor, read from the real
/// monotonic clock.
pub fn precise_nanos() -> i64 {
    i64::try_from(anchor().elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Cached clock read: one relaxed atomic load.
///
/// Stale by at most ~100 ms once [`ensure_started`] has run; falls back
/// to the precise clock while the refresher has not yet ticked.
pub fn cached_nanos() -> i64 {
    let cached = CACHED_NANOS.load(Ordering::Relaxed);
    if cached == 0 {
        return precise_nanos();
    }
    cached
}

/// Start the background refresh thread (idempotent).
///
/// A plain thread rather than a runtime task: the clock must keep
/// ticking for the life of the process, independent of any executor.
pub fn ensure_started() {
    if REFRESHER_STARTED.load(Ordering::Relaxed) != 0 {
        return;
    }
    if REFRESHER_STARTED.swap(1, Ordering::SeqCst) != 0 {
        return;
    }
    CACHED_NANOS.store(precise_nanos().max(1), Ordering::Relaxed);
    std::thread::Builder::new()
        .name("relais-clock".to_string())
        .spawn(|| loop {
            std::thread::sleep(REFRESH_INTERVAL);
            CACHED_NANOS.store(precise_nanos().max(1), Ordering::Relaxed);
        })
        .ok();
}

/// Convert a duration into the clock's nanosecond representation.
pub fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn precise_clock_is_monotonic() {
        let a = precise_nanos();
        let b = precise_nanos();
        assert!(b >= a);
    }

    #[test]
    fn cached_clock_falls_back_before_start() {
        let a = cached_nanos();
        assert!(a > 0);
    }

    #[test]
    fn refresher_advances_cached_time() {
        ensure_started();
        let a = cached_nanos();
        std::thread::sleep(Duration::from_millis(250));
        let b = cached_nanos();
        assert!(b > a, "cached clock did not advance: {a} -> {b}");
    }

    #[test]
    fn duration_conversion() {
        assert_eq!(duration_nanos(Duration::from_micros(3)), 3_000);
        assert_eq!(duration_nanos(Duration::ZERO), 0);
    }
}
