//! # Relais Batch
//!
//! Adaptive I/O batching for a single event-loop worker.
//!
//! Database reads, database writes and cache-server commands each form an
//! independent stream. When a stream is idle, the first submission is
//! sent immediately (a "solo probe", which also measures the round-trip
//! honestly); submissions arriving while the probe is outstanding
//! accumulate and fire as one pipeline when it returns. The result: the
//! first request pays one round-trip, and everything arriving within that
//! round-trip shares the next one.
//!
//! The scheduler is deliberately single-threaded (`!Send`): one instance
//! per worker, driven from a `tokio::task::LocalSet` or current-thread
//! runtime. All cross-task state lives in `RefCell`s with no borrows held
//! across suspension points.

mod estimator;
mod gate;
mod scheduler;

pub use estimator::TimingEstimator;
pub use gate::ConcurrencyGate;
pub use scheduler::{BatchScheduler, WriteOutcome, MAX_BATCH_ENTRIES};
