//! The batch scheduler: three independent streams (database reads,
//! database writes, cache-server commands) with Nagle-like departure.
//!
//! Invariants:
//! - Single-threaded: all submissions come from the owning worker.
//!   Foreign threads must route through the event loop, never call in
//!   directly.
//! - Writes carry a sequence number and are sorted before the pipeline
//!   is sent, so commit order matches submission order.
//! - Identical writes (same SQL pointer, same parameters) coalesce: the
//!   follower receives the leader's result without its own round-trip.
//!   All result channels are collected before any completion is sent, so
//!   a completed leader can never dangle its followers.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relais_core::db::{DbProvider, DbRow, SqlParam};
use relais_core::l2::{RedisCommand, RedisProvider, RedisValue};
use relais_error::{BatchError, DbError, RelaisError, Result};
use tokio::sync::oneshot;
use tokio::task::spawn_local;

use crate::estimator::TimingEstimator;
use crate::gate::ConcurrencyGate;

/// Hard cap on entries per batch.
pub const MAX_BATCH_ENTRIES: usize = 512;

const MIN_PG_DEPARTURE: Duration = Duration::from_micros(100);
const MIN_REDIS_DEPARTURE: Duration = Duration::from_micros(50);

/// Result of a batched write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub affected: u64,
    /// True when this submission attached to an identical in-batch write
    /// and shared its round-trip.
    pub coalesced: bool,
}

struct ReadEntry {
    sql: &'static str,
    params: Vec<SqlParam>,
    tx: oneshot::Sender<Result<Arc<Vec<DbRow>>>>,
}

struct WriteEntry {
    sql: &'static str,
    params: Vec<SqlParam>,
    seq: u64,
    tx: oneshot::Sender<Result<WriteOutcome>>,
    followers: Vec<oneshot::Sender<Result<WriteOutcome>>>,
}

struct RedisEntry {
    cmd: RedisCommand,
    tx: oneshot::Sender<Result<RedisValue>>,
}

struct Stream<T> {
    batch: Vec<T>,
    inflight: bool,
    timer_gen: u64,
    cost_ns: f64,
}

// Manual impl: `derive` would demand `T: Default` for no reason.
impl<T> Default for Stream<T> {
    fn default() -> Self {
        Self { batch: Vec::new(), inflight: false, timer_gen: 0, cost_ns: 0.0 }
    }
}

impl<T> Stream<T> {
    /// Take the accumulated batch and cancel any pending departure timer.
    fn take(&mut self) -> Vec<T> {
        self.timer_gen += 1;
        self.cost_ns = 0.0;
        std::mem::take(&mut self.batch)
    }
}

struct State {
    estimator: TimingEstimator,
    pg_read: Stream<ReadEntry>,
    pg_write: Stream<WriteEntry>,
    redis: Stream<RedisEntry>,
    next_write_seq: u64,
}

struct Shared {
    db: Arc<dyn DbProvider>,
    redis: Option<Arc<dyn RedisProvider>>,
    gate: ConcurrencyGate,
    state: RefCell<State>,
}

/// Per-worker adaptive batcher. Cheap to clone (shared handle); `!Send` -
/// drive it from a `LocalSet` or current-thread runtime.
#[derive(Clone)]
pub struct BatchScheduler {
    shared: Rc<Shared>,
}

fn clone_error(e: &RelaisError) -> RelaisError {
    DbError::Query { message: e.to_string(), sql_state: None }.into()
}

impl BatchScheduler {
    pub fn new(
        db: Arc<dyn DbProvider>,
        redis: Option<Arc<dyn RedisProvider>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                db,
                redis,
                gate: ConcurrencyGate::new(max_concurrent),
                state: RefCell::new(State {
                    estimator: TimingEstimator::new(),
                    pg_read: Stream::default(),
                    pg_write: Stream::default(),
                    redis: Stream::default(),
                    next_write_seq: 0,
                }),
            }),
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.shared.gate
    }

    /// Seed the timing model (skips per-stream bootstrap).
    pub fn precalibrate(&self, pg_network_ns: f64, redis_network_ns: f64) {
        self.shared
            .state
            .borrow_mut()
            .estimator
            .precalibrate(pg_network_ns, redis_network_ns);
    }

    // =========================================================================
    // Database reads
    // =========================================================================

    /// Submit a read. Batched via the Nagle rule unless the stream is
    /// bootstrapping or stale.
    pub async fn submit_read(
        &self,
        sql: &'static str,
        params: Vec<SqlParam>,
    ) -> Result<Arc<Vec<DbRow>>> {
        let bypass = {
            let st = self.shared.state.borrow();
            st.estimator.is_pg_bootstrapping() || st.estimator.is_pg_stale()
        };
        if bypass {
            return self.send_solo_read(sql, params).await;
        }

        let probe = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_read.inflight {
                false
            } else {
                st.pg_read.inflight = true;
                true
            }
        };
        if probe {
            let result = self.send_solo_read(sql, params).await;
            self.shared.state.borrow_mut().pg_read.inflight = false;
            self.fire_read_batch();
            return result;
        }

        let (tx, rx) = oneshot::channel();
        let (first, ready) = {
            let mut st = self.shared.state.borrow_mut();
            let cost = st.estimator.request_time(sql);
            st.pg_read.cost_ns += cost;
            st.pg_read.batch.push(ReadEntry { sql, params, tx });
            let first = st.pg_read.batch.len() == 1;
            let ready = st.pg_read.cost_ns >= st.estimator.pg_network_time_ns
                || st.pg_read.batch.len() >= MAX_BATCH_ENTRIES;
            (first, ready)
        };
        if ready {
            self.fire_read_batch();
        } else if first {
            self.schedule_read_departure();
        }
        rx.await.unwrap_or(Err(BatchError::Dropped.into()))
    }

    async fn send_solo_read(
        &self,
        sql: &'static str,
        params: Vec<SqlParam>,
    ) -> Result<Arc<Vec<DbRow>>> {
        let _permit = self.shared.gate.acquire().await;
        let started = Instant::now();
        let result = self.shared.db.query_params(sql, &params).await;
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ns = started.elapsed().as_nanos() as f64;
        {
            let mut st = self.shared.state.borrow_mut();
            let known = st.estimator.request_time(sql);
            st.estimator.update_pg_network_time(elapsed_ns, known);
            st.estimator.update_sql_timing(sql, 1, 1, elapsed_ns);
        }
        result.map(Arc::new)
    }

    fn schedule_read_departure(&self) {
        let (gen, delay) = {
            let st = self.shared.state.borrow();
            let delay_ns = st.estimator.pg_network_time_ns.max(0.0) as u64;
            (
                st.pg_read.timer_gen,
                Duration::from_nanos(delay_ns).max(MIN_PG_DEPARTURE),
            )
        };
        let this = self.clone();
        spawn_local(async move {
            tokio::time::sleep(delay).await;
            let live = this.shared.state.borrow().pg_read.timer_gen == gen;
            if live {
                this.fire_read_batch();
            }
        });
    }

    fn fire_read_batch(&self) {
        let entries = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_read.batch.is_empty() {
                return;
            }
            st.pg_read.inflight = true;
            st.pg_read.take()
        };
        let this = self.clone();
        spawn_local(async move {
            this.run_read_batch(entries).await;
        });
    }

    async fn run_read_batch(&self, entries: Vec<ReadEntry>) {
        let statements: Vec<_> = entries
            .iter()
            .map(|e| (e.sql, e.params.clone()))
            .collect();
        let total = u32::try_from(entries.len()).unwrap_or(u32::MAX);

        let started = Instant::now();
        let result = {
            let _permit = self.shared.gate.acquire().await;
            self.shared.db.pipeline(statements).await
        };
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ns = started.elapsed().as_nanos() as f64;

        match result {
            Ok(mut all_rows) => {
                {
                    let mut st = self.shared.state.borrow_mut();
                    for entry in &entries {
                        st.estimator.update_sql_timing(
                            entry.sql,
                            1,
                            total,
                            elapsed_ns / f64::from(total.max(1)),
                        );
                    }
                }
                for entry in entries.into_iter().rev() {
                    let rows = all_rows.pop().unwrap_or_default();
                    let _ = entry.tx.send(Ok(Arc::new(rows)));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "read pipeline failed; all waiters notified");
                for entry in entries {
                    let _ = entry.tx.send(Err(clone_error(&e)));
                }
            }
        }

        let again = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_read.batch.is_empty() {
                st.pg_read.inflight = false;
                false
            } else {
                true
            }
        };
        if again {
            self.fire_read_batch();
        }
    }

    // =========================================================================
    // Database writes
    // =========================================================================

    /// Submit a write (INSERT/UPDATE/DELETE). Identical in-batch writes
    /// coalesce into one server round-trip.
    pub async fn submit_write(
        &self,
        sql: &'static str,
        params: Vec<SqlParam>,
    ) -> Result<WriteOutcome> {
        let bypass = {
            let st = self.shared.state.borrow();
            st.estimator.is_pg_bootstrapping() || st.estimator.is_pg_stale()
        };
        if bypass {
            return self.send_solo_write(sql, params).await;
        }

        let probe = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_write.inflight {
                false
            } else {
                st.pg_write.inflight = true;
                true
            }
        };
        if probe {
            let result = self.send_solo_write(sql, params).await;
            self.shared.state.borrow_mut().pg_write.inflight = false;
            self.fire_write_batch();
            return result;
        }

        let (tx, rx) = oneshot::channel();
        let (first, ready) = {
            let mut st = self.shared.state.borrow_mut();
            if let Some(leader) = st
                .pg_write
                .batch
                .iter_mut()
                .find(|e| std::ptr::eq(e.sql, sql) && e.params == params)
            {
                leader.followers.push(tx);
                drop(st);
                return rx.await.unwrap_or(Err(BatchError::Dropped.into()));
            }
            let seq = st.next_write_seq;
            st.next_write_seq += 1;
            st.pg_write
                .batch
                .push(WriteEntry { sql, params, seq, tx, followers: Vec::new() });
            (
                st.pg_write.batch.len() == 1,
                st.pg_write.batch.len() >= MAX_BATCH_ENTRIES,
            )
        };
        if ready {
            self.fire_write_batch();
        } else if first {
            self.schedule_write_departure();
        }
        rx.await.unwrap_or(Err(BatchError::Dropped.into()))
    }

    async fn send_solo_write(
        &self,
        sql: &'static str,
        params: Vec<SqlParam>,
    ) -> Result<WriteOutcome> {
        let _permit = self.shared.gate.acquire().await;
        let started = Instant::now();
        let result = self.shared.db.execute(sql, &params).await;
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ns = started.elapsed().as_nanos() as f64;
        {
            let mut st = self.shared.state.borrow_mut();
            let known = st.estimator.request_time(sql);
            st.estimator.update_pg_network_time(elapsed_ns, known);
            st.estimator.update_sql_timing(sql, 1, 1, elapsed_ns);
        }
        result.map(|affected| WriteOutcome { affected, coalesced: false })
    }

    fn schedule_write_departure(&self) {
        let (gen, delay) = {
            let st = self.shared.state.borrow();
            let delay_ns = st.estimator.pg_network_time_ns.max(0.0) as u64;
            (
                st.pg_write.timer_gen,
                Duration::from_nanos(delay_ns).max(MIN_PG_DEPARTURE),
            )
        };
        let this = self.clone();
        spawn_local(async move {
            tokio::time::sleep(delay).await;
            let live = this.shared.state.borrow().pg_write.timer_gen == gen;
            if live {
                this.fire_write_batch();
            }
        });
    }

    fn fire_write_batch(&self) {
        let entries = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_write.batch.is_empty() {
                return;
            }
            st.pg_write.inflight = true;
            st.pg_write.take()
        };
        let this = self.clone();
        spawn_local(async move {
            this.run_write_batch(entries).await;
        });
    }

    async fn run_write_batch(&self, mut entries: Vec<WriteEntry>) {
        // Committed order must match submission order.
        entries.sort_by_key(|e| e.seq);

        let statements: Vec<_> = entries
            .iter()
            .map(|e| (e.sql, e.params.clone()))
            .collect();

        let result = {
            let _permit = self.shared.gate.acquire().await;
            self.shared.db.pipeline_execute(statements).await
        };

        // Collect every (sender, outcome) pair before sending anything:
        // completing a leader's channel wakes its task, which may drop
        // state a follower's distribution would otherwise rely on.
        let mut completions = Vec::new();
        match result {
            Ok(counts) => {
                for (entry, affected) in entries.into_iter().zip(counts) {
                    for follower in entry.followers {
                        completions.push((
                            follower,
                            Ok(WriteOutcome { affected, coalesced: true }),
                        ));
                    }
                    completions
                        .push((entry.tx, Ok(WriteOutcome { affected, coalesced: false })));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "write pipeline failed; all waiters notified");
                for entry in entries {
                    for follower in entry.followers {
                        completions.push((follower, Err(clone_error(&e))));
                    }
                    completions.push((entry.tx, Err(clone_error(&e))));
                }
            }
        }
        for (tx, outcome) in completions {
            let _ = tx.send(outcome);
        }

        let again = {
            let mut st = self.shared.state.borrow_mut();
            if st.pg_write.batch.is_empty() {
                st.pg_write.inflight = false;
                false
            } else {
                true
            }
        };
        if again {
            self.fire_write_batch();
        }
    }

    // =========================================================================
    // Cache-server commands
    // =========================================================================

    /// Submit a cache-server command. Reads and writes pipeline together;
    /// the server guarantees per-connection order.
    pub async fn submit_redis(&self, cmd: RedisCommand) -> Result<RedisValue> {
        if self.shared.redis.is_none() {
            return Err(BatchError::NoCachePool.into());
        }

        let bypass = {
            let st = self.shared.state.borrow();
            st.estimator.is_redis_bootstrapping() || st.estimator.is_redis_stale()
        };
        if bypass {
            return self.send_solo_redis(cmd).await;
        }

        let probe = {
            let mut st = self.shared.state.borrow_mut();
            if st.redis.inflight {
                false
            } else {
                st.redis.inflight = true;
                true
            }
        };
        if probe {
            let result = self.send_solo_redis(cmd).await;
            self.shared.state.borrow_mut().redis.inflight = false;
            self.fire_redis_batch();
            return result;
        }

        let (tx, rx) = oneshot::channel();
        let (first, ready) = {
            let mut st = self.shared.state.borrow_mut();
            st.redis.batch.push(RedisEntry { cmd, tx });
            (
                st.redis.batch.len() == 1,
                st.redis.batch.len() >= MAX_BATCH_ENTRIES,
            )
        };
        if ready {
            self.fire_redis_batch();
        } else if first {
            self.schedule_redis_departure();
        }
        rx.await.unwrap_or(Err(BatchError::Dropped.into()))
    }

    async fn send_solo_redis(&self, cmd: RedisCommand) -> Result<RedisValue> {
        let provider = self
            .shared
            .redis
            .clone()
            .ok_or(BatchError::NoCachePool)?;
        let _permit = self.shared.gate.acquire().await;
        let started = Instant::now();
        let result = provider.exec(cmd).await;
        #[allow(clippy::cast_precision_loss)]
        let elapsed_ns = started.elapsed().as_nanos() as f64;
        self.shared
            .state
            .borrow_mut()
            .estimator
            .update_redis_network_time(elapsed_ns);
        result
    }

    fn schedule_redis_departure(&self) {
        let (gen, delay) = {
            let st = self.shared.state.borrow();
            let delay_ns = st.estimator.redis_network_time_ns.max(0.0) as u64;
            (
                st.redis.timer_gen,
                Duration::from_nanos(delay_ns).max(MIN_REDIS_DEPARTURE),
            )
        };
        let this = self.clone();
        spawn_local(async move {
            tokio::time::sleep(delay).await;
            let live = this.shared.state.borrow().redis.timer_gen == gen;
            if live {
                this.fire_redis_batch();
            }
        });
    }

    fn fire_redis_batch(&self) {
        let entries = {
            let mut st = self.shared.state.borrow_mut();
            if st.redis.batch.is_empty() {
                return;
            }
            st.redis.inflight = true;
            st.redis.take()
        };
        let this = self.clone();
        spawn_local(async move {
            this.run_redis_batch(entries).await;
        });
    }

    async fn run_redis_batch(&self, entries: Vec<RedisEntry>) {
        let Some(provider) = self.shared.redis.clone() else { return };
        let commands: Vec<_> = entries.iter().map(|e| e.cmd.clone()).collect();

        let result = {
            let _permit = self.shared.gate.acquire().await;
            provider.pipeline_exec(commands).await
        };

        match result {
            Ok(mut values) => {
                for entry in entries.into_iter().rev() {
                    let value = values.pop().unwrap_or(RedisValue::Nil);
                    let _ = entry.tx.send(Ok(value));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache-server pipeline failed; all waiters notified");
                for entry in entries {
                    let _ = entry.tx.send(Err(clone_error(&e)));
                }
            }
        }

        let again = {
            let mut st = self.shared.state.borrow_mut();
            if st.redis.batch.is_empty() {
                st.redis.inflight = false;
                false
            } else {
                true
            }
        };
        if again {
            self.fire_redis_batch();
        }
    }

    // =========================================================================
    // Direct path
    // =========================================================================

    /// Unbatched query for operations that must not pipeline with other
    /// work: transaction control, session settings. Callers must not
    /// interleave direct and batched writes on the same logical
    /// connection inside a transaction.
    pub async fn direct_query(&self, sql: &str) -> Result<Vec<DbRow>> {
        self.shared.db.query(sql).await
    }

    /// Unbatched parameterized execute.
    pub async fn direct_execute(&self, sql: &'static str, params: &[SqlParam]) -> Result<u64> {
        self.shared.db.execute(sql, params).await
    }
}
