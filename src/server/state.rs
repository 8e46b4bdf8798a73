use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::commands::monitor::MonitorList;
use crate::config::Config;
use crate::connection::ConnectionStats;
use crate::persistence::{AofHandle, BgsaveState, ChangeTracker};
use crate::storage::StorageEngine;

/// Everything a connection needs beyond its own request/response loop:
/// the keyspace, the durability machinery, and the counters INFO reports.
/// One instance lives for the life of the process and is shared behind an
/// `Arc` by every `ConnectionHandler`.
pub struct ServerState {
    pub config: Config,
    pub storage: Arc<StorageEngine>,
    pub aof: Option<AofHandle>,
    pub bgsave_state: BgsaveState,
    pub aof_rewrite_in_progress: AtomicBool,
    pub monitors: Arc<MonitorList>,
    pub change_tracker: Arc<ChangeTracker>,
    pub connection_stats: Arc<ConnectionStats>,
    pub start_time: Instant,

    pub rdb_saves: AtomicU64,
    pub aof_rewrites: AtomicU64,
    pub rdb_last_save_time: AtomicU64,
}

impl ServerState {
    pub fn new(
        config: Config,
        storage: Arc<StorageEngine>,
        aof: Option<AofHandle>,
        connection_stats: Arc<ConnectionStats>,
    ) -> Self {
        let change_tracker = Arc::new(ChangeTracker::new(config.save_rules.clone()));
        Self {
            config,
            storage,
            aof,
            bgsave_state: BgsaveState::default(),
            aof_rewrite_in_progress: AtomicBool::new(false),
            monitors: Arc::new(MonitorList::new()),
            change_tracker,
            connection_stats,
            start_time: Instant::now(),
            rdb_saves: AtomicU64::new(0),
            aof_rewrites: AtomicU64::new(0),
            rdb_last_save_time: AtomicU64::new(0),
        }
    }

    pub fn record_save(&self) {
        self.rdb_saves.fetch_add(1, Ordering::Relaxed);
        self.rdb_last_save_time.store(
            crate::storage::entry::unix_seconds(SystemTime::now()),
            Ordering::Relaxed,
        );
        self.change_tracker.mark_saved();
    }

    pub fn record_aof_rewrite(&self) {
        self.aof_rewrites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Records a mutation against both the AOF (if enabled) and the change
    /// tracker driving scheduled RDB snapshots. Callers invoke this from
    /// inside the engine's own write-lock-held commit closure, so the
    /// append is non-blocking: it only enqueues onto the writer thread's
    /// channel.
    pub fn note_mutation(&self, encoded: Vec<u8>) {
        if let Some(aof) = &self.aof {
            aof.append(encoded);
        }
        self.change_tracker.record_change();
    }
}
