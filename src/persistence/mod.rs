//! Durability: the append-only command log and periodic binary snapshots.
//!
//! [`aof`] logs every mutating command as it lands, so the keyspace can be
//! rebuilt by replaying the log from empty. [`rdb`] takes a full point-in-
//! time snapshot on a schedule (or on demand via SAVE/BGSAVE), which is
//! cheaper to load on startup than replaying a long log. [`tracker`] decides
//! when that schedule is due.

pub mod aof;
pub mod rdb;
pub mod tracker;

pub use aof::{AofHandle, FsyncMode};
pub use rdb::BgsaveState;
pub use tracker::{ChangeTracker, SaveRule};
