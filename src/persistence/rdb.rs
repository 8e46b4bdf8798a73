//! RDB-style binary snapshots.
//!
//! A snapshot is the whole keyspace serialized with `bincode`, followed by
//! a trailing CRC32 of the encoded payload so a truncated or corrupted file
//! is detected at load time rather than silently producing a partial
//! keyspace. This mirrors the original's roll-your-own binary format (a
//! length-prefixed record stream with a checksum footer) without trying to
//! reproduce its exact byte layout — `serde` + `bincode` is the idiomatic
//! stand-in, the same combination reached for elsewhere in this corpus for
//! the identical "snapshot a keyspace to disk" job.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::storage::StorageEngine;

/// On-disk representation of one key. `expires_at_unix` is `None` for keys
/// with no TTL; encoded as unix seconds rather than `SystemTime` directly so
/// the format doesn't depend on `SystemTime`'s platform-specific internals.
#[derive(Debug, Serialize, Deserialize)]
struct RdbEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    expires_at_unix: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RdbFile {
    entries: Vec<RdbEntry>,
}

/// Tracks whether a BGSAVE is currently in flight, for INFO's
/// `rdb_bgsave_in_progress` field. A single snapshot process at a time is
/// the only mode this server supports — a second BGSAVE request while one
/// is running is rejected by the caller before it reaches here.
#[derive(Debug, Default)]
pub struct BgsaveState {
    in_progress: AtomicBool,
}

impl BgsaveState {
    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

/// Encodes the engine's current keyspace and writes it to `path`, replacing
/// any existing file atomically via a rename from a temporary file in the
/// same directory (so a crash mid-write never leaves a half-written RDB in
/// place of a good one).
pub fn save(engine: &StorageEngine, path: &Path) -> io::Result<usize> {
    let snapshot = engine.snapshot();
    let count = snapshot.len();

    let file = RdbFile {
        entries: snapshot
            .into_iter()
            .map(|(key, value, expires_at)| RdbEntry {
                key: key.to_vec(),
                value: value.to_vec(),
                expires_at_unix: expires_at.map(crate::storage::entry::unix_seconds),
            })
            .collect(),
    };

    let payload = bincode::serialize(&file)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let checksum = crc32fast::hash(&payload);

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&(payload.len() as u64).to_le_bytes())?;
        tmp.write_all(&payload)?;
        tmp.write_all(&checksum.to_le_bytes())?;
        tmp.flush()?;
        tmp.sync_all()?;
    }

    verify_on_disk(&tmp_path, &payload, checksum)?;
    fs::rename(&tmp_path, path)?;

    info!(keys = count, path = %path.display(), "RDB snapshot written");
    Ok(count)
}

/// Re-reads the just-written temp file and checks its payload hashes to the
/// same checksum as the in-memory buffer that produced it, so a write that
/// silently corrupted bytes on the way to disk is caught before it replaces
/// the previous good snapshot. The bad temp file is left behind for
/// inspection rather than cleaned up; `path` itself is never touched here.
fn verify_on_disk(tmp_path: &Path, payload: &[u8], checksum: u32) -> io::Result<()> {
    let mut tmp = File::open(tmp_path)?;
    let mut len_buf = [0u8; 8];
    tmp.read_exact(&mut len_buf)?;
    let on_disk_len = u64::from_le_bytes(len_buf) as usize;

    let mut on_disk_payload = vec![0u8; on_disk_len];
    tmp.read_exact(&mut on_disk_payload)?;

    if on_disk_len != payload.len() || crc32fast::hash(&on_disk_payload) != checksum {
        warn!(
            path = %tmp_path.display(),
            "RDB snapshot corrupted between encode and disk, aborting save"
        );
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "RDB checksum mismatch after write",
        ));
    }

    Ok(())
}

/// Loads a snapshot from `path` and replaces the engine's keyspace with it.
/// A missing file is not an error — a server's first boot simply starts
/// empty. A checksum mismatch or truncated file is reported but does not
/// panic; the caller decides whether to start empty or abort.
pub fn load(engine: &StorageEngine, path: &Path) -> io::Result<usize> {
    if !path.exists() {
        return Ok(0);
    }

    let mut file = File::open(path)?;
    let mut len_buf = [0u8; 8];
    file.read_exact(&mut len_buf)?;
    let payload_len = u64::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; payload_len];
    file.read_exact(&mut payload)?;

    let mut checksum_buf = [0u8; 4];
    file.read_exact(&mut checksum_buf)?;
    let expected_checksum = u32::from_le_bytes(checksum_buf);
    let actual_checksum = crc32fast::hash(&payload);

    if actual_checksum != expected_checksum {
        warn!(
            path = %path.display(),
            "RDB checksum mismatch, refusing to load a possibly corrupt snapshot"
        );
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "RDB checksum mismatch",
        ));
    }

    let decoded: RdbFile = bincode::deserialize(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let count = decoded.entries.len();
    let entries = decoded
        .entries
        .into_iter()
        .map(|e| {
            let expires_at = e.expires_at_unix.map(|secs| {
                SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs)
            });
            (Bytes::from(e.key), Bytes::from(e.value), expires_at)
        })
        .collect();

    engine.restore(entries);
    info!(keys = count, path = %path.display(), "RDB snapshot loaded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips_keys_and_ttls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1")).unwrap();
        engine
            .set_with_ttl(Bytes::from("b"), Bytes::from("2"), std::time::Duration::from_secs(3600))
            .unwrap();

        save(&engine, &path).unwrap();

        let loaded = StorageEngine::new();
        let count = load(&loaded, &path).unwrap();
        assert_eq!(count, 2);
        assert_eq!(loaded.get(&Bytes::from("a")), Some(Bytes::from("1")));
        assert_eq!(loaded.get(&Bytes::from("b")), Some(Bytes::from("2")));
        assert!(loaded.ttl(&Bytes::from("b")) > 0);
    }

    #[test]
    fn load_of_missing_file_returns_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.rdb");
        let engine = StorageEngine::new();
        assert_eq!(load(&engine, &path).unwrap(), 0);
    }

    #[test]
    fn corrupted_payload_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1")).unwrap();
        save(&engine, &path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let loaded = StorageEngine::new();
        assert!(load(&loaded, &path).is_err());
    }

    #[test]
    fn save_aborts_without_clobbering_existing_file_if_disk_write_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.rdb");

        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1")).unwrap();
        save(&engine, &path).unwrap();
        let good_bytes = fs::read(&path).unwrap();

        let payload = b"not a real payload".to_vec();
        let checksum = crc32fast::hash(&payload) ^ 0xFFFF_FFFF;
        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path).unwrap();
            tmp.write_all(&(payload.len() as u64).to_le_bytes()).unwrap();
            tmp.write_all(&payload).unwrap();
            tmp.write_all(&checksum.to_le_bytes()).unwrap();
        }

        assert!(verify_on_disk(&tmp_path, &payload, checksum).is_err());
        assert_eq!(fs::read(&path).unwrap(), good_bytes);
    }

    #[test]
    fn bgsave_state_rejects_concurrent_begin() {
        let state = BgsaveState::default();
        assert!(state.begin());
        assert!(!state.begin());
        state.finish();
        assert!(state.begin());
    }
}
