//! Append-only file (AOF) persistence.
//!
//! Every mutating command is logged as a RESP array, in the same framing
//! used on the wire, so the file can be replayed by feeding it straight
//! through the codec. Appends are serialized through a single dedicated
//! writer thread fed by a channel, the same shape the append-only module
//! this server's persistence layer grew out of already uses for its own
//! unrelated build: the command dispatcher enqueues the encoded bytes while
//! still holding the keyspace write lock (so channel order equals mutation
//! order), and the thread performs the actual disk I/O off that lock.
//!
//! BGREWRITEAOF's "divert new appends to a buffer while rewriting" step
//! falls out of that same channel for free: a rewrite is just another
//! message processed by the single writer thread, in its turn, so any
//! append sent after the rewrite request naturally lands after the rewrite
//! in the file without a separate buffer to manage.

use crate::protocol::RespValue;
use bytes::Bytes;
use crossbeam::channel::{unbounded, Sender};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{error, warn};

use crate::storage::StorageEngine;

/// Durability mode for `appendfsync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncMode {
    Always,
    EverySec,
    No,
}

impl FromStr for FsyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(FsyncMode::Always),
            "everysec" => Ok(FsyncMode::EverySec),
            "no" => Ok(FsyncMode::No),
            other => Err(format!("unknown appendfsync mode: {other}")),
        }
    }
}

impl fmt::Display for FsyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsyncMode::Always => write!(f, "always"),
            FsyncMode::EverySec => write!(f, "everysec"),
            FsyncMode::No => write!(f, "no"),
        }
    }
}

enum AofMessage {
    Append(Vec<u8>),
    FlushTick,
    Rewrite {
        snapshot: Vec<(Bytes, Bytes)>,
        reply: crossbeam::channel::Sender<io::Result<()>>,
    },
}

/// Handle for writing to the AOF. Cheaply cloned; every clone shares the
/// same background writer thread.
#[derive(Clone)]
pub struct AofHandle {
    tx: Sender<AofMessage>,
}

impl AofHandle {
    /// Spawns the dedicated writer thread and returns a handle to it.
    pub fn spawn(path: impl Into<PathBuf>, fsync_mode: FsyncMode) -> io::Result<Self> {
        let path = path.into();
        let (tx, rx) = unbounded::<AofMessage>();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        std::thread::Builder::new()
            .name("aof-writer".into())
            .spawn(move || {
                let mut writer = BufWriter::new(file);
                if let Err(e) = writer.seek(SeekFrom::End(0)) {
                    error!(error = %e, "failed to seek AOF to end on startup");
                    return;
                }

                for msg in rx.iter() {
                    match msg {
                        AofMessage::Append(bytes) => {
                            if let Err(e) = writer.write_all(&bytes) {
                                error!(error = %e, "AOF append failed");
                                continue;
                            }
                            if fsync_mode == FsyncMode::Always {
                                if let Err(e) = flush_and_sync(&mut writer) {
                                    error!(error = %e, "AOF fsync failed");
                                }
                            }
                        }
                        AofMessage::FlushTick => {
                            if fsync_mode == FsyncMode::EverySec {
                                if let Err(e) = flush_and_sync(&mut writer) {
                                    error!(error = %e, "AOF periodic fsync failed");
                                }
                            }
                        }
                        AofMessage::Rewrite { snapshot, reply } => {
                            let result = perform_rewrite(&mut writer, &snapshot);
                            if let Err(e) = &result {
                                error!(error = %e, "AOF rewrite failed");
                            }
                            let _ = reply.send(result);
                        }
                    }
                }
            })?;

        Ok(Self { tx })
    }

    /// Enqueues an already-encoded command for appending. Non-blocking;
    /// errors on the writer side are logged there, never here — per this
    /// design's error-handling rules a write failure does not fail the
    /// command that triggered it.
    pub fn append(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(AofMessage::Append(bytes));
    }

    /// Signals the writer to flush+fsync now, used by the once-a-second
    /// ticker under `appendfsync everysec`.
    pub fn flush_tick(&self) {
        let _ = self.tx.send(AofMessage::FlushTick);
    }

    /// Runs BGREWRITEAOF against `snapshot` (key/value pairs only — current
    /// values, no expiration metadata, matching the minimal-AOF algorithm)
    /// and blocks until the writer thread finishes.
    pub fn rewrite(&self, snapshot: Vec<(Bytes, Bytes)>) -> io::Result<()> {
        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        self.tx
            .send(AofMessage::Rewrite {
                snapshot,
                reply: reply_tx,
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "AOF writer thread gone"))?;
        reply_rx
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "AOF writer thread gone"))?
    }
}

fn flush_and_sync(writer: &mut BufWriter<File>) -> io::Result<()> {
    writer.flush()?;
    writer.get_ref().sync_data()
}

fn perform_rewrite(writer: &mut BufWriter<File>, snapshot: &[(Bytes, Bytes)]) -> io::Result<()> {
    writer.flush()?;
    writer.get_ref().set_len(0)?;
    writer.seek(SeekFrom::Start(0))?;

    for (key, value) in snapshot {
        let bytes = encode_command(&[Bytes::from_static(b"SET"), key.clone(), value.clone()]);
        writer.write_all(&bytes)?;
    }
    flush_and_sync(writer)
}

/// Encodes a command as the RESP array the codec would put on the wire —
/// the AOF uses the same framing as the client protocol.
pub fn encode_command(args: &[Bytes]) -> Vec<u8> {
    let array = RespValue::Array(args.iter().cloned().map(RespValue::bulk_string).collect());
    array.serialize()
}

pub fn encode_set(key: &Bytes, value: &Bytes) -> Vec<u8> {
    encode_command(&[Bytes::from_static(b"SET"), key.clone(), value.clone()])
}

pub fn encode_del(key: &Bytes) -> Vec<u8> {
    encode_command(&[Bytes::from_static(b"DEL"), key.clone()])
}

pub fn encode_expire(key: &Bytes, seconds: i64) -> Vec<u8> {
    encode_command(&[
        Bytes::from_static(b"EXPIRE"),
        key.clone(),
        Bytes::from(seconds.to_string()),
    ])
}

pub fn encode_flushdb() -> Vec<u8> {
    encode_command(&[Bytes::from_static(b"FLUSHDB")])
}

/// Replays an AOF file against a freshly constructed engine. The engine is
/// expected to already carry the target maxmem/eviction configuration, so
/// replay itself respects memory bounds exactly like live traffic would.
///
/// Any decode error aborts replay at that point (partial progress is kept)
/// and is logged; it never propagates as a fatal error, matching "decode
/// error on AOF replay: log, stop replay, continue startup".
pub fn replay(path: &Path, engine: &StorageEngine) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut parser = crate::protocol::RespParser::new();
    let mut offset = 0usize;
    let mut applied = 0usize;

    loop {
        match parser.parse(&buf[offset..]) {
            Ok(Some((value, consumed))) => {
                offset += consumed;
                if let Err(e) = apply_replayed_command(engine, &value) {
                    warn!(error = %e, "AOF replay aborted: malformed logged command");
                    break;
                }
                applied += 1;
            }
            Ok(None) => {
                if offset < buf.len() {
                    warn!("AOF replay aborted: trailing incomplete frame");
                }
                break;
            }
            Err(e) => {
                warn!(error = %e, "AOF replay aborted: decode error");
                break;
            }
        }
    }

    tracing::info!(commands_applied = applied, "AOF replay complete");
    Ok(())
}

fn apply_replayed_command(engine: &StorageEngine, value: &RespValue) -> Result<(), String> {
    let args = match value {
        RespValue::Array(items) => items,
        _ => return Err("top-level AOF frame was not an array".to_string()),
    };

    let name = match args.first().and_then(RespValue::as_str) {
        Some(s) => s.to_uppercase(),
        None => return Err("AOF command array had no command name".to_string()),
    };

    match name.as_str() {
        "SET" => {
            let key = args.get(1).and_then(RespValue::as_bytes).ok_or("SET missing key")?;
            let value = args
                .get(2)
                .and_then(RespValue::as_bytes)
                .ok_or("SET missing value")?;
            engine
                .set(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value))
                .map_err(|e| e.to_string())
        }
        "DEL" => {
            let key = args.get(1).and_then(RespValue::as_bytes).ok_or("DEL missing key")?;
            engine.delete(&Bytes::copy_from_slice(key));
            Ok(())
        }
        "EXPIRE" => {
            let key = args
                .get(1)
                .and_then(RespValue::as_bytes)
                .ok_or("EXPIRE missing key")?;
            let seconds = args
                .get(2)
                .and_then(RespValue::as_integer)
                .ok_or("EXPIRE missing seconds")?;
            engine.expire(&Bytes::copy_from_slice(key), seconds);
            Ok(())
        }
        "FLUSHDB" => {
            engine.flushdb();
            Ok(())
        }
        other => Err(format!("unrecognized logged command: {other}")),
    }
}

/// Unix-seconds helper shared with the tracker/rdb modules so timestamps in
/// logs and INFO agree on the same epoch arithmetic.
pub fn unix_now() -> u64 {
    crate::storage::entry::unix_seconds(SystemTime::now())
}
