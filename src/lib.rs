//! # FlashKV - A High-Performance In-Memory Key-Value Database
//!
//! FlashKV is a Redis-compatible, in-memory key-value database written in Rust.
//! It demonstrates systems programming concepts like concurrent data structures,
//! network programming, and protocol parsing — plus the durability and
//! eviction machinery a single-node store needs to hold real data: an
//! append-only command log, periodic binary snapshots, and sampled
//! memory-budget eviction.
//!
//! ## Features
//!
//! - **Redis-Compatible**: RESP protocol wire format and a focused command set
//! - **Single-lock keyspace**: one `RwLock` over the whole map, so the memory
//!   accounting and eviction invariants hold exactly
//! - **TTL Support**: keys can have expiry times with lazy + active cleanup
//! - **Durability**: an append-only file for crash recovery, periodic binary
//!   snapshots for fast restarts, and BGREWRITEAOF to compact the log
//! - **Async I/O**: built on Tokio for handling many concurrent connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FlashKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Dispatcher │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                    ┌──────────────────────────┼──────────────────────┐  │
//! │                    │                           ▼                      │  │
//! │                    │                  ┌─────────────────┐            │  │
//! │                    │                  │  StorageEngine   │            │  │
//! │                    │                  │  RwLock<HashMap>  │            │  │
//! │                    │                  └────────┬─────────┘            │  │
//! │                    │    ServerState            │                      │  │
//! │                    │                           ▼                      │  │
//! │                    │                  ┌──────────────────┐           │  │
//! │                    │                  │  AOF writer +     │           │  │
//! │                    │                  │  RDB snapshots     │           │  │
//! │                    │                  └──────────────────┘           │  │
//! │                    └──────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use flashkv::config::Config;
//! use flashkv::connection::{handle_connection, ConnectionStats};
//! use flashkv::commands::CommandHandler;
//! use flashkv::server::ServerState;
//! use flashkv::storage::StorageEngine;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let stats = Arc::new(ConnectionStats::new());
//!     let state = Arc::new(ServerState::new(Config::default(), storage, None, Arc::clone(&stats)));
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&state));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! `COMMAND`, `GET`, `SET`, `DEL`, `EXISTS`, `KEYS`, `SAVE`, `BGSAVE`,
//! `DBSIZE`, `FLUSHDB`, `AUTH`, `EXPIRE`, `TTL`, `BGREWRITEAOF`, `MULTI`,
//! `EXEC`, `DISCARD`, `INFO`, `MONITOR`.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP protocol parser and types
//! - [`storage`]: Thread-safe storage engine with TTL support and eviction
//! - [`persistence`]: AOF append-log and RDB snapshot encoding
//! - [`commands`]: Command dispatcher, transactions, and MONITOR fan-out
//! - [`connection`]: Client connection management
//! - [`server`]: Shared server state and the INFO report builder
//! - [`config`]: Configuration file loading
//!
//! ## Design Highlights
//!
//! ### Single-lock keyspace
//!
//! The admission and eviction invariants are defined over the whole
//! keyspace, so one `RwLock<HashMap<Bytes, Entry>>` holds them exactly —
//! no cross-shard coordination needed to keep `tracked == Σ footprint`.
//!
//! ### Zero-Copy Parsing
//!
//! The RESP parser uses `bytes::Bytes` to avoid copying data when possible.
//! This improves performance for large values.
//!
//! ### Lazy + Active Expiry
//!
//! Keys with TTL are expired in two ways:
//! 1. **Lazy**: When a key is accessed, we check if it's expired
//! 2. **Active**: A background task periodically scans for expired keys
//!
//! This ensures memory is reclaimed even for keys that are never accessed again.
//!
//! ### Single-writer AOF
//!
//! Appends are enqueued, in mutation order, while the keyspace write lock
//! is still held; a dedicated writer thread performs the actual disk I/O
//! off that lock, so AOF order always equals keyspace-mutation order
//! without serializing disk I/O behind the keyspace lock itself.

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{AofHandle, BgsaveState, ChangeTracker, FsyncMode, SaveRule};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::ServerState;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port FlashKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host FlashKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of FlashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
