//! Storage Engine Module
//!
//! This module provides the core storage functionality: a thread-safe
//! key-value keyspace with TTL support, memory accounting, sampled
//! eviction, and a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │            RwLock<HashMap<Bytes, Entry>>               │  │
//! │  │     tracked/peak memory · eviction policy · samples    │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Single-lock keyspace**: memory accounting and eviction invariants
//!   are defined over the whole keyspace, so one `RwLock` holds them exactly.
//! - **TTL Support**: keys can have a time-to-live expiry.
//! - **Lazy Expiry**: expired keys are cleaned on access.
//! - **Active Expiry**: a background sweeper cleans orphaned expired keys.
//! - **Sampled eviction**: `noeviction`/`allkeys-*`/`volatile-*` policies
//!   drawing candidates through `rand` rather than map iteration order.
//!
//! ## Example
//!
//! ```
//! use flashkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // Create the storage engine
//! let engine = Arc::new(StorageEngine::new());
//!
//! // Basic operations
//! engine.set(Bytes::from("name"), Bytes::from("Ariz")).ok();
//! let value = engine.get(&Bytes::from("name"));
//! assert_eq!(value, Some(Bytes::from("Ariz")));
//!
//! // Set with TTL
//! engine.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600)
//! ).ok();
//! ```

pub mod engine;
pub mod entry;
pub mod eviction;
pub mod expiry;

// Re-export commonly used types
pub use engine::{EngineConfig, EngineError, EngineResult, MemoryInfo, StorageEngine, StorageStats};
pub use entry::Entry;
pub use eviction::EvictionPolicy;
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
