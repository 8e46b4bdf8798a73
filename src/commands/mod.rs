//! Command Handler Module
//!
//! Implements the command processing layer: dispatch, authentication
//! gating, transaction queuing, and the MONITOR fan-out.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Auth gate    │
//! │  - Transaction  │
//! │  - Monitor      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ServerState     │  (server module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! `COMMAND`, `GET`, `SET`, `DEL`, `EXISTS`, `KEYS`, `SAVE`, `BGSAVE`,
//! `DBSIZE`, `FLUSHDB`, `AUTH`, `EXPIRE`, `TTL`, `BGREWRITEAOF`, `MULTI`,
//! `EXEC`, `DISCARD`, `INFO`, `MONITOR`.

pub mod handler;
pub mod monitor;
pub mod transaction;

pub use handler::CommandHandler;
pub use monitor::MonitorList;
pub use transaction::{ClientSession, Transaction};
