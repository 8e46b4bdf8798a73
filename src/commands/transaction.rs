//! MULTI/EXEC/DISCARD queuing and per-connection session state.

use crate::protocol::RespValue;

/// An open MULTI block: commands accumulate here instead of running
/// immediately, and are replayed in order on EXEC.
#[derive(Debug, Default)]
pub struct Transaction {
    queued: Vec<RespValue>,
}

impl Transaction {
    pub fn new() -> Self {
        Self { queued: Vec::new() }
    }

    pub fn push(&mut self, command: RespValue) {
        self.queued.push(command);
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn into_inner(self) -> Vec<RespValue> {
        self.queued
    }
}

/// Per-connection state the dispatcher reads and mutates on every command:
/// whether AUTH has succeeded, an open transaction queue, and a MONITOR
/// subscription. Owned by the connection handler, never shared across
/// connections.
pub struct ClientSession {
    pub authenticated: bool,
    pub transaction: Option<Transaction>,
    pub monitor_id: Option<u64>,
    pub monitor_rx: Option<tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>>,
    pub peer: String,
}

impl ClientSession {
    pub fn new(peer: String) -> Self {
        Self {
            authenticated: false,
            transaction: None,
            monitor_id: None,
            monitor_rx: None,
            peer,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor_rx.is_some()
    }
}
