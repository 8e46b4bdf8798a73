//! MONITOR fan-out: a registry of subscribed connections that every
//! accepted command gets rendered and broadcast to, independent of which
//! keyspace the command touched.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::protocol::RespValue;

#[derive(Default)]
pub struct MonitorList {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, mpsc::UnboundedSender<Bytes>>>,
}

impl MonitorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a new monitor and returns its id plus the receiving end of
    /// its feed. The id is used later to unregister on disconnect.
    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.senders.lock().unwrap().remove(&id);
    }

    pub fn count(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Renders one accepted command as `<unix_ts> [<peer>] "arg0" "arg1" ...`
    /// and fans it out to every subscribed monitor. Delivery is
    /// non-blocking; a monitor whose channel is closed is dropped from the
    /// registry rather than left to accumulate a backlog forever.
    pub fn broadcast(&self, peer: &str, args: &[RespValue]) {
        let mut senders = self.senders.lock().unwrap();
        if senders.is_empty() {
            return;
        }

        let line = render_line(peer, args);
        senders.retain(|_, tx| tx.send(line.clone()).is_ok());
    }
}

/// Renders a RESP simple string: `+<unix_ts> [<peer>] "arg0" "arg1" ...\r\n`.
fn render_line(peer: &str, args: &[RespValue]) -> Bytes {
    let unix_ts = UNIX_EPOCH.elapsed().unwrap_or_default();
    let mut line = format!("+{}.{:06} [{}]", unix_ts.as_secs(), unix_ts.subsec_micros(), peer);

    for arg in args {
        let rendered = arg.as_str().map(|s| s.to_string()).unwrap_or_else(|| {
            arg.as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default()
        });
        line.push_str(&format!(" \"{}\"", rendered.replace('"', "\\\"")));
    }
    line.push_str("\r\n");

    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_broadcast_is_received() {
        let list = MonitorList::new();
        let (id, mut rx) = list.register();
        assert_eq!(list.count(), 1);

        list.broadcast("127.0.0.1:9", &[RespValue::bulk_string(Bytes::from("SET"))]);
        let received = rx.try_recv().unwrap();
        assert!(String::from_utf8_lossy(&received).contains("\"SET\""));

        list.unregister(id);
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn dropped_receiver_is_pruned_on_next_broadcast() {
        let list = MonitorList::new();
        let (_id, rx) = list.register();
        drop(rx);

        list.broadcast("peer", &[RespValue::bulk_string(Bytes::from("PING"))]);
        assert_eq!(list.count(), 0);
    }
}
