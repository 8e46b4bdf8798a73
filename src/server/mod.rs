//! Process-wide server state shared across every connection: the keyspace,
//! durability handles, and the counters INFO reports.

pub mod info;
pub mod state;

pub use state::ServerState;
