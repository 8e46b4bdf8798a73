//! INFO command output: five sections, each a flat set of `key:value` lines
//! separated by CRLF, matching the shape real clients parse line-by-line.

use std::sync::atomic::Ordering;

use crate::server::ServerState;

/// Host-memory figures isolated behind their own function so the rest of
/// the INFO builder stays unit-testable without touching the OS.
fn process_id() -> u32 {
    std::process::id()
}

pub fn render(state: &ServerState) -> String {
    let memory = state.storage.memory_info();
    let mut out = String::new();

    out.push_str("# Server\r\n");
    out.push_str(&format!("redis_version:{}\r\n", crate::VERSION));
    out.push_str(&format!("process_id:{}\r\n", process_id()));
    out.push_str(&format!("tcp_port:{}\r\n", state.config.port));
    out.push_str(&format!("uptime_in_seconds:{}\r\n", state.uptime_seconds()));
    out.push_str(&format!(
        "config_file:{}\r\n",
        state
            .config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    ));

    out.push_str("\r\n# Client\r\n");
    out.push_str(&format!(
        "connected_clients:{}\r\n",
        state.connection_stats.active_connections.load(Ordering::Relaxed)
    ));

    out.push_str("\r\n# Memory\r\n");
    out.push_str(&format!("used_memory:{}\r\n", memory.used_memory));
    out.push_str(&format!("used_memory_peak:{}\r\n", memory.used_memory_peak));
    out.push_str(&format!("maxmemory:{}\r\n", state.storage.maxmemory()));
    out.push_str(&format!("maxmemory_policy:{}\r\n", state.storage.policy()));

    out.push_str("\r\n# Persistence\r\n");
    out.push_str(&format!(
        "rdb_bgsave_in_progress:{}\r\n",
        state.bgsave_state.in_progress() as u8
    ));
    out.push_str(&format!(
        "rdb_last_save_time:{}\r\n",
        state.rdb_last_save_time.load(Ordering::Relaxed)
    ));
    out.push_str(&format!("rdb_saves:{}\r\n", state.rdb_saves.load(Ordering::Relaxed)));
    out.push_str(&format!("aof_enabled:{}\r\n", state.config.appendonly as u8));
    out.push_str(&format!(
        "aof_rewrite_in_progress:{}\r\n",
        state.aof_rewrite_in_progress.load(Ordering::Relaxed) as u8
    ));
    out.push_str(&format!("aof_rewrites:{}\r\n", state.aof_rewrites.load(Ordering::Relaxed)));

    out.push_str("\r\n# General\r\n");
    out.push_str(&format!(
        "total_connections_received:{}\r\n",
        state.connection_stats.connections_accepted.load(Ordering::Relaxed)
    ));
    out.push_str(&format!(
        "total_commands_processed:{}\r\n",
        state.connection_stats.commands_processed.load(Ordering::Relaxed)
    ));
    out.push_str(&format!("expired_keys:{}\r\n", state.storage.expired_keys()));
    out.push_str(&format!("evicted_keys:{}\r\n", state.storage.evicted_keys()));

    out
}
