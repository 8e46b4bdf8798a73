//! Command dispatch: resolves a decoded request to one of the nineteen
//! supported commands, gates it through authentication and any open
//! transaction, runs it, and fans the accepted command out to MONITOR
//! subscribers.

use bytes::Bytes;
use std::sync::Arc;

use crate::commands::monitor::MonitorList;
use crate::commands::transaction::{ClientSession, Transaction};
use crate::persistence::aof;
use crate::protocol::RespValue;
use crate::server::{info, ServerState};

/// The closed set of command names this server answers to. Anything else
/// is rejected before authentication or transaction state is even consulted.
const COMMAND_NAMES: &[&str] = &[
    "COMMAND",
    "GET",
    "SET",
    "DEL",
    "EXISTS",
    "KEYS",
    "SAVE",
    "BGSAVE",
    "DBSIZE",
    "FLUSHDB",
    "AUTH",
    "EXPIRE",
    "TTL",
    "BGREWRITEAOF",
    "MULTI",
    "EXEC",
    "DISCARD",
    "INFO",
    "MONITOR",
];

/// Commands usable before AUTH succeeds when a password is configured.
const AUTH_SAFELIST: &[&str] = &["COMMAND", "AUTH"];

#[derive(Clone)]
pub struct CommandHandler {
    state: Arc<ServerState>,
}

impl CommandHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn monitors(&self) -> Arc<MonitorList> {
        Arc::clone(&self.state.monitors)
    }

    /// Resolves, gates, and runs one decoded request. `request` must be a
    /// non-empty RESP array whose first element is the command name.
    pub fn execute(&self, session: &mut ClientSession, request: RespValue) -> RespValue {
        let parts = match request.into_array() {
            Some(p) if !p.is_empty() => p,
            _ => return RespValue::error("ERR invalid command"),
        };

        let cmd_name = match self.get_string(&parts[0]) {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR invalid command"),
        };

        if !COMMAND_NAMES.contains(&cmd_name.as_str()) {
            return RespValue::error("ERR invalid command");
        }

        if self.state.config.requirepass.is_some()
            && !session.authenticated
            && !AUTH_SAFELIST.contains(&cmd_name.as_str())
        {
            return RespValue::error("NOAUTH authentication required");
        }

        if session.transaction.is_some() {
            if cmd_name == "MULTI" {
                return RespValue::error("ERR nested multi");
            }
            if cmd_name != "EXEC" && cmd_name != "DISCARD" {
                session
                    .transaction
                    .as_mut()
                    .unwrap()
                    .push(RespValue::array(parts.clone()));
                return RespValue::simple_string("QUEUED");
            }
        }

        let args = &parts[1..];
        let reply = self.dispatch(session, &cmd_name, args);

        self.state.monitors.broadcast(&session.peer, &parts);
        self.state.connection_stats.command_processed();

        reply
    }

    fn dispatch(&self, session: &mut ClientSession, cmd: &str, args: &[RespValue]) -> RespValue {
        match cmd {
            "COMMAND" => self.cmd_command(),
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "KEYS" => self.cmd_keys(args),
            "SAVE" => self.cmd_save(args),
            "BGSAVE" => self.cmd_bgsave(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHDB" => self.cmd_flushdb(args),
            "AUTH" => self.cmd_auth(session, args),
            "EXPIRE" => self.cmd_expire(args),
            "TTL" => self.cmd_ttl(args),
            "BGREWRITEAOF" => self.cmd_bgrewriteaof(args),
            "MULTI" => self.cmd_multi(session, args),
            "EXEC" => self.cmd_exec(session, args),
            "DISCARD" => self.cmd_discard(session, args),
            "INFO" => self.cmd_info(args),
            "MONITOR" => self.cmd_monitor(session, args),
            _ => unreachable!("dispatch only reached for names in COMMAND_NAMES"),
        }
    }

    // --- argument extraction helpers, in the idiom already used throughout
    // this dispatcher: each returns `None` on a type mismatch so callers
    // can fold that into the same arity-error path. ---

    fn get_bytes(&self, value: &RespValue) -> Option<Bytes> {
        match value {
            RespValue::BulkString(b) => Some(b.clone()),
            RespValue::SimpleString(s) => Some(Bytes::from(s.clone().into_bytes())),
            _ => None,
        }
    }

    fn get_string(&self, value: &RespValue) -> Option<String> {
        match value {
            RespValue::BulkString(b) => std::str::from_utf8(b).ok().map(String::from),
            RespValue::SimpleString(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn get_integer(&self, value: &RespValue) -> Option<i64> {
        match value {
            RespValue::Integer(n) => Some(*n),
            RespValue::BulkString(_) | RespValue::SimpleString(_) => {
                self.get_string(value)?.parse().ok()
            }
            _ => None,
        }
    }

    fn arity_error(cmd: &str) -> RespValue {
        RespValue::error(format!(
            "ERR invalid number of arguments for '{}'",
            cmd.to_lowercase()
        ))
    }

    fn cmd_command(&self) -> RespValue {
        RespValue::array(
            COMMAND_NAMES
                .iter()
                .map(|name| RespValue::bulk_string(Bytes::from(name.to_lowercase())))
                .collect(),
        )
    }

    fn cmd_get(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::arity_error("get");
        }
        let Some(key) = self.get_bytes(&args[0]) else {
            return Self::arity_error("get");
        };

        match self.state.storage.get(&key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        }
    }

    fn cmd_set(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return Self::arity_error("set");
        }
        let (Some(key), Some(value)) = (self.get_bytes(&args[0]), self.get_bytes(&args[1])) else {
            return Self::arity_error("set");
        };

        let state = &self.state;
        match state
            .storage
            .set_with_expiry_logged(key.clone(), value.clone(), None, || {
                state.note_mutation(aof::encode_set(&key, &value));
            }) {
            Ok(()) => RespValue::ok(),
            Err(_) => RespValue::error("ERR memory limit reached"),
        }
    }

    fn cmd_del(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return Self::arity_error("del");
        }

        let state = &self.state;
        let mut deleted = 0i64;
        for arg in args {
            let Some(key) = self.get_bytes(arg) else {
                continue;
            };
            if state
                .storage
                .delete_logged(&key, || state.note_mutation(aof::encode_del(&key)))
            {
                deleted += 1;
            }
        }
        RespValue::integer(deleted)
    }

    fn cmd_exists(&self, args: &[RespValue]) -> RespValue {
        if args.is_empty() {
            return Self::arity_error("exists");
        }

        let mut count = 0i64;
        for arg in args {
            if let Some(key) = self.get_bytes(arg) {
                if self.state.storage.exists(&key) {
                    count += 1;
                }
            }
        }
        RespValue::integer(count)
    }

    fn cmd_keys(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::arity_error("keys");
        }
        let Some(pattern) = self.get_string(&args[0]) else {
            return Self::arity_error("keys");
        };

        RespValue::array(
            self.state
                .storage
                .keys(&pattern)
                .into_iter()
                .map(RespValue::bulk_string)
                .collect(),
        )
    }

    fn cmd_save(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("save");
        }

        match crate::persistence::rdb::save(&self.state.storage, &self.state.config.rdb_path()) {
            Ok(_) => {
                self.state.record_save();
                RespValue::ok()
            }
            Err(e) => RespValue::error(format!("ERR {e}")),
        }
    }

    fn cmd_bgsave(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("bgsave");
        }

        if !self.state.bgsave_state.begin() {
            return RespValue::error("ERR background save already in progress");
        }

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let path = state.config.rdb_path();
            let storage = Arc::clone(&state.storage);
            let result = tokio::task::spawn_blocking(move || crate::persistence::rdb::save(&storage, &path)).await;

            match result {
                Ok(Ok(_)) => state.record_save(),
                Ok(Err(e)) => tracing::warn!(error = %e, "background save failed"),
                Err(e) => tracing::warn!(error = %e, "background save task panicked"),
            }
            state.bgsave_state.finish();
        });

        RespValue::simple_string("Background saving started")
    }

    fn cmd_dbsize(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("dbsize");
        }
        RespValue::integer(self.state.storage.len() as i64)
    }

    fn cmd_flushdb(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("flushdb");
        }
        let state = &self.state;
        state
            .storage
            .flushdb_logged(|| state.note_mutation(aof::encode_flushdb()));
        RespValue::ok()
    }

    fn cmd_auth(&self, session: &mut ClientSession, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::arity_error("auth");
        }
        let Some(password) = self.get_string(&args[0]) else {
            return Self::arity_error("auth");
        };

        match &self.state.config.requirepass {
            None => RespValue::error("ERR Client sent AUTH, but no password is set"),
            Some(expected) if expected == &password => {
                session.authenticated = true;
                RespValue::ok()
            }
            Some(_) => RespValue::error("WRONGPASS invalid password"),
        }
    }

    fn cmd_expire(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 2 {
            return Self::arity_error("expire");
        }
        let (Some(key), Some(seconds)) = (self.get_bytes(&args[0]), self.get_integer(&args[1])) else {
            return Self::arity_error("expire");
        };

        let state = &self.state;
        let applied = state
            .storage
            .expire_logged(&key, seconds, || state.note_mutation(aof::encode_expire(&key, seconds)));
        RespValue::integer(applied as i64)
    }

    fn cmd_ttl(&self, args: &[RespValue]) -> RespValue {
        if args.len() != 1 {
            return Self::arity_error("ttl");
        }
        let Some(key) = self.get_bytes(&args[0]) else {
            return Self::arity_error("ttl");
        };
        RespValue::integer(self.state.storage.ttl(&key))
    }

    fn cmd_bgrewriteaof(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("bgrewriteaof");
        }

        let Some(aof_handle) = &self.state.aof else {
            return RespValue::error("ERR AOF is not enabled");
        };

        if self
            .state
            .aof_rewrite_in_progress
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return RespValue::error("ERR AOF rewrite already in progress");
        }

        let snapshot: Vec<(Bytes, Bytes)> = self
            .state
            .storage
            .snapshot()
            .into_iter()
            .map(|(key, value, _expires_at)| (key, value))
            .collect();

        let result = aof_handle.rewrite(snapshot);
        self.state
            .aof_rewrite_in_progress
            .store(false, std::sync::atomic::Ordering::Release);

        match result {
            Ok(()) => {
                self.state.record_aof_rewrite();
                RespValue::ok()
            }
            Err(e) => RespValue::error(format!("ERR {e}")),
        }
    }

    fn cmd_multi(&self, session: &mut ClientSession, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("multi");
        }
        session.transaction = Some(Transaction::new());
        RespValue::ok()
    }

    fn cmd_exec(&self, session: &mut ClientSession, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("exec");
        }
        let Some(transaction) = session.transaction.take() else {
            return RespValue::error("ERR EXEC without MULTI");
        };

        let replies = transaction
            .into_inner()
            .into_iter()
            .map(|queued| self.execute(session, queued))
            .collect();
        RespValue::array(replies)
    }

    fn cmd_discard(&self, session: &mut ClientSession, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("discard");
        }
        if session.transaction.take().is_none() {
            return RespValue::error("ERR DISCARD without MULTI");
        }
        RespValue::ok()
    }

    fn cmd_info(&self, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("info");
        }
        RespValue::bulk_string(Bytes::from(info::render(&self.state)))
    }

    fn cmd_monitor(&self, session: &mut ClientSession, args: &[RespValue]) -> RespValue {
        if !args.is_empty() {
            return Self::arity_error("monitor");
        }
        let (id, rx) = self.state.monitors.register();
        session.monitor_id = Some(id);
        session.monitor_rx = Some(rx);
        RespValue::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::StorageEngine;

    fn handler() -> (CommandHandler, ClientSession) {
        let state = Arc::new(ServerState::new(
            Config::default(),
            Arc::new(StorageEngine::new()),
            None,
            Arc::new(crate::connection::ConnectionStats::default()),
        ));
        (CommandHandler::new(state), ClientSession::new("test".to_string()))
    }

    fn req(parts: &[&str]) -> RespValue {
        RespValue::array(
            parts
                .iter()
                .map(|p| RespValue::bulk_string(Bytes::from(p.to_string())))
                .collect(),
        )
    }

    #[test]
    fn set_get_del_get_round_trip() {
        let (handler, mut session) = handler();
        assert_eq!(handler.execute(&mut session, req(&["SET", "foo", "bar"])), RespValue::ok());
        assert_eq!(
            handler.execute(&mut session, req(&["GET", "foo"])),
            RespValue::bulk_string(Bytes::from("bar"))
        );
        assert_eq!(handler.execute(&mut session, req(&["DEL", "foo"])), RespValue::integer(1));
        assert_eq!(handler.execute(&mut session, req(&["GET", "foo"])), RespValue::null());
    }

    #[test]
    fn unknown_command_is_rejected_before_anything_else() {
        let (handler, mut session) = handler();
        assert_eq!(
            handler.execute(&mut session, req(&["NOTACOMMAND"])),
            RespValue::error("ERR invalid command")
        );
    }

    #[test]
    fn multi_exec_runs_queued_commands_in_order() {
        let (handler, mut session) = handler();
        assert_eq!(handler.execute(&mut session, req(&["MULTI"])), RespValue::ok());
        assert_eq!(
            handler.execute(&mut session, req(&["SET", "a", "1"])),
            RespValue::simple_string("QUEUED")
        );
        assert_eq!(
            handler.execute(&mut session, req(&["SET", "b", "2"])),
            RespValue::simple_string("QUEUED")
        );
        assert_eq!(
            handler.execute(&mut session, req(&["EXEC"])),
            RespValue::array(vec![RespValue::ok(), RespValue::ok()])
        );
        assert_eq!(
            handler.execute(&mut session, req(&["GET", "a"])),
            RespValue::bulk_string(Bytes::from("1"))
        );
    }

    #[test]
    fn nested_multi_is_rejected() {
        let (handler, mut session) = handler();
        handler.execute(&mut session, req(&["MULTI"]));
        assert_eq!(
            handler.execute(&mut session, req(&["MULTI"])),
            RespValue::error("ERR nested multi")
        );
    }

    #[test]
    fn exec_without_multi_errors() {
        let (handler, mut session) = handler();
        assert_eq!(
            handler.execute(&mut session, req(&["EXEC"])),
            RespValue::error("ERR EXEC without MULTI")
        );
    }

    #[test]
    fn discard_clears_the_queue() {
        let (handler, mut session) = handler();
        handler.execute(&mut session, req(&["MULTI"]));
        handler.execute(&mut session, req(&["SET", "a", "1"]));
        assert_eq!(handler.execute(&mut session, req(&["DISCARD"])), RespValue::ok());
        assert_eq!(
            handler.execute(&mut session, req(&["EXEC"])),
            RespValue::error("ERR EXEC without MULTI")
        );
    }

    #[test]
    fn auth_gate_blocks_until_authenticated() {
        let state = Arc::new(ServerState::new(
            Config {
                requirepass: Some("s3cret".to_string()),
                ..Config::default()
            },
            Arc::new(StorageEngine::new()),
            None,
            Arc::new(crate::connection::ConnectionStats::default()),
        ));
        let handler = CommandHandler::new(state);
        let mut session = ClientSession::new("test".to_string());

        assert_eq!(
            handler.execute(&mut session, req(&["GET", "x"])),
            RespValue::error("NOAUTH authentication required")
        );
        assert_eq!(handler.execute(&mut session, req(&["AUTH", "s3cret"])), RespValue::ok());
        assert_eq!(handler.execute(&mut session, req(&["GET", "x"])), RespValue::null());
    }

    #[test]
    fn expire_then_ttl_reports_remaining_seconds() {
        let (handler, mut session) = handler();
        handler.execute(&mut session, req(&["SET", "k", "v"]));
        assert_eq!(handler.execute(&mut session, req(&["EXPIRE", "k", "100"])), RespValue::integer(1));
        let ttl = handler.execute(&mut session, req(&["TTL", "k"]));
        assert!(matches!(ttl, RespValue::Integer(n) if n > 0 && n <= 100));
    }
}
