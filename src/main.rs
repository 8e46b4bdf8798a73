//! FlashKV - A High-Performance In-Memory Key-Value Database
//!
//! This is the main entry point for the FlashKV server.
//! It loads configuration, restores any existing AOF/RDB state, starts
//! the background save/flush tasks, and then accepts client connections.

use flashkv::commands::CommandHandler;
use flashkv::config::Config;
use flashkv::connection::{handle_connection, ConnectionStats};
use flashkv::persistence::{self, AofHandle, FsyncMode};
use flashkv::server::ServerState;
use flashkv::storage::{start_expiry_sweeper, EngineConfig, StorageEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

struct Cli {
    config_path: Option<std::path::PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

impl Cli {
    fn from_args() -> Self {
        let mut cli = Cli {
            config_path: None,
            host: None,
            port: None,
        };
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        cli.host = Some(args[i + 1].clone());
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        cli.port = Some(args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        }));
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("FlashKV version {}", flashkv::VERSION);
                    std::process::exit(0);
                }
                other if !other.starts_with('-') => {
                    cli.config_path = Some(std::path::PathBuf::from(other));
                    i += 1;
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        cli
    }
}

fn print_help() {
    println!(
        r#"
FlashKV - A High-Performance In-Memory Key-Value Database

USAGE:
    flashkv [CONFIG_FILE] [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1, or config file)
    -p, --port <PORT>    Port to listen on (default: 6379, or config file)
    -v, --version        Print version information
        --help           Print this help message

EXAMPLES:
    flashkv                        # Start on 127.0.0.1:6379, zero-config
    flashkv /etc/flashkv.conf       # Start with a config file
    flashkv --port 6380            # Start on port 6380

CONNECTING:
    Use redis-cli or any Redis client to connect:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET name "Ariz"
    OK
    127.0.0.1:6379> GET name
    "Ariz"
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"

        ███████████ ████                    █████      █████   ████ █████   █████
       ░░███░░░░░░█░░███                   ░░███      ░░███   ███░ ░░███   ░░███
        ░███   █ ░  ░███   ██████    █████  ░███████   ░███  ███    ░███    ░███
        ░███████    ░███  ░░░░░███  ███░░   ░███░░███  ░███████     ░███    ░███
        ░███░░░█    ░███   ███████ ░░█████  ░███ ░███  ░███░░███    ░░███   ███
        ░███  ░     ░███  ███░░███  ░░░░███ ░███ ░███  ░███ ░░███    ░░░█████░
        █████       █████░░████████ ██████  ████ █████ █████ ░░████    ░░███
       ░░░░░       ░░░░░  ░░░░░░░░ ░░░░░░  ░░░░ ░░░░░ ░░░░░   ░░░░      ░░░


FlashKV v{} - High-Performance In-Memory Key-Value Database
──────────────────────────────────────────────────────────────
Server started on {}:{}
Persistence: appendonly={} maxmemory={} policy={}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        flashkv::VERSION,
        config.host,
        config.port,
        config.appendonly,
        config.maxmemory,
        config.maxmemory_policy,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::from_args();

    let mut config = match &cli.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    print_banner(&config);

    let storage = Arc::new(StorageEngine::with_config(EngineConfig {
        maxmemory: config.maxmemory,
        policy: config.maxmemory_policy,
        samples: config.maxmemory_samples,
    }));

    let aof_handle = if config.appendonly {
        let aof_path = config.aof_path();
        if aof_path.exists() {
            info!(path = %aof_path.display(), "Replaying append-only file");
            persistence::aof::replay(&aof_path, &storage)?;
        }
        let handle = AofHandle::spawn(aof_path, config.appendfsync)?;
        info!("Append-only file enabled ({})", config.appendfsync);
        Some(handle)
    } else {
        let rdb_path = config.rdb_path();
        if rdb_path.exists() {
            info!(path = %rdb_path.display(), "Loading RDB snapshot");
            let loaded = persistence::rdb::load(&storage, &rdb_path)?;
            info!(keys = loaded, "RDB snapshot loaded");
        }
        None
    };

    let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
    info!("Background expiry sweeper started");

    let stats = Arc::new(ConnectionStats::new());
    let state = Arc::new(ServerState::new(config, Arc::clone(&storage), aof_handle, stats));

    if state.aof.is_some() && state.config.appendfsync == FsyncMode::EverySec {
        let aof = state.aof.clone().unwrap();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                aof.flush_tick();
            }
        });
        info!("AOF fsync ticker started (everysec)");
    }

    // One independent ticker per configured save rule, each on its own
    // interval, each resetting only its own counter on every tick of that
    // interval (see `persistence::tracker`).
    for (index, tracker) in state.change_tracker.rules().iter().enumerate() {
        let rule = tracker.rule;
        let save_state = Arc::clone(&state);
        let period = Duration::from_secs(rule.interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if !save_state.change_tracker.rules()[index].tick() {
                    continue;
                }
                let storage = Arc::clone(&save_state.storage);
                let path = save_state.config.rdb_path();
                match tokio::task::spawn_blocking(move || persistence::rdb::save(&storage, &path)).await {
                    Ok(Ok(count)) => {
                        save_state.record_save();
                        info!(keys = count, interval = rule.interval_seconds, "Scheduled RDB save completed");
                    }
                    Ok(Err(e)) => error!(error = %e, "Scheduled RDB save failed"),
                    Err(e) => error!(error = %e, "Scheduled RDB save task panicked"),
                }
            }
        });
        info!(
            interval = rule.interval_seconds,
            threshold = rule.threshold_keys_changed,
            "Scheduled RDB save ticker started"
        );
    }

    let bind_address = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&state), Arc::clone(&state.connection_stats)) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = CommandHandler::new(Arc::clone(&state));
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
