//! meshcache - run a cache node and drive it from stdin
//!
//! Commands, one per line:
//!   put <key> <value> [ttl_ms]
//!   get <key>
//!   stats
//!   quit

use clap::Parser;
use meshcache::{CacheConfig, MeshCache};
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// meshcache - gossip-replicated key/value cache node
#[derive(Parser, Debug, Clone)]
#[command(name = "meshcache")]
#[command(about = "Gossip-replicated, eventually consistent key/value cache node")]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", env = "MESHCACHE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "6783", env = "MESHCACHE_PORT")]
    port: u16,

    /// Shared mesh password
    #[arg(long, default_value = "", env = "MESHCACHE_PASSWORD")]
    password: String,

    /// Peer name in MAC form (random if omitted)
    #[arg(long, env = "MESHCACHE_PEER_NAME")]
    peer_name: Option<String>,

    /// Nickname shown to peers
    #[arg(long, env = "MESHCACHE_NICKNAME")]
    nickname: Option<String>,

    /// Gossip channel
    #[arg(long, default_value = "meshcache")]
    channel: String,

    /// Seed peers (comma-separated host:port)
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Log filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_filter: String,
}

impl From<Cli> for CacheConfig {
    fn from(cli: Cli) -> Self {
        let mut config = CacheConfig::new()
            .with_host(&cli.host)
            .with_port(cli.port)
            .with_password(&cli.password)
            .with_channel(&cli.channel)
            .with_peers(cli.peers)
            .with_log_filter(&cli.log_filter);
        config.peer_name = cli.peer_name;
        config.nickname = cli.nickname;
        config
    }
}

fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Run one REPL command. Returns false on quit.
fn handle_line(cache: &MeshCache<String>, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["put", key, value] => {
            cache.put(*key, value.to_string(), Duration::ZERO);
            println!("ok");
        }
        ["put", key, value, ttl_ms] => match ttl_ms.parse::<u64>() {
            Ok(ms) => {
                cache.put(*key, value.to_string(), Duration::from_millis(ms));
                println!("ok");
            }
            Err(_) => println!("error: ttl must be milliseconds"),
        },
        ["get", key] => match cache.get(key) {
            Some(value) => println!("{}", value),
            None => println!("(not found)"),
        },
        ["stats"] => {
            println!("entries: {}", cache.len());
            println!("agent: {:?}", cache.agent_stats());
            println!("actor: {:?}", cache.actor_stats());
        }
        ["quit"] | ["exit"] => return false,
        [] => {}
        _ => println!("usage: put <key> <value> [ttl_ms] | get <key> | stats | quit"),
    }
    true
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_filter);

    let config = CacheConfig::from(cli);
    info!(
        "meshcache v{} - gossip-replicated cache node",
        env!("CARGO_PKG_VERSION")
    );

    let mut cache: MeshCache<String> = match MeshCache::new(config) {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to create node: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = cache.start().await {
        error!("Failed to start node: {}", e);
        return ExitCode::FAILURE;
    }
    info!(peer = %cache.peer_name(), "ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&cache, line.trim()) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("stdin error: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    if let Err(e) = cache.stop().await {
        error!("Shutdown error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
