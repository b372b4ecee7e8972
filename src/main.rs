use anyhow::{bail, Context};
use cacheproxy::config::{Config, FreshnessKind};
use cacheproxy::{logging, Cache, ProxyServer};
use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[clap(
    version,
    about = "Forward HTTP proxy with an LRU disk cache for a local origin and CONNECT tunnelling"
)]
struct Args {
    #[clap(short = 's', long, value_name = "ENTRIES", help = "Cache capacity in entries (required unless set in the config file)")]
    cache_size: Option<usize>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(short, long, value_name = "ADDR", help = "Listen address (e.g., 127.0.0.1:8888)")]
    listen: Option<SocketAddr>,

    #[clap(long, value_name = "DIR", help = "Cache directory, wiped at startup")]
    cache_dir: Option<String>,

    #[clap(long, value_name = "HOST:PORT", help = "Address of the local origin server")]
    origin: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "Upstream request timeout in seconds")]
    timeout: Option<u64>,

    #[clap(long, value_name = "NUM", help = "Maximum concurrent client connections")]
    max_connections: Option<usize>,

    #[clap(long, value_name = "POLICY", help = "Cache freshness policy: cache_control, always_fresh or parity")]
    freshness: Option<String>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default().to_file(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let config = load_config(&args)?;
    config.validate()?;
    logging::init(&config.logging).context("failed to initialise logging")?;

    info!("Starting proxy server...");
    let cache = Arc::new(
        Cache::open(&config.cache_dir, config.cache_capacity)
            .await
            .with_context(|| format!("failed to open cache at {}", config.cache_dir.display()))?,
    );
    info!(
        "Cache ready at {} (capacity {} entries)",
        cache.cache_dir().display(),
        cache.capacity()
    );

    let server = ProxyServer::bind(&config, cache.clone())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let shutdown = CancellationToken::new();
    let mut server_handle = tokio::spawn(server.run(shutdown.clone()));

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, no longer accepting connections");
            shutdown.cancel();
            match server_handle.await {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    let stats = cache.stats().snapshot();
    info!(
        "Proxy server stopped (cache hits {}, misses {}, evictions {})",
        stats.hits, stats.misses, stats.evictions
    );
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                bail!("Configuration file not found: {}", config_file);
            }
            Config::from_file(config_file)?
        }
        None => {
            let Some(cache_size) = args.cache_size else {
                bail!("A cache size is required: pass --cache-size or a configuration file");
            };
            Config {
                cache_capacity: cache_size,
                ..Config::default()
            }
        }
    };

    if let Some(cache_size) = args.cache_size {
        config.cache_capacity = cache_size;
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = cache_dir.into();
    }
    if let Some(origin) = &args.origin {
        config.local_origin_addr = origin.clone();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }
    if let Some(freshness) = &args.freshness {
        config.freshness = match freshness.as_str() {
            "cache_control" => FreshnessKind::CacheControl,
            "always_fresh" => FreshnessKind::AlwaysFresh,
            "parity" => FreshnessKind::Parity,
            other => bail!("Invalid freshness policy: {}", other),
        };
    }
    if let Some(level) = &args.log_level {
        config.logging.level = logging::parse_log_level(level).map_err(anyhow::Error::msg)?;
    }
    if let Some(format) = &args.log_format {
        config.logging.format = logging::parse_log_format(format).map_err(anyhow::Error::msg)?;
    }

    Ok(config)
}
