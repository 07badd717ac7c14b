//! Command-line companion for the query resilience layer.
//!
//! - `check-config <path>`: load and validate a configuration file
//! - `simulate`: drive a flaky synthetic dependency through a `QueryClient`
//!   and print circuit snapshots as JSON

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use query_resilience::config::watcher::ConfigWatcher;
use query_resilience::config::{load_config, ConfigError, ResilienceConfig};
use query_resilience::observability::{logging, metrics};
use query_resilience::{Fetched, QueryClient, QueryError};

const CIRCUIT: &str = "simulated";

#[derive(Parser)]
#[command(name = "query-resilience")]
#[command(about = "Cache, dedup, retry and circuit breaking for async queries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        path: PathBuf,
    },
    /// Run requests against a synthetic dependency that fails at random
    Simulate {
        /// Configuration file; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Total fetches to issue
        #[arg(short = 'n', long, default_value_t = 100)]
        requests: u32,

        /// Distinct cache keys the fetches are spread over
        #[arg(short, long, default_value_t = 4)]
        keys: u32,

        /// Probability in [0, 1] that one attempt fails
        #[arg(short, long, default_value_t = 0.5)]
        failure_rate: f64,

        /// Simulated latency of one attempt in milliseconds
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,

        /// Age after which cached values are refreshed in the background
        #[arg(long, default_value_t = 100)]
        stale_ms: u64,

        /// Base retry delay in milliseconds
        #[arg(long, default_value_t = 10)]
        base_delay_ms: u64,

        /// Serve Prometheus metrics on this address while running
        #[arg(long)]
        metrics_address: Option<String>,

        /// Reload the configuration file when it changes
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Simulate {
            config,
            requests,
            keys,
            failure_rate,
            latency_ms,
            stale_ms,
            base_delay_ms,
            metrics_address,
            watch,
        } => {
            let settings = Simulation {
                requests,
                keys: keys.max(1),
                failure_rate: failure_rate.clamp(0.0, 1.0),
                latency: Duration::from_millis(latency_ms),
                stale_time: Duration::from_millis(stale_ms),
                base_delay: Duration::from_millis(base_delay_ms),
            };
            match simulate(config, settings, metrics_address, watch).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn check_config(path: &Path) -> ExitCode {
    match load_config(path) {
        Ok(config) => {
            println!("{} is valid", path.display());
            match serde_json::to_string_pretty(&config) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: failed to render configuration: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(ConfigError::Validation(errors)) => {
            eprintln!("{} has {} problem(s):", path.display(), errors.len());
            for error in errors {
                eprintln!("  - {}", error);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

struct Simulation {
    requests: u32,
    keys: u32,
    failure_rate: f64,
    latency: Duration,
    stale_time: Duration,
    base_delay: Duration,
}

async fn simulate(
    config_path: Option<PathBuf>,
    settings: Simulation,
    metrics_address: Option<String>,
    watch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => ResilienceConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Warning: logging not initialized: {}", e);
    }

    let metrics_address = metrics_address.or_else(|| {
        config
            .observability
            .metrics_enabled
            .then(|| config.observability.metrics_address.clone())
    });
    if let Some(address) = metrics_address {
        metrics::init_metrics(address.parse()?);
    }

    tracing::info!(
        requests = settings.requests,
        keys = settings.keys,
        failure_rate = settings.failure_rate,
        "Simulation starting"
    );

    let client: QueryClient<String> = QueryClient::new(config);
    client.set_static_response(CIRCUIT, "placeholder", 100, "placeholder".to_string());
    let monitor = client.spawn_health_monitor();

    // Keep the watcher alive for the whole run.
    let _watcher = match (&config_path, watch) {
        (Some(path), true) => Some(spawn_reloader(client.clone(), path)?),
        _ => None,
    };

    let mut tally = Tally::default();
    let failure_rate = settings.failure_rate;
    let latency = settings.latency;

    for n in 0..settings.requests {
        let key = format!("item:{}", n % settings.keys);
        let operation = move || async move {
            tokio::time::sleep(latency).await;
            if fastrand::f64() < failure_rate {
                Err(QueryError::transport("synthetic failure"))
            } else {
                Ok(format!("value-{}", fastrand::u32(..)))
            }
        };

        let options = client
            .options()
            .circuit(CIRCUIT)
            .stale_time(settings.stale_time)
            .ttl(settings.stale_time * 4)
            .backoff(settings.base_delay, settings.base_delay * 10);
        match client.fetch(&key, operation, options).await {
            Ok(fetched) => tally.record(&fetched),
            Err(e) => {
                tally.errors += 1;
                tracing::warn!(key = %key, error = %e, "Fetch failed");
            }
        }
    }

    monitor.shutdown().await;

    let report = serde_json::json!({
        "fetches": {
            "cached": tally.cached,
            "loaded": tally.loaded,
            "fallback": tally.fallback,
            "unavailable": tally.unavailable,
            "errors": tally.errors,
        },
        "circuits": client.circuit_states(),
        "cache": client.export_snapshot().entries.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn spawn_reloader(
    client: QueryClient<String>,
    path: &Path,
) -> Result<notify::RecommendedWatcher, Box<dyn std::error::Error>> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let handle = watcher.run()?;

    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            if let Err(errors) = client.apply_config(config) {
                tracing::error!(errors = errors.len(), "Reloaded configuration rejected");
            }
        }
    });
    Ok(handle)
}

#[derive(Default)]
struct Tally {
    cached: u32,
    loaded: u32,
    fallback: u32,
    unavailable: u32,
    errors: u32,
}

impl Tally {
    fn record(&mut self, fetched: &Fetched<String>) {
        match fetched {
            Fetched::Cached { .. } => self.cached += 1,
            Fetched::Loaded(_) => self.loaded += 1,
            Fetched::Fallback { .. } => self.fallback += 1,
            Fetched::Unavailable(_) => self.unavailable += 1,
        }
    }
}
