//! resilient-fetch - Entry Point
//!
//! Fetches one or more URLs through the resilient pipeline and prints one
//! JSON result per URL to stdout. Logs go to stderr.
//!
//! # Architecture Overview
//! ```text
//! CLI args ─→ config (file + FETCH_* env) ─→ Orchestrator
//!                                               │
//!                    deadline → retry/breaker → dedup → pool → HTTP
//!                                               │
//!                                stdout: [{url, data | error}, ...]
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use futures_util::future::join_all;
use serde_json::{json, Value};

use resilient_fetch::config::{self, FetchConfig, Profile};
use resilient_fetch::observability::{logging, metrics};
use resilient_fetch::{BatchRequest, FetchError, FetchOptions, Orchestrator, Priority};

#[derive(Parser)]
#[command(name = "resilient-fetch")]
#[command(about = "Fetch URLs with retries, circuit breaking, coalescing and deadlines", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults plus FETCH_* variables when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment profile (development, production, test).
    #[arg(long)]
    profile: Option<Profile>,

    /// Admission priority for every URL.
    #[arg(short, long, default_value = "medium")]
    priority: Priority,

    /// JSON value substituted for any failed fetch.
    #[arg(long, value_parser = parse_json)]
    fallback: Option<Value>,

    /// Print detailed pipeline metrics to stderr when done.
    #[arg(long)]
    metrics: bool,

    /// URLs to fetch.
    #[arg(required = true)]
    urls: Vec<String>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
}

fn load(cli: &Cli) -> Result<FetchConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::load_from_env()?,
    };
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init_tracing(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        profile = ?config.profile,
        urls = cli.urls.len(),
        max_connections = config.pool.max_connections,
        api_timeout_ms = config.api_timeout().as_millis() as u64,
        "resilient-fetch starting"
    );

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    let (results, failed) = match &cli.fallback {
        Some(fallback) => {
            let values = join_all(cli.urls.iter().map(|url| {
                orchestrator.fetch_with_fallback_at(
                    url,
                    FetchOptions::new(),
                    cli.priority,
                    fallback.clone(),
                )
            }))
            .await;
            let results: Vec<Value> = cli
                .urls
                .iter()
                .zip(values)
                .map(|(url, data)| json!({ "url": url, "data": data }))
                .collect();
            (results, 0)
        }
        None => {
            let requests = cli
                .urls
                .iter()
                .map(|url| BatchRequest::get(url.as_str()).priority(cli.priority))
                .collect();
            let outcomes = orchestrator.fetch_batch::<Value>(requests).await;
            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            let results = cli
                .urls
                .iter()
                .zip(outcomes)
                .map(|(url, outcome)| render(url, outcome))
                .collect();
            (results, failed)
        }
    };

    match serde_json::to_string_pretty(&results) {
        Ok(out) => println!("{}", out),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if cli.metrics {
        match serde_json::to_string_pretty(&orchestrator.detailed_metrics()) {
            Ok(out) => eprintln!("{}", out),
            Err(e) => tracing::warn!(error = %e, "Failed to render metrics"),
        }
    }

    orchestrator.shutdown();
    tracing::info!(failed, "Shutdown complete");

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn render(url: &str, outcome: Result<Value, FetchError>) -> Value {
    match outcome {
        Ok(data) => json!({ "url": url, "data": data }),
        Err(error) => json!({
            "url": url,
            "error": error.to_string(),
            "kind": error.kind(),
            "status": error.status(),
        }),
    }
}
