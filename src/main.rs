//! Rota Dispatch - Entry Point
//!
//! Issues a request through the rotating proxy pool and reports pool statistics.

use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use http::Method;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rota_dispatch::config::{Config, LogConfig};
use rota_dispatch::models::RequestOptions;
use rota_dispatch::proxy::{HealthCheckSummary, HealthProbe, ReqwestTransport, RequestDispatcher};

/// Send HTTP requests through a rotating pool of local proxy endpoints.
///
/// Configuration is read from ROTA_* environment variables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Target URL
    url: Option<String>,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,

    /// Request header as "Name: value", repeatable
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Request body
    #[arg(short = 'd', long = "data")]
    body: Option<String>,

    /// Reset usage and health state of every endpoint first
    #[arg(long)]
    reset: bool,

    /// Probe every endpoint before the request
    #[arg(long)]
    health_check: bool,

    /// Print per-endpoint statistics as JSON
    #[arg(long)]
    stats: bool,
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method: {}", raw))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header must look like 'Name: value': {}", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    if args.url.is_none() && !args.health_check && !args.stats && !args.reset {
        CliArgs::command().print_help()?;
        return Ok(());
    }

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);
    info!("Configuration loaded");

    let transport = Arc::new(ReqwestTransport::new(&config.client));
    let dispatcher = Arc::new(RequestDispatcher::new(
        config.rotation.clone(),
        transport.clone(),
    )?);

    let probe = args.health_check.then(|| {
        HealthProbe::from_config(
            dispatcher.tracker().clone(),
            transport,
            config.rotation.clone(),
            &config.client,
        )
    });

    if let Some(summary) = prepare_pool(&dispatcher, args.reset, probe).await? {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    let mut outcome = Ok(());
    if let Some(url) = &args.url {
        outcome = run_request(&dispatcher, url, &args).await;
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&dispatcher.stats())?);
    }

    outcome
}

/// Apply `--reset` and `--health-check` before any request goes out
///
/// The reset runs first so it never erases the probe results.
async fn prepare_pool(
    dispatcher: &RequestDispatcher,
    reset: bool,
    probe: Option<HealthProbe>,
) -> anyhow::Result<Option<HealthCheckSummary>> {
    if reset {
        dispatcher.reset_stats();
    }

    match probe {
        Some(probe) => {
            let summary = probe
                .check_all(dispatcher.pool().all_endpoints())
                .await
                .context("health check failed")?;
            Ok(Some(summary))
        }
        None => Ok(None),
    }
}

/// Dispatch the command-line request and print the response
async fn run_request(
    dispatcher: &RequestDispatcher,
    url: &str,
    args: &CliArgs,
) -> anyhow::Result<()> {
    let mut options = RequestOptions::default().method(args.method.clone());
    for (name, value) in &args.headers {
        options = options.header(name.clone(), value.clone());
    }
    if let Some(body) = &args.body {
        options = options.body(body.clone());
    }

    let request = options.into_request(url)?;

    // Ctrl+C abandons the dispatch, including any pending retry delay
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match dispatcher.dispatch_with_cancel(request, &cancel).await {
        Ok(response) => {
            info!(
                port = response.endpoint.port,
                attempts = response.attempts,
                "Received {}",
                response.status
            );
            eprintln!("{} via {}", response.status, response.endpoint);
            println!("{}", response.text());
            Ok(())
        }
        Err(e) => {
            error!("Request failed: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize tracing; logs go to stderr so stdout carries only command output
fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rota_dispatch={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
