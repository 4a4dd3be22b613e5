// owm_exporter - Prometheus metrics exporter for OpenWeatherMap
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use owm_exporter::client::{OpenWeatherClient, Units};
use owm_exporter::collector::{Collector, ForecastMode, DEFAULT_CONCURRENCY};
use owm_exporter::config::{Config, ConfigError, Locations};
use owm_exporter::http::RequestContext;
use owm_exporter::metrics::MetricsRegistry;
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9101);
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_API_URL: &str = "https://api.openweathermap.org/";
const DEFAULT_LANG: &str = "en";

#[derive(Debug, Parser)]
#[clap(name = "owm_exporter", version = clap::crate_version!())]
struct OwmExporterApplication {
    /// Path to a YAML file with locations to fetch weather for and, optionally, the API key
    /// and address to listen on
    #[clap(long)]
    config: PathBuf,

    /// OpenWeatherMap API key. Takes precedence over the key in the configuration file
    #[clap(long)]
    api_key: Option<String>,

    /// Base URL for the OpenWeatherMap API
    #[clap(long, default_value_t = DEFAULT_API_URL.into())]
    api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Timeout for each request to the OpenWeatherMap API, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Maximum time to spend fetching weather for all locations during a scrape, in seconds.
    /// Whatever was fetched before the timeout is still exported.
    #[clap(long, default_value_t = DEFAULT_SCRAPE_TIMEOUT_SECS)]
    scrape_timeout_secs: u64,

    /// Maximum number of concurrent requests to the OpenWeatherMap API during a scrape.
    #[clap(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Forecast to export. 'step' uses the 5 day / 3 hour forecast, 'one-call' uses minutely,
    /// hourly, and daily forecasts from the One Call API (requires a One Call subscription)
    #[clap(long, default_value_t = ForecastMode::Step)]
    forecast_mode: ForecastMode,

    /// Units for exported values. Allowed values are 'metric', 'imperial', and 'standard'
    #[clap(long, default_value_t = Units::Metric)]
    units: Units,

    /// Language for weather descriptions
    #[clap(long, default_value_t = DEFAULT_LANG.into())]
    lang: String,

    /// Address to bind to. Takes precedence over the address in the configuration file. By
    /// default, owm_exporter will bind to public address since the purpose is to expose metrics
    /// to an external system (Prometheus or another agent for ingestion)
    #[clap(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = OwmExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let config = Config::load(&opts.config).unwrap_or_else(|e| {
        tracing::error!(message = "unable to load configuration", path = %opts.config.display(), error = %e);
        process::exit(1)
    });

    let api_key = opts
        .api_key
        .clone()
        .or_else(|| config.api_key.clone())
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| {
            tracing::error!(message = "invalid configuration", error = %ConfigError::MissingApiKey);
            process::exit(1)
        });

    let bind = match opts.bind {
        Some(addr) => addr,
        None => config
            .listen_addr()
            .unwrap_or_else(|e| {
                tracing::error!(message = "invalid configuration", error = %e);
                process::exit(1)
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
    };

    let locations = Locations::new(config.locations).unwrap_or_else(|e| {
        tracing::error!(message = "invalid configuration", error = %e);
        process::exit(1)
    });

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = OpenWeatherClient::new(http_client, &opts.api_url, &api_key)
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to initialize API client", error = %e);
            process::exit(1)
        })
        .with_units(opts.units)
        .with_lang(opts.lang.clone());

    let num_locations = locations.len();
    let collector = Collector::new(client, locations)
        .with_forecast_mode(opts.forecast_mode)
        .with_timeout(Duration::from_secs(opts.scrape_timeout_secs))
        .with_concurrency(opts.concurrency);

    let registry = MetricsRegistry::new(&collector.describe()).unwrap_or_else(|e| {
        tracing::error!(message = "unable to register metrics", error = %e);
        process::exit(1)
    });

    let context = Arc::new(RequestContext::new(collector, registry));
    let app = owm_exporter::http::app(context);
    let server = axum::Server::try_bind(&bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %bind, error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "server started",
        address = %bind,
        api_url = %opts.api_url,
        locations = num_locations,
        forecast_mode = %opts.forecast_mode,
    );

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
