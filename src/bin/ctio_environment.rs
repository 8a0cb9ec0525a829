// ctio_environment - Environment instruments for the CTIO observatory
//
// Copyright 2022 Nick Pillitteri
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
use ctio_environment::http::{app, RequestContext};
use ctio_environment::metrics::FetchMetrics;
use ctio_environment::sources::lcogt::{self, LcogtConfig, LcogtSource};
use ctio_environment::sources::rasicam::{self, RasicamConfig};
use ctio_environment::sources::seeing::{self, SeeingConfig};
use ctio_environment::sources::weather::{self, WeatherConfig};
use ctio_environment::station::Instrument;
use prometheus_client::registry::Registry;
use reqwest::Url;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9783);
const DEFAULT_CHECK_SECS: u64 = 180;
const DEFAULT_LCOGT_POLL_SECS: u64 = 120;
const DEFAULT_RASICAM_POLL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;

#[derive(Debug, Parser)]
#[clap(name = "ctio_environment", version = clap::crate_version!())]
struct CtioEnvironmentApplication {
    /// MySQL URI of the DIMM2 seeing monitor database. The seeing instrument is
    /// only enabled when this is given.
    #[clap(long)]
    seeing_uri: Option<String>,

    /// Model of the seeing monitor, reported in FITS headers
    #[clap(long, default_value_t = seeing::DEFAULT_MODEL.into())]
    seeing_model: String,

    /// Type of the seeing monitor, reported in FITS headers
    #[clap(long, default_value_t = seeing::DEFAULT_MONITOR_TYPE.into())]
    seeing_type: String,

    /// MySQL URI of the Blanco weather station database. The weather instrument is
    /// only enabled when this is given.
    #[clap(long)]
    weather_uri: Option<String>,

    /// Model of the weather station, reported in FITS headers
    #[clap(long, default_value_t = weather::DEFAULT_MODEL.into())]
    weather_model: String,

    /// Query the seeing and weather databases at most once per this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_CHECK_SECS)]
    check_secs: u64,

    /// URL of the LCOGT weather API, e.g. https://weather-api.lco.global/query
    #[clap(long)]
    lcogt_api_url: Option<Url>,

    /// URL of the legacy LCOGT telops page, used instead of the weather API
    #[clap(long, conflicts_with = "lcogt_api_url")]
    lcogt_page_url: Option<Url>,

    /// LCOGT site code to request from the weather API
    #[clap(long, default_value_t = lcogt::DEFAULT_SITE.into())]
    lcogt_site: String,

    /// Model of the LCOGT weather station, reported in FITS headers
    #[clap(long, default_value_t = lcogt::DEFAULT_MODEL.into())]
    lcogt_model: String,

    /// Fetch LCOGT weather at this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_LCOGT_POLL_SECS)]
    lcogt_poll_secs: u64,

    /// URL of the RASICAM status service. The RASICAM instrument is only enabled
    /// when this is given.
    #[clap(long)]
    rasicam_url: Option<Url>,

    /// Model of the all sky camera, reported in FITS headers
    #[clap(long, default_value_t = rasicam::DEFAULT_MODEL.into())]
    rasicam_model: String,

    /// Fetch RASICAM status at this interval, in seconds.
    #[clap(long, default_value_t = DEFAULT_RASICAM_POLL_SECS)]
    rasicam_poll_secs: u64,

    /// Timeout for database queries and HTTP requests to data sources, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, ctio_environment will bind to public address since
    /// the purpose is to expose instrument values to other observatory systems.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = CtioEnvironmentApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let timeout = Duration::from_millis(opts.timeout_millis);
    let check_interval = Duration::from_secs(opts.check_secs);
    let http_client = ctio_environment::sources::http_client(timeout).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let mut registry = Registry::with_prefix("ctio");
    let metrics = FetchMetrics::new(&mut registry);
    let mut instruments: Vec<Arc<dyn Instrument>> = Vec::new();

    if let Some(uri) = opts.seeing_uri {
        let mut config = SeeingConfig::new(uri);
        config.model = opts.seeing_model;
        config.monitor_type = opts.seeing_type;
        config.check_interval = check_interval;
        config.timeout = timeout;
        instruments.push(Arc::new(config.build(metrics.clone())));
    }

    if let Some(uri) = opts.weather_uri {
        let mut config = WeatherConfig::new(uri);
        config.model = opts.weather_model;
        config.check_interval = check_interval;
        config.timeout = timeout;
        instruments.push(Arc::new(config.build(metrics.clone())));
    }

    let lcogt_source = match (opts.lcogt_api_url, opts.lcogt_page_url) {
        (Some(url), _) => Some(LcogtSource::Api {
            url,
            site: opts.lcogt_site,
        }),
        (None, Some(url)) => Some(LcogtSource::Page { url }),
        (None, None) => None,
    };

    if let Some(source) = lcogt_source {
        let mut config = LcogtConfig::new(source);
        config.model = opts.lcogt_model;
        config.poll_interval = Duration::from_secs(opts.lcogt_poll_secs);
        instruments.push(Arc::new(config.build(http_client.clone(), metrics.clone())));
    }

    if let Some(url) = opts.rasicam_url {
        let mut config = RasicamConfig::new(url);
        config.model = opts.rasicam_model;
        config.poll_interval = Duration::from_secs(opts.rasicam_poll_secs);
        instruments.push(Arc::new(config.build(http_client.clone(), metrics.clone())));
    }

    if instruments.is_empty() {
        tracing::error!("no instruments configured, at least one data source must be given");
        process::exit(1)
    }

    for instrument in instruments.iter() {
        instrument.start().await.unwrap_or_else(|e| {
            tracing::error!(message = "unable to start instrument", instrument = %instrument.name(), error = %e);
            process::exit(1)
        });
    }

    let context = Arc::new(RequestContext::new(registry, instruments.clone()));
    let server = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "server started", address = %opts.bind);
    server
        .serve(app(context).into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    for instrument in instruments.iter() {
        instrument.stop().await;
    }

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
