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

use crate::cache::{Fetch, PolledCache, Reading};
use crate::error::{QueryError, StartError};
use crate::poller::Poller;
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const HEADER_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Value of a single header card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Number(f64),
}

/// One `(key, value, description)` entry of the metadata attached to an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderCard {
    pub key: &'static str,
    pub value: HeaderValue,
    pub description: &'static str,
}

impl HeaderCard {
    pub fn text<S: Into<String>>(key: &'static str, value: S, description: &'static str) -> Self {
        HeaderCard {
            key,
            value: HeaderValue::Text(value.into()),
            description,
        }
    }

    pub fn number(key: &'static str, value: f64, description: &'static str) -> Self {
        HeaderCard {
            key,
            value: HeaderValue::Number(value),
            description,
        }
    }

    pub fn time(key: &'static str, value: DateTime<Utc>, description: &'static str) -> Self {
        Self::text(key, value.format(HEADER_TIME_FORMAT).to_string(), description)
    }
}

/// Environment instrument exposed to the telescope control system.
///
/// Instruments are queried by capability: `capabilities()` lists the quantities an
/// instrument provides and `get()` (or one of the per-quantity helpers) returns a
/// reading in the requested unit. `Ok(None)` means no data has been obtained from
/// the upstream source yet, which is a normal condition rather than an error.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Short name used to address the instrument, e.g. `seeing`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn capabilities(&self) -> &'static [Quantity];

    fn provides(&self, quantity: Quantity) -> bool {
        self.capabilities().contains(&quantity)
    }

    async fn start(&self) -> Result<(), StartError>;

    async fn stop(&self);

    async fn get(&self, quantity: Quantity, unit: Unit) -> Result<Option<Reading>, QueryError>;

    /// Snapshot of all fields for the header of an observation, empty if no data
    /// is available.
    async fn metadata_report(&self) -> Vec<HeaderCard>;

    /// Whether the site interlock allows opening, read from the cached record
    /// without any I/O. `None` before the first successful fetch or when the
    /// instrument doesn't report an interlock.
    fn weather_ok(&self) -> Option<bool>;

    async fn temperature(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Temperature, unit).await
    }

    async fn humidity(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Humidity, unit).await
    }

    async fn wind_speed(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::WindSpeed, unit).await
    }

    async fn wind_direction(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::WindDirection, unit).await
    }

    async fn pressure(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Pressure, unit).await
    }

    async fn dew_point(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::DewPoint, unit).await
    }

    async fn sky_transparency(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::SkyTransparency, unit).await
    }

    async fn seeing(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Seeing, unit).await
    }

    async fn flux(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Flux, unit).await
    }

    async fn airmass(&self, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.get(Quantity::Airmass, unit).await
    }
}

/// How an instrument keeps its cache up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Accessors fetch inline when the cache is due for a refresh.
    OnDemand,
    /// A background task refreshes the cache; accessors never perform I/O.
    Background,
}

/// An `Instrument` backed by a single `PolledCache`.
pub struct Station<F: Fetch> {
    name: String,
    model: String,
    mode: RefreshMode,
    cache: Arc<PolledCache<F>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    poller: Option<Poller>,
}

impl<F: Fetch> Station<F> {
    pub fn new<S: Into<String>>(model: S, mode: RefreshMode, cache: PolledCache<F>) -> Self {
        Station {
            name: cache.name().to_owned(),
            model: model.into(),
            mode,
            cache: Arc::new(cache),
            running: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &PolledCache<F> {
        &self.cache
    }
}

#[async_trait]
impl<F: Fetch> Instrument for Station<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> &'static [Quantity] {
        self.cache.fetcher().capabilities()
    }

    async fn start(&self) -> Result<(), StartError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.cache.fetcher().open().await?;
        let poller = match self.mode {
            RefreshMode::OnDemand => None,
            RefreshMode::Background => Some(Poller::spawn(Arc::clone(&self.cache))),
        };

        *running = Some(Running { poller });
        tracing::info!(message = "instrument started", instrument = %self.name, model = %self.model);
        Ok(())
    }

    async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(r) = running.take() {
            if let Some(p) = r.poller {
                p.stop().await;
            }

            self.cache.fetcher().close().await;
            tracing::info!(message = "instrument stopped", instrument = %self.name);
        }
    }

    async fn get(&self, quantity: Quantity, unit: Unit) -> Result<Option<Reading>, QueryError> {
        match self.mode {
            RefreshMode::OnDemand => self.cache.get(quantity, unit).await,
            RefreshMode::Background => self.cache.cached(quantity, unit),
        }
    }

    async fn metadata_report(&self) -> Vec<HeaderCard> {
        if self.mode == RefreshMode::OnDemand {
            self.cache.ensure_fresh().await;
        }

        match self.cache.peek() {
            Some(record) => self.cache.fetcher().header(&self.model, &record),
            None => Vec::new(),
        }
    }

    fn weather_ok(&self) -> Option<bool> {
        self.cache.peek().and_then(|r| self.cache.fetcher().weather_ok(&r))
    }
}

#[cfg(test)]
mod tests {
    use super::{HeaderCard, HeaderValue, Instrument, RefreshMode, Station};
    use crate::cache::PolledCache;
    use crate::error::QueryError;
    use crate::testing::ScriptedFetch;
    use crate::units::{Quantity, Unit};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    fn station(fetch: ScriptedFetch, mode: RefreshMode) -> Station<ScriptedFetch> {
        Station::new("Test station", mode, PolledCache::new("test", fetch, Duration::from_secs(60)))
    }

    #[test]
    fn test_header_time_format() {
        let t = Utc.with_ymd_and_hms(2016, 5, 3, 4, 30, 15).unwrap();
        let card = HeaderCard::time("ENVDAT", t, "UT time of the meteo observation");
        assert_eq!(HeaderValue::Text("2016-05-03T04:30:15.000000".to_owned()), card.value);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_accessors() {
        let fetch = ScriptedFetch::repeating(20.0);
        let calls = fetch.calls();
        let station = station(fetch, RefreshMode::OnDemand);

        let t = station.temperature(Unit::Kelvin).await.unwrap().unwrap();
        assert!((t.value - 293.15).abs() < 1e-9);

        let dp = station.dew_point(Unit::Celsius).await.unwrap().unwrap();
        assert!((dp.value - 9.3).abs() < 0.1);

        assert_eq!(1, calls.load(Ordering::SeqCst));
        assert_eq!(Err(QueryError::Unsupported(Quantity::Seeing)), station.seeing(Unit::Arcsecond).await);
        assert!(station.provides(Quantity::Humidity));
        assert!(!station.provides(Quantity::Flux));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_accessors_never_fetch() {
        let fetch = ScriptedFetch::repeating(20.0);
        let calls = fetch.calls();
        let station = station(fetch, RefreshMode::Background);

        assert_eq!(None, station.temperature(Unit::Celsius).await.unwrap());
        assert!(station.metadata_report().await.is_empty());
        assert_eq!(0, calls.load(Ordering::SeqCst));

        station.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let t = station.temperature(Unit::Celsius).await.unwrap().unwrap();
        assert_eq!(20.0, t.value);
        assert_eq!(1, calls.load(Ordering::SeqCst));

        station.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_idempotent() {
        let fetch = ScriptedFetch::repeating(20.0);
        let calls = fetch.calls();
        let station = station(fetch, RefreshMode::Background);

        station.start().await.unwrap();
        station.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(1, calls.load(Ordering::SeqCst));

        station.stop().await;
        station.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_weather_ok_through_trait_object() {
        let fetch = ScriptedFetch::new([None, Some(11.0)]);
        let calls = fetch.calls();
        let instrument: Arc<dyn Instrument> = Arc::new(station(fetch, RefreshMode::OnDemand));

        assert_eq!(None, instrument.weather_ok());
        assert_eq!(0, calls.load(Ordering::SeqCst));

        // First fetch fails, second one populates the cache
        assert_eq!(None, instrument.temperature(Unit::Celsius).await.unwrap());
        assert_eq!(None, instrument.weather_ok());
        tokio::time::advance(Duration::from_secs(60)).await;
        instrument.temperature(Unit::Celsius).await.unwrap();

        assert_eq!(Some(true), instrument.weather_ok());
        assert_eq!(2, calls.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_report() {
        let station = station(ScriptedFetch::new([None, Some(11.0)]), RefreshMode::OnDemand);
        assert!(station.metadata_report().await.is_empty());

        tokio::time::advance(Duration::from_secs(60)).await;
        let cards = station.metadata_report().await;
        assert_eq!(
            vec![
                HeaderCard::text("TSTMOD", "Test station", "Test model"),
                HeaderCard::number("TSTTEM", 11.0, "[degC] Test temperature"),
            ],
            cards
        );
    }
}
