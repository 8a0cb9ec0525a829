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

//! Rate limited cache of the most recent record fetched from an upstream source.

use crate::error::{FetchError, QueryError, StartError};
use crate::metrics::FetchMetrics;
use crate::station::HeaderCard;
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{Instrument, Level};

/// A value in the unit the upstream source reports it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Native {
    pub value: f64,
    pub unit: Unit,
}

impl Native {
    pub fn new(value: f64, unit: Unit) -> Self {
        Native { value, unit }
    }
}

/// A complete set of measurements produced by one successful fetch.
pub trait Record: fmt::Debug + Send + Sync + 'static {
    /// UT time the measurements were taken at (or fetched at, for sources that
    /// don't report it).
    fn observed_at(&self) -> DateTime<Utc>;

    /// Value of `quantity` in its native unit, `None` if this record doesn't carry it.
    ///
    /// Derived quantities are computed here on every call.
    fn native(&self, quantity: Quantity) -> Option<Native>;
}

/// Adapter between one upstream data source and a `PolledCache`.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    type Record: Record;

    /// Quantities every record produced by this source carries.
    fn capabilities(&self) -> &'static [Quantity];

    /// Make one attempt at fetching a complete record.
    async fn fetch(&self) -> Result<Self::Record, FetchError>;

    /// Header cards describing `record` for an observation made with an instrument
    /// of the given model.
    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard>;

    /// Whether the site interlock reported in `record` allows opening. `None` for
    /// sources that don't report an interlock.
    fn weather_ok(&self, _record: &Self::Record) -> Option<bool> {
        None
    }

    /// Acquire any resources needed before fetching.
    async fn open(&self) -> Result<(), StartError> {
        Ok(())
    }

    /// Release resources acquired by `open`.
    async fn close(&self) {}
}

/// Whether the most recent fetch attempt succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Current,
    Stale,
}

/// A value converted to the unit a caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: Unit,
    pub quality: Quality,
}

/// Cache of the last record successfully fetched from a source.
///
/// At most one fetch is attempted per `interval` regardless of how often values
/// are requested. Attempts are serialized: callers arriving while a fetch is in
/// flight wait for it and then read whatever is cached. A failed fetch never
/// touches the cached record, it only pushes back the next attempt.
pub struct PolledCache<F: Fetch> {
    name: String,
    fetcher: F,
    interval: Duration,
    last_attempt: Mutex<Option<Instant>>,
    stale: AtomicBool,
    current: RwLock<Option<Arc<F::Record>>>,
    metrics: FetchMetrics,
}

impl<F: Fetch> PolledCache<F> {
    pub fn new<S: Into<String>>(name: S, fetcher: F, interval: Duration) -> Self {
        PolledCache {
            name: name.into(),
            fetcher,
            interval,
            last_attempt: Mutex::new(None),
            stale: AtomicBool::new(false),
            current: RwLock::new(None),
            metrics: FetchMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: FetchMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Fetch a new record if at least `interval` has passed since the last attempt.
    ///
    /// Returns `false` only when a fetch was attempted and failed. The time of the
    /// attempt is recorded either way.
    pub async fn ensure_fresh(&self) -> bool {
        let mut last_attempt = self.last_attempt.lock().await;
        let now = Instant::now();

        if let Some(last) = *last_attempt {
            if now.duration_since(last) < self.interval {
                return true;
            }
        }

        *last_attempt = Some(now);
        self.metrics.attempt(&self.name);

        match self
            .fetcher
            .fetch()
            .instrument(tracing::span!(Level::DEBUG, "ctio_fetch", instrument = %self.name))
            .await
        {
            Ok(record) => {
                tracing::debug!(message = "fetched new record", instrument = %self.name, record = ?record);
                self.store(record);
                true
            }
            Err(e) => {
                tracing::warn!(message = "failed to fetch record", instrument = %self.name, error = %e);
                self.metrics.failure(&self.name, &e);
                self.stale.store(true, Ordering::Release);
                false
            }
        }
    }

    fn store(&self, record: F::Record) {
        for quantity in self.fetcher.capabilities() {
            if let Some(n) = record.native(*quantity) {
                self.metrics.reading(&self.name, *quantity, n.value, n.unit);
            }
        }

        *self.current.write() = Some(Arc::new(record));
        self.stale.store(false, Ordering::Release);
    }

    /// Most recent record successfully fetched, without performing any I/O.
    pub fn peek(&self) -> Option<Arc<F::Record>> {
        self.current.read().clone()
    }

    /// Refresh if due, then read `quantity` converted to `unit`.
    ///
    /// `Ok(None)` means no record has ever been fetched.
    pub async fn get(&self, quantity: Quantity, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.validate(quantity, unit)?;
        self.ensure_fresh().await;
        Ok(self.read(quantity, unit))
    }

    /// Read `quantity` converted to `unit` from whatever is cached, without any I/O.
    pub fn cached(&self, quantity: Quantity, unit: Unit) -> Result<Option<Reading>, QueryError> {
        self.validate(quantity, unit)?;
        Ok(self.read(quantity, unit))
    }

    fn validate(&self, quantity: Quantity, unit: Unit) -> Result<(), QueryError> {
        if !quantity.accepts(unit) {
            return Err(QueryError::InvalidUnit { quantity, unit });
        }

        if !self.fetcher.capabilities().contains(&quantity) {
            return Err(QueryError::Unsupported(quantity));
        }

        Ok(())
    }

    fn read(&self, quantity: Quantity, unit: Unit) -> Option<Reading> {
        let record = self.peek()?;
        let native = record.native(quantity)?;
        let value = native.unit.convert(native.value, unit).or_else(|| {
            tracing::error!(
                message = "source reported a value in an incompatible unit",
                instrument = %self.name,
                quantity = %quantity,
                native = %native.unit,
                requested = %unit,
            );
            None
        })?;

        let quality = if self.stale.load(Ordering::Acquire) {
            Quality::Stale
        } else {
            Quality::Current
        };

        Some(Reading {
            timestamp: record.observed_at(),
            value,
            unit,
            quality,
        })
    }
}
