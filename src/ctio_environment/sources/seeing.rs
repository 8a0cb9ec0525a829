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

//! Seeing monitor (DIMM2) of the Blanco telescope, read from its MySQL table.
//!
//! `DIMM2_SEEING` is expected to store `seeing`, `airmass` and both fluxes as
//! `DOUBLE` columns and `ut` as a `DATETIME`. Rows of any other column type fail
//! to decode and are reported as malformed.

use crate::cache::{Fetch, Native, PolledCache, Record};
use crate::error::{FetchError, StartError};
use crate::metrics::FetchMetrics;
use crate::sources::Database;
use crate::station::{HeaderCard, RefreshMode, Station};
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "CTIO BLANCO seeing monitor - DIMM2";
pub const DEFAULT_MONITOR_TYPE: &str = "DIMM";
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3 * 60);

const LATEST_SEEING: &str = "select ut, seeing, airmass, flux_s1, flux_s2 \
     from DIMM2_SEEING \
     order by ut desc \
     limit 1";

const CAPABILITIES: &[Quantity] = &[Quantity::Seeing, Quantity::Airmass, Quantity::Flux];

#[derive(Debug, Clone)]
pub struct SeeingConfig {
    pub uri: String,
    pub model: String,
    pub monitor_type: String,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl SeeingConfig {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        SeeingConfig {
            uri: uri.into(),
            model: DEFAULT_MODEL.to_owned(),
            monitor_type: DEFAULT_MONITOR_TYPE.to_owned(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            timeout: Duration::from_secs(5),
        }
    }

    /// Build a seeing instrument that queries the database on demand, at most once
    /// per `check_interval`.
    pub fn build(self, metrics: FetchMetrics) -> Station<SeeingFetch> {
        let fetch = SeeingFetch {
            db: Database::new(self.uri, self.timeout),
            monitor_type: self.monitor_type,
        };

        let cache = PolledCache::new("seeing", fetch, self.check_interval).with_metrics(metrics);
        Station::new(self.model, RefreshMode::OnDemand, cache)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SeeingRow {
    ut: NaiveDateTime,
    seeing: f64,
    airmass: f64,
    flux_s1: f64,
    flux_s2: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeeingRecord {
    pub observed_at: DateTime<Utc>,
    /// arcseconds
    pub seeing: f64,
    pub airmass: f64,
    /// Total flux of both sub-apertures, in counts
    pub flux: f64,
}

impl From<SeeingRow> for SeeingRecord {
    fn from(row: SeeingRow) -> Self {
        SeeingRecord {
            observed_at: row.ut.and_utc(),
            seeing: row.seeing,
            airmass: row.airmass,
            flux: row.flux_s1 + row.flux_s2,
        }
    }
}

impl Record for SeeingRecord {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn native(&self, quantity: Quantity) -> Option<Native> {
        match quantity {
            Quantity::Seeing => Some(Native::new(self.seeing, Unit::Arcsecond)),
            Quantity::Airmass => Some(Native::new(self.airmass, Unit::Dimensionless)),
            Quantity::Flux => Some(Native::new(self.flux, Unit::Count)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SeeingFetch {
    db: Database,
    monitor_type: String,
}

#[async_trait]
impl Fetch for SeeingFetch {
    type Record = SeeingRecord;

    fn capabilities(&self) -> &'static [Quantity] {
        CAPABILITIES
    }

    async fn fetch(&self) -> Result<Self::Record, FetchError> {
        tracing::debug!("querying DIMM2 seeing monitor");
        let row: SeeingRow = self.db.latest(LATEST_SEEING).await?;
        Ok(row.into())
    }

    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard> {
        vec![
            HeaderCard::text("SEEMOD", model, "Seeing monitor Model"),
            HeaderCard::text("SEETYP", self.monitor_type.as_str(), "Seeing monitor type"),
            HeaderCard::number("SEEVAL", record.seeing, "[arcsec] Seeing value"),
            HeaderCard::number("SEEAIR", record.airmass, "Airmass of the seeing observation"),
            HeaderCard::number("SEEFLU", record.flux, "[counts] Star flux value"),
            HeaderCard::time("SEEDAT", record.observed_at, "UT time of the seeing observation"),
        ]
    }

    async fn open(&self) -> Result<(), StartError> {
        self.db.open()
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
