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

//! Weather station of the Blanco telescope, read from its MySQL table.
//!
//! The `weather` table is expected to store measurements as `DOUBLE` columns and
//! the observation time as text (`2016-05-03UT04:12:30`). Rows of any other
//! column type fail to decode and are reported as malformed.

use crate::cache::{Fetch, Native, PolledCache, Record};
use crate::error::{FetchError, StartError};
use crate::metrics::FetchMetrics;
use crate::sources::Database;
use crate::station::{HeaderCard, RefreshMode, Station};
use crate::units::{self, Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "CTIO BLANCO telescope weather station";
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3 * 60);

const LATEST_WEATHER: &str = "select time, temp, hum, pres, wdir, wspeed \
     from weather \
     order by ID desc \
     limit 1";

const TIME_FORMAT: &str = "%Y-%m-%dUT%H:%M:%S";

const CAPABILITIES: &[Quantity] = &[
    Quantity::Temperature,
    Quantity::Humidity,
    Quantity::WindSpeed,
    Quantity::WindDirection,
    Quantity::Pressure,
    Quantity::DewPoint,
];

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub uri: String,
    pub model: String,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl WeatherConfig {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        WeatherConfig {
            uri: uri.into(),
            model: DEFAULT_MODEL.to_owned(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn build(self, metrics: FetchMetrics) -> Station<WeatherFetch> {
        let fetch = WeatherFetch {
            db: Database::new(self.uri, self.timeout),
        };

        let cache = PolledCache::new("weather", fetch, self.check_interval).with_metrics(metrics);
        Station::new(self.model, RefreshMode::OnDemand, cache)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WeatherRow {
    time: String,
    temp: f64,
    hum: f64,
    pres: f64,
    wdir: f64,
    wspeed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub observed_at: DateTime<Utc>,
    /// celsius
    pub temperature: f64,
    /// percent
    pub humidity: f64,
    /// mmHg
    pub pressure: f64,
    /// degrees
    pub wind_direction: f64,
    /// m/s
    pub wind_speed: f64,
}

impl TryFrom<WeatherRow> for WeatherRecord {
    type Error = FetchError;

    fn try_from(row: WeatherRow) -> Result<Self, Self::Error> {
        let observed_at = NaiveDateTime::parse_from_str(row.time.trim(), TIME_FORMAT)
            .map_err(|e| FetchError::malformed(format!("invalid observation time {:?}: {}", row.time, e)))?
            .and_utc();

        Ok(WeatherRecord {
            observed_at,
            temperature: row.temp,
            humidity: row.hum,
            pressure: row.pres,
            wind_direction: row.wdir,
            wind_speed: row.wspeed,
        })
    }
}

impl Record for WeatherRecord {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn native(&self, quantity: Quantity) -> Option<Native> {
        match quantity {
            Quantity::Temperature => Some(Native::new(self.temperature, Unit::Celsius)),
            Quantity::Humidity => Some(Native::new(self.humidity, Unit::Percent)),
            Quantity::WindSpeed => Some(Native::new(self.wind_speed, Unit::MetersPerSecond)),
            Quantity::WindDirection => Some(Native::new(self.wind_direction, Unit::Degree)),
            Quantity::Pressure => Some(Native::new(self.pressure, Unit::MillimeterOfMercury)),
            Quantity::DewPoint => {
                units::dew_point(self.temperature, self.humidity).map(|v| Native::new(v, Unit::Celsius))
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct WeatherFetch {
    db: Database,
}

#[async_trait]
impl Fetch for WeatherFetch {
    type Record = WeatherRecord;

    fn capabilities(&self) -> &'static [Quantity] {
        CAPABILITIES
    }

    async fn fetch(&self) -> Result<Self::Record, FetchError> {
        tracing::debug!("querying BLANCO weather station");
        let row: WeatherRow = self.db.latest(LATEST_WEATHER).await?;
        WeatherRecord::try_from(row)
    }

    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard> {
        let mut cards = vec![
            HeaderCard::text("ENVMOD", model, "Weather station Model"),
            HeaderCard::number("ENVTEM", record.temperature, "[degC] Weather station temperature"),
            HeaderCard::number("ENVHUM", record.humidity, "[%] Weather station relative humidity"),
            HeaderCard::number("ENVWIN", record.wind_speed, "[m/s] Weather station wind speed"),
            HeaderCard::number("ENVDIR", record.wind_direction, "[deg] Weather station wind direction"),
            HeaderCard::number("ENVPRE", record.pressure, "[mmHg] Weather station air pressure"),
        ];

        // Omitted when humidity is too low for a dew point
        if let Some(dew_point) = units::dew_point(record.temperature, record.humidity) {
            cards.push(HeaderCard::number(
                "ENVDEW",
                dew_point,
                "[degC] Weather station dew point temperature",
            ));
        }

        cards.push(HeaderCard::time("ENVDAT", record.observed_at, "UT time of the meteo observation"));
        cards
    }

    async fn open(&self) -> Result<(), StartError> {
        self.db.open()
    }

    async fn close(&self) {
        self.db.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::{WeatherFetch, WeatherRecord, WeatherRow};
    use crate::cache::{Fetch, Record};
    use crate::sources::Database;
    use crate::station::HeaderValue;
    use crate::units::{Quantity, Unit};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn row(time: &str) -> WeatherRow {
        WeatherRow {
            time: time.to_owned(),
            temp: 20.0,
            hum: 50.0,
            pres: 587.2,
            wdir: 315.0,
            wspeed: 4.2,
        }
    }

    #[test]
    fn test_row_to_record() {
        let r = WeatherRecord::try_from(row("2016-05-03UT04:12:30")).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2016, 5, 3, 4, 12, 30).unwrap(), r.observed_at());
        assert_eq!(Unit::MillimeterOfMercury, r.native(Quantity::Pressure).unwrap().unit);
        assert_eq!(None, r.native(Quantity::Seeing));
    }

    #[test]
    fn test_row_with_invalid_time() {
        let e = WeatherRecord::try_from(row("2016-05-03 04:12:30")).unwrap_err();
        assert_eq!("malformed", e.kind());
    }

    #[test]
    fn test_dew_point_derived() {
        let r = WeatherRecord::try_from(row("2016-05-03UT04:12:30")).unwrap();
        let dp = r.native(Quantity::DewPoint).unwrap();
        assert_eq!(Unit::Celsius, dp.unit);
        assert!((dp.value - 9.3).abs() < 0.1);
    }

    #[test]
    fn test_dew_point_without_humidity() {
        let mut dry = row("2016-05-03UT04:12:30");
        dry.temp = 12.0;
        dry.hum = 0.0;

        let r = WeatherRecord::try_from(dry).unwrap();
        assert_eq!(None, r.native(Quantity::DewPoint));
        assert_eq!(Some(12.0), r.native(Quantity::Temperature).map(|n| n.value));

        let fetch = WeatherFetch {
            db: Database::new("mysql://localhost/weather", Duration::from_secs(1)),
        };
        let cards = fetch.header("Blanco", &r);
        let keys: Vec<&str> = cards.iter().map(|c| c.key).collect();
        assert_eq!(vec!["ENVMOD", "ENVTEM", "ENVHUM", "ENVWIN", "ENVDIR", "ENVPRE", "ENVDAT"], keys);
    }

    #[test]
    fn test_header() {
        let fetch = WeatherFetch {
            db: Database::new("mysql://localhost/weather", Duration::from_secs(1)),
        };

        let r = WeatherRecord::try_from(row("2016-05-03UT04:12:30")).unwrap();
        let cards = fetch.header("Blanco", &r);
        let keys: Vec<&str> = cards.iter().map(|c| c.key).collect();
        assert_eq!(
            vec!["ENVMOD", "ENVTEM", "ENVHUM", "ENVWIN", "ENVDIR", "ENVPRE", "ENVDEW", "ENVDAT"],
            keys
        );
        assert_eq!(HeaderValue::Number(587.2), cards[5].value);
        assert_eq!(HeaderValue::Text("2016-05-03T04:12:30.000000".to_owned()), cards[7].value);
    }
}
