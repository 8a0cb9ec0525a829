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

//! Weather of the LCOGT site at Cerro Tololo.
//!
//! Data comes either from the LCOGT weather API, which serves one JSON time
//! series per datum, or from the legacy telops page, an HTML table of
//! `label | value` rows where values carry their unit symbol (e.g. `12.3°C`).

use crate::cache::{Fetch, Native, PolledCache, Record};
use crate::error::FetchError;
use crate::metrics::FetchMetrics;
use crate::sources::get_text;
use crate::station::{HeaderCard, RefreshMode, Station};
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://weather-api.lco.global/query";
pub const DEFAULT_SITE: &str = "lsc";
pub const DEFAULT_MODEL: &str = "LCOGT weather";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(120);

const JSON_RESPONSE: &str = "application/json";
const HTML_RESPONSE: &str = "text/html";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATUMS: [&str; 7] = [
    "Weather Air Temperature Value",
    "Weather Humidity Value",
    "Weather Wind Speed Value",
    "Weather Wind Direction Value",
    "Weather Dew Point Value",
    "Weather Barometric Pressure Value",
    "Boltwood Transparency Measure",
];

const COMPASS: [(&str, f64); 16] = [
    ("N", 0.0),
    ("NNE", 22.5),
    ("NE", 45.0),
    ("ENE", 67.5),
    ("E", 90.0),
    ("ESE", 112.5),
    ("SE", 135.0),
    ("SSE", 157.5),
    ("S", 180.0),
    ("SSW", 202.5),
    ("SW", 225.0),
    ("WSW", 247.5),
    ("W", 270.0),
    ("WNW", 292.5),
    ("NW", 315.0),
    ("NNW", 337.5),
];

const CAPABILITIES: &[Quantity] = &[
    Quantity::Temperature,
    Quantity::Humidity,
    Quantity::WindSpeed,
    Quantity::WindDirection,
    Quantity::Pressure,
    Quantity::DewPoint,
    Quantity::SkyTransparency,
];

#[derive(Debug, Clone)]
pub enum LcogtSource {
    Api { url: Url, site: String },
    Page { url: Url },
}

#[derive(Debug, Clone)]
pub struct LcogtConfig {
    pub source: LcogtSource,
    pub model: String,
    pub poll_interval: Duration,
}

impl LcogtConfig {
    pub fn new(source: LcogtSource) -> Self {
        LcogtConfig {
            source,
            model: DEFAULT_MODEL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build an LCOGT instrument refreshed by a background task every `poll_interval`.
    pub fn build(self, client: Client, metrics: FetchMetrics) -> Station<LcogtFetch> {
        let fetch = LcogtFetch {
            client,
            source: self.source,
        };

        let cache = PolledCache::new("lcogt", fetch, self.poll_interval).with_metrics(metrics);
        Station::new(self.model, RefreshMode::Background, cache)
    }
}

/// Site interlock state reported alongside the weather.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interlock {
    pub reason: String,
    pub ok_to_open: bool,
    pub sun_up: bool,
}

impl Interlock {
    /// Map the free text interlock reason to flags. No reason (or `OK`) means the
    /// site may open. A reason made only of "sun up" style entries means the site
    /// is closed for daylight while the weather itself is fine.
    pub fn from_reason(reason: &str) -> Self {
        let reason = reason.trim();
        let parts: Vec<String> = reason
            .split(|c| c == ',' || c == ';')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let ok_to_open = parts.iter().all(|p| p == "ok" || p == "none");
        let sun_up = !ok_to_open && parts.iter().all(|p| p.contains("sun") || p == "ok");

        Interlock {
            reason: reason.to_owned(),
            ok_to_open,
            sun_up,
        }
    }

    pub fn weather_ok(&self) -> bool {
        self.ok_to_open || self.sun_up
    }
}

impl Default for Interlock {
    fn default() -> Self {
        Self::from_reason("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LcogtRecord {
    pub observed_at: DateTime<Utc>,
    /// celsius
    pub temperature: f64,
    /// percent
    pub humidity: f64,
    /// m/s
    pub wind_speed: f64,
    /// degrees
    pub wind_direction: f64,
    /// celsius
    pub dew_point: f64,
    /// mmHg
    pub pressure: f64,
    /// percent
    pub sky_transparency: f64,
    pub interlock: Interlock,
}

impl Record for LcogtRecord {
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
            Quantity::DewPoint => Some(Native::new(self.dew_point, Unit::Celsius)),
            Quantity::SkyTransparency => Some(Native::new(self.sky_transparency, Unit::Percent)),
            _ => None,
        }
    }
}

/// One point of a time series returned by the weather API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Sample {
    #[serde(rename = "TimeStamp")]
    pub timestamp: String,
    #[serde(rename = "Value")]
    pub value: Option<f64>,
    #[serde(rename = "ValueString", default)]
    pub value_string: String,
}

impl Sample {
    fn number(&self) -> Result<f64, FetchError> {
        self.value
            .or_else(|| self.value_string.trim().parse().ok())
            .ok_or_else(|| FetchError::malformed(format!("sample at {:?} has no value", self.timestamp)))
    }
}

/// Latest sample of a JSON time series.
pub fn parse_series(body: &str) -> Result<Sample, FetchError> {
    let mut series: Vec<Sample> = serde_json::from_str(body)?;
    series.pop().ok_or_else(|| FetchError::malformed("empty time series"))
}

/// Parse `YYYY/MM/DD HH:MM:SS` (or with dashes) as UT.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, FetchError> {
    NaiveDateTime::parse_from_str(&s.trim().replace('/', "-"), TIMESTAMP_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|e| FetchError::malformed(format!("invalid timestamp {:?}: {}", s, e)))
}

/// Build a record from the latest sample of each datum, in `DATUMS` order.
fn record_from_samples(samples: &[Sample]) -> Result<LcogtRecord, FetchError> {
    let [temperature, humidity, wind_speed, wind_direction, dew_point, pressure, transparency] = samples else {
        return Err(FetchError::malformed(format!(
            "expected {} series, got {}",
            DATUMS.len(),
            samples.len()
        )));
    };

    Ok(LcogtRecord {
        observed_at: parse_timestamp(&temperature.timestamp)?,
        temperature: temperature.number()?,
        humidity: humidity.number()?,
        wind_speed: wind_speed.number()?,
        wind_direction: wind_direction.number()?,
        dew_point: dew_point.number()?,
        pressure: pressure.number()?,
        sky_transparency: transparency.number()?,
        interlock: Interlock::default(),
    })
}

/// Split a `"<value><unit-symbol>"` cell into the number and the trimmed symbol.
fn split_value(cell: &str) -> Option<(f64, &str)> {
    let cell = cell.trim();
    let end = cell
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(cell.len());

    let value = cell[..end].parse().ok()?;
    Some((value, cell[end..].trim()))
}

/// Value of a cell converted to `native`, assuming `native` when the cell has no symbol.
fn measurement(cell: &str, native: Unit) -> Result<f64, FetchError> {
    let (value, symbol) =
        split_value(cell).ok_or_else(|| FetchError::malformed(format!("no numeric value in {:?}", cell)))?;
    if symbol.is_empty() {
        return Ok(value);
    }

    let unit: Unit = symbol
        .parse()
        .map_err(|e| FetchError::malformed(format!("{} in {:?}", e, cell)))?;
    unit.convert(value, native)
        .ok_or_else(|| FetchError::malformed(format!("unexpected unit {} in {:?}", unit, cell)))
}

/// Wind direction given either as an angle or a compass point. Unknown compass
/// points are reported as north.
fn wind_direction(cell: &str) -> Result<f64, FetchError> {
    let cell = cell.trim();
    if split_value(cell).is_some() {
        return measurement(cell, Unit::Degree);
    }

    let upper = cell.to_uppercase();
    Ok(COMPASS
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, deg)| *deg)
        .unwrap_or(0.0))
}

/// First of `names` present in the scraped rows.
fn field<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> Result<&'a str, FetchError> {
    names
        .iter()
        .find_map(|n| fields.get(*n))
        .map(|v| v.as_str())
        .ok_or_else(|| FetchError::malformed(format!("page has no {} row", names[0])))
}

/// Parse the table of the legacy telops page. `fetched_at` is used as the
/// observation time when the page doesn't include one.
pub fn parse_page(body: &str, fetched_at: DateTime<Utc>) -> Result<LcogtRecord, FetchError> {
    let document = Html::parse_document(body);
    let rows = Selector::parse("tr").map_err(|e| FetchError::malformed(e.to_string()))?;
    let cells = Selector::parse("td, th").map_err(|e| FetchError::malformed(e.to_string()))?;

    let mut fields = HashMap::new();
    for row in document.select(&rows) {
        let texts: Vec<String> = row
            .select(&cells)
            .map(|c| c.text().collect::<String>().trim().to_owned())
            .collect();

        if let [label, value, ..] = texts.as_slice() {
            fields.insert(label.trim_end_matches(':').trim().to_lowercase(), value.clone());
        }
    }

    let observed_at = match field(&fields, &["timestamp", "last update", "time"]) {
        Ok(t) => parse_timestamp(t)?,
        Err(_) => fetched_at,
    };

    let interlock = field(&fields, &["interlock reason"])
        .map(Interlock::from_reason)
        .unwrap_or_default();

    Ok(LcogtRecord {
        observed_at,
        temperature: measurement(field(&fields, &["temperature", "air temperature"])?, Unit::Celsius)?,
        humidity: measurement(field(&fields, &["humidity", "relative humidity"])?, Unit::Percent)?,
        wind_speed: measurement(field(&fields, &["wind speed"])?, Unit::MetersPerSecond)?,
        wind_direction: wind_direction(field(&fields, &["wind direction"])?)?,
        dew_point: measurement(field(&fields, &["dew point"])?, Unit::Celsius)?,
        pressure: measurement(field(&fields, &["pressure", "barometric pressure"])?, Unit::MillimeterOfMercury)?,
        sky_transparency: measurement(field(&fields, &["sky transparency", "transparency"])?, Unit::Percent)?,
        interlock,
    })
}

pub struct LcogtFetch {
    client: Client,
    source: LcogtSource,
}

impl LcogtFetch {
    fn datum_url(base: &Url, site: &str, datum: &str) -> Url {
        let query = format!(
            "site={}&datumname={}",
            utf8_percent_encode(site, NON_ALPHANUMERIC),
            utf8_percent_encode(datum, NON_ALPHANUMERIC)
        );

        let mut url = base.clone();
        url.set_query(Some(&query));
        url
    }
}

#[async_trait]
impl Fetch for LcogtFetch {
    type Record = LcogtRecord;

    fn capabilities(&self) -> &'static [Quantity] {
        CAPABILITIES
    }

    async fn fetch(&self) -> Result<Self::Record, FetchError> {
        match &self.source {
            LcogtSource::Api { url, site } => {
                let mut samples = Vec::with_capacity(DATUMS.len());
                for datum in DATUMS {
                    let body = get_text(&self.client, Self::datum_url(url, site, datum), JSON_RESPONSE).await?;
                    samples.push(parse_series(&body)?);
                }

                record_from_samples(&samples)
            }
            LcogtSource::Page { url } => {
                let body = get_text(&self.client, url.clone(), HTML_RESPONSE).await?;
                parse_page(&body, Utc::now())
            }
        }
    }

    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard> {
        vec![
            HeaderCard::text("ENVMOD", model, "Weather station Model"),
            HeaderCard::number("ENVTEM", record.temperature, "[degC] Weather station temperature"),
            HeaderCard::number("ENVDEW", record.dew_point, "[degC] Weather station dew point temperature"),
            HeaderCard::number("ENVHUM", record.humidity, "[%] Weather station relative humidity"),
            HeaderCard::number("ENVWIN", record.wind_speed, "[m/s] Weather station wind speed"),
            HeaderCard::number("ENVDIR", record.wind_direction, "[deg] Weather station wind direction"),
            HeaderCard::number("ENVPRE", record.pressure, "[mmHg] Weather station air pressure"),
            HeaderCard::number("ENVSKY", record.sky_transparency, "[%] Sky transparency"),
            HeaderCard::time("ENVDAT", record.observed_at, "UT time of the meteo observation"),
        ]
    }

    fn weather_ok(&self, record: &Self::Record) -> Option<bool> {
        Some(record.interlock.weather_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        parse_page, parse_series, parse_timestamp, record_from_samples, wind_direction, Interlock, LcogtConfig,
        LcogtFetch, LcogtSource, DATUMS,
    };
    use crate::cache::{Fetch, Record};
    use crate::metrics::FetchMetrics;
    use crate::sources::http_client;
    use crate::station::{HeaderValue, Instrument};
    use crate::units::{Quantity, Unit};
    use chrono::{TimeZone, Utc};
    use reqwest::Url;
    use std::time::Duration;

    const SERIES: &str = r#"[
        {"TimeStamp": "2016/05/03 04:09:00", "TimeStampMeasured": "2016/05/03 04:08:58", "Value": 11.9, "ValueString": "11.9"},
        {"TimeStamp": "2016/05/03 04:10:00", "TimeStampMeasured": "2016/05/03 04:09:58", "Value": 12.1, "ValueString": "12.1"}
    ]"#;

    const PAGE: &str = r#"<html><body>
        <table>
          <tr><th>Parameter</th><th>Value</th></tr>
          <tr><td>Timestamp</td><td>2016/05/03 04:10:00</td></tr>
          <tr><td>Temperature:</td><td>12.3°C</td></tr>
          <tr><td>Humidity</td><td>45%</td></tr>
          <tr><td>Wind Speed</td><td>18 km/h</td></tr>
          <tr><td>Wind Direction</td><td>NNW</td></tr>
          <tr><td>Dew Point</td><td>-1.2°C</td></tr>
          <tr><td>Pressure</td><td>583.4mmHg</td></tr>
          <tr><td>Sky Transparency</td><td>87%</td></tr>
          <tr><td>Interlock Reason</td><td>Sun up</td></tr>
        </table>
    </body></html>"#;

    fn fetch() -> LcogtFetch {
        LcogtFetch {
            client: http_client(Duration::from_secs(1)).unwrap(),
            source: LcogtSource::Page {
                url: Url::parse("http://127.0.0.1:1/telops").unwrap(),
            },
        }
    }

    #[test]
    fn test_parse_series_latest() {
        let s = parse_series(SERIES).unwrap();
        assert_eq!("2016/05/03 04:10:00", s.timestamp);
        assert_eq!(Some(12.1), s.value);
    }

    #[test]
    fn test_parse_series_empty_or_invalid() {
        assert_eq!("malformed", parse_series("[]").unwrap_err().kind());
        assert_eq!("malformed", parse_series("<html>").unwrap_err().kind());
        assert_eq!("malformed", parse_series(r#"{"error": "no such datum"}"#).unwrap_err().kind());
    }

    #[test]
    fn test_parse_timestamp() {
        let expected = Utc.with_ymd_and_hms(2016, 5, 3, 4, 10, 0).unwrap();
        assert_eq!(expected, parse_timestamp("2016/05/03 04:10:00").unwrap());
        assert_eq!(expected, parse_timestamp("2016-05-03 04:10:00").unwrap());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_record_from_samples() {
        let mut samples = Vec::new();
        for (i, _) in DATUMS.iter().enumerate() {
            let mut s = parse_series(SERIES).unwrap();
            s.value = Some(i as f64);
            samples.push(s);
        }
        // Value missing but present as text
        samples[6].value = None;
        samples[6].value_string = " 95.5 ".to_owned();

        let r = record_from_samples(&samples).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2016, 5, 3, 4, 10, 0).unwrap(), r.observed_at());
        assert_eq!(0.0, r.temperature);
        assert_eq!(5.0, r.pressure);
        assert_eq!(95.5, r.sky_transparency);
        assert!(r.interlock.weather_ok());

        // Wind speed with only its text value left
        samples[2].value = None;
        assert_eq!(12.1, record_from_samples(&samples).unwrap().wind_speed);

        // Neither a value nor text
        samples[2].value_string = String::new();
        assert_eq!("malformed", record_from_samples(&samples).unwrap_err().kind());
        assert!(record_from_samples(&samples[..3]).is_err());
    }

    #[test]
    fn test_parse_series_null_value() {
        let text_only = r#"[{"TimeStamp": "2016/05/03 04:10:00", "Value": null, "ValueString": "7.25"}]"#;
        let s = parse_series(text_only).unwrap();
        assert_eq!(None, s.value);
        assert_eq!(7.25, s.number().unwrap());

        let empty = r#"[{"TimeStamp": "2016/05/03 04:10:00", "Value": null, "ValueString": ""}]"#;
        assert_eq!("malformed", parse_series(empty).unwrap().number().unwrap_err().kind());

        let missing = r#"[{"TimeStamp": "2016/05/03 04:10:00", "Value": null}]"#;
        assert!(parse_series(missing).unwrap().number().is_err());
    }

    #[test]
    fn test_parse_page() {
        let r = parse_page(PAGE, Utc::now()).unwrap();
        assert_eq!(Utc.with_ymd_and_hms(2016, 5, 3, 4, 10, 0).unwrap(), r.observed_at);
        assert_eq!(12.3, r.temperature);
        assert_eq!(45.0, r.humidity);
        assert!((r.wind_speed - 5.0).abs() < 1e-9);
        assert_eq!(337.5, r.wind_direction);
        assert_eq!(-1.2, r.dew_point);
        assert_eq!(583.4, r.pressure);
        assert_eq!(87.0, r.sky_transparency);
        assert!(r.interlock.sun_up);
        assert!(r.interlock.weather_ok());
    }

    #[test]
    fn test_parse_page_missing_rows() {
        let fetched_at = Utc.with_ymd_and_hms(2016, 5, 3, 5, 0, 0).unwrap();
        let page = PAGE
            .replace("<tr><td>Timestamp</td><td>2016/05/03 04:10:00</td></tr>", "")
            .replace("<tr><td>Interlock Reason</td><td>Sun up</td></tr>", "");

        let r = parse_page(&page, fetched_at).unwrap();
        assert_eq!(fetched_at, r.observed_at);
        assert!(r.interlock.ok_to_open);

        let page = page.replace("<tr><td>Humidity</td><td>45%</td></tr>", "");
        assert_eq!("malformed", parse_page(&page, fetched_at).unwrap_err().kind());
    }

    #[test]
    fn test_parse_page_bad_unit() {
        let page = PAGE.replace("12.3°C", "12.3 Pa");
        assert_eq!("malformed", parse_page(&page, Utc::now()).unwrap_err().kind());
    }

    #[test]
    fn test_wind_direction() {
        assert_eq!(315.0, wind_direction("NW").unwrap());
        assert_eq!(67.5, wind_direction(" ene ").unwrap());
        assert_eq!(0.0, wind_direction("calm").unwrap());
        assert_eq!(123.0, wind_direction("123°").unwrap());
    }

    #[test]
    fn test_interlock() {
        assert!(Interlock::from_reason("").ok_to_open);
        assert!(Interlock::from_reason("OK").ok_to_open);

        let sun = Interlock::from_reason("Sun up");
        assert!(!sun.ok_to_open);
        assert!(sun.sun_up);
        assert!(sun.weather_ok());

        let humid = Interlock::from_reason("Humidity, Sun up");
        assert!(!humid.sun_up);
        assert!(!humid.weather_ok());
        assert_eq!("Humidity, Sun up", humid.reason);
    }

    #[test]
    fn test_datum_url() {
        let base = Url::parse(super::DEFAULT_API_URL).unwrap();
        let url = LcogtFetch::datum_url(&base, "lsc", "Weather Humidity Value");
        assert_eq!(
            "https://weather-api.lco.global/query?site=lsc&datumname=Weather%20Humidity%20Value",
            url.as_str()
        );
    }

    #[test]
    fn test_weather_ok_from_interlock() {
        let r = parse_page(PAGE, Utc::now()).unwrap();
        assert_eq!(Some(true), fetch().weather_ok(&r));

        let closed = parse_page(&PAGE.replace(">Sun up<", ">Wind<"), Utc::now()).unwrap();
        assert_eq!(Some(false), fetch().weather_ok(&closed));
    }

    #[test]
    fn test_header() {
        let r = parse_page(PAGE, Utc::now()).unwrap();
        let cards = fetch().header("LCOGT weather", &r);
        let keys: Vec<&str> = cards.iter().map(|c| c.key).collect();
        assert_eq!(
            vec!["ENVMOD", "ENVTEM", "ENVDEW", "ENVHUM", "ENVWIN", "ENVDIR", "ENVPRE", "ENVSKY", "ENVDAT"],
            keys
        );
        assert_eq!(HeaderValue::Number(87.0), cards[7].value);
    }

    #[tokio::test]
    async fn test_unreachable_page_is_no_data() {
        let source = LcogtSource::Page {
            url: Url::parse("http://127.0.0.1:1/telops").unwrap(),
        };
        let station = LcogtConfig::new(source).build(
            http_client(Duration::from_millis(200)).unwrap(),
            FetchMetrics::default(),
        );

        assert_eq!(None, station.weather_ok());
        station.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(None, station.weather_ok());
        assert_eq!(None, station.sky_transparency(Unit::Percent).await.unwrap());
        assert!(station.provides(Quantity::DewPoint));
        station.stop().await;
    }
}
