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

//! RASICAM all sky camera status service.

use crate::cache::{Fetch, Native, PolledCache, Record};
use crate::error::FetchError;
use crate::metrics::FetchMetrics;
use crate::sources::get_text;
use crate::station::{HeaderCard, RefreshMode, Station};
use crate::units::{Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://rasicam.ctio.noao.edu/RASICAMWebService/vi/";
pub const DEFAULT_MODEL: &str = "RASICAM all sky camera";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

const XML_RESPONSE: &str = "application/xml, text/xml";
const UPDATE_ERROR: &str = "Error Updating Status";
const CHART_RESPONSE: &str = "Chart";

const CAPABILITIES: &[Quantity] = &[Quantity::SkyTransparency];

#[derive(Debug, Clone)]
pub struct RasicamConfig {
    pub url: Url,
    pub model: String,
    pub poll_interval: Duration,
}

impl RasicamConfig {
    pub fn new(url: Url) -> Self {
        RasicamConfig {
            url,
            model: DEFAULT_MODEL.to_owned(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn build(self, client: Client, metrics: FetchMetrics) -> Station<RasicamFetch> {
        let fetch = RasicamFetch { client, url: self.url };
        let cache = PolledCache::new("rasicam", fetch, self.poll_interval).with_metrics(metrics);
        Station::new(self.model, RefreshMode::Background, cache)
    }
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(rename = "ResponseType")]
    response_type: String,
    #[serde(rename = "StDev")]
    stdev: Option<StDev>,
}

#[derive(Debug, Deserialize)]
struct StDev {
    #[serde(rename = "GlobalStDev")]
    global: f64,
    #[serde(rename = "StDevThresh")]
    threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasicamRecord {
    pub observed_at: DateTime<Utc>,
    pub global_stdev: f64,
    pub threshold: f64,
    /// percent, either 0 or 100
    pub transparency: f64,
}

impl Record for RasicamRecord {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn native(&self, quantity: Quantity) -> Option<Native> {
        match quantity {
            Quantity::SkyTransparency => Some(Native::new(self.transparency, Unit::Percent)),
            _ => None,
        }
    }
}

/// Parse a status document. The service reports no time of its own so the
/// record is stamped with `now`.
pub fn parse_status(body: &str, now: DateTime<Utc>) -> Result<RasicamRecord, FetchError> {
    if body.contains(UPDATE_ERROR) {
        return Err(FetchError::malformed("camera reported an error updating its status"));
    }

    // The root element name isn't checked when deserializing
    if !body.contains("<ChartData") {
        return Err(FetchError::malformed("response is not chart data"));
    }

    let chart: ChartData = quick_xml::de::from_str(body)?;
    if chart.response_type.trim() != CHART_RESPONSE {
        return Err(FetchError::malformed(format!(
            "unexpected response type {:?}",
            chart.response_type
        )));
    }

    let stdev = chart
        .stdev
        .ok_or_else(|| FetchError::malformed("chart data has no StDev"))?;

    let transparency = if stdev.global <= stdev.threshold { 100.0 } else { 0.0 };
    Ok(RasicamRecord {
        observed_at: now,
        global_stdev: stdev.global,
        threshold: stdev.threshold,
        transparency,
    })
}

pub struct RasicamFetch {
    client: Client,
    url: Url,
}

#[async_trait]
impl Fetch for RasicamFetch {
    type Record = RasicamRecord;

    fn capabilities(&self) -> &'static [Quantity] {
        CAPABILITIES
    }

    async fn fetch(&self) -> Result<Self::Record, FetchError> {
        let body = get_text(&self.client, self.url.clone(), XML_RESPONSE).await?;
        let record = parse_status(&body, Utc::now())?;
        tracing::debug!(
            message = "updated RASICAM status",
            stdev = record.global_stdev,
            threshold = record.threshold
        );
        Ok(record)
    }

    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard> {
        vec![
            HeaderCard::text("SKYMOD", model, "Sky transparency monitor Model"),
            HeaderCard::number("SKYTRA", record.transparency, "[%] Sky transparency"),
            HeaderCard::number("SKYSTD", record.global_stdev, "All sky camera global standard deviation"),
            HeaderCard::number("SKYTHR", record.threshold, "All sky camera standard deviation threshold"),
            HeaderCard::time("SKYDAT", record.observed_at, "UT time of the sky observation"),
        ]
    }
}
