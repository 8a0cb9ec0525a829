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

//! In-memory source used by tests of the cache, poller and HTTP layers.

use crate::cache::{Fetch, Native, Record};
use crate::error::FetchError;
use crate::station::HeaderCard;
use crate::units::{self, Quantity, Unit};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestRecord {
    pub observed_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}

impl Record for TestRecord {
    fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    fn native(&self, quantity: Quantity) -> Option<Native> {
        match quantity {
            Quantity::Temperature => Some(Native::new(self.temperature, Unit::Celsius)),
            Quantity::Humidity => Some(Native::new(self.humidity, Unit::Percent)),
            Quantity::DewPoint => {
                units::dew_point(self.temperature, self.humidity).map(|v| Native::new(v, Unit::Celsius))
            }
            _ => None,
        }
    }
}

/// Source that replays a fixed script of outcomes: `Some(t)` succeeds with
/// temperature `t` and 50% humidity, `None` fails with a connection error.
pub(crate) struct ScriptedFetch {
    script: Mutex<VecDeque<Option<f64>>>,
    repeat: Option<f64>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetch {
    pub fn new<I: IntoIterator<Item = Option<f64>>>(script: I) -> Self {
        ScriptedFetch {
            script: Mutex::new(script.into_iter().collect()),
            repeat: None,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn repeating(temperature: f64) -> Self {
        let mut fetch = Self::new([]);
        fetch.repeat = Some(temperature);
        fetch
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn observed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, 3, 4, 30, 0).unwrap()
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    type Record = TestRecord;

    fn capabilities(&self) -> &'static [Quantity] {
        &[Quantity::Temperature, Quantity::Humidity, Quantity::DewPoint]
    }

    async fn fetch(&self) -> Result<Self::Record, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front().unwrap_or(self.repeat);
        match next {
            Some(temperature) => Ok(TestRecord {
                observed_at: Self::observed_at(),
                temperature,
                humidity: 50.0,
            }),
            None => Err(FetchError::Connection("scripted failure".into())),
        }
    }

    fn header(&self, model: &str, record: &Self::Record) -> Vec<HeaderCard> {
        vec![
            HeaderCard::text("TSTMOD", model, "Test model"),
            HeaderCard::number("TSTTEM", record.temperature, "[degC] Test temperature"),
        ]
    }

    fn weather_ok(&self, record: &Self::Record) -> Option<bool> {
        Some(record.humidity < 85.0)
    }
}
