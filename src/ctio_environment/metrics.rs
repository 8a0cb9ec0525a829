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

use crate::error::FetchError;
use crate::units::{Quantity, Unit};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::atomic::AtomicU64;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InstrumentLabels {
    instrument: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FailureLabels {
    instrument: String,
    kind: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReadingLabels {
    instrument: String,
    quantity: String,
    unit: String,
}

/// Holder for metrics updated by instrument caches on every fetch attempt.
///
/// All metrics are registered upon call to `FetchMetrics::new()` and are labeled
/// with the name of the instrument (e.g. `{instrument="seeing"}`). A `FetchMetrics`
/// created with `Default` is not registered anywhere, which is what tests and
/// embedders without a metrics endpoint want.
#[derive(Clone, Default)]
pub struct FetchMetrics {
    attempts: Family<InstrumentLabels, Counter>,
    failures: Family<FailureLabels, Counter>,
    readings: Family<ReadingLabels, Gauge<f64, AtomicU64>>,
}

impl FetchMetrics {
    pub fn new(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "fetch_attempts",
            "Attempts to fetch data from an upstream source",
            metrics.attempts.clone(),
        );
        reg.register(
            "fetch_failures",
            "Failed attempts to fetch data from an upstream source, by kind",
            metrics.failures.clone(),
        );
        reg.register(
            "reading",
            "Most recent successfully fetched value, in the native unit of the source",
            metrics.readings.clone(),
        );

        metrics
    }

    pub fn attempt(&self, instrument: &str) {
        self.attempts
            .get_or_create(&InstrumentLabels {
                instrument: instrument.to_owned(),
            })
            .inc();
    }

    pub fn failure(&self, instrument: &str, err: &FetchError) {
        self.failures
            .get_or_create(&FailureLabels {
                instrument: instrument.to_owned(),
                kind: err.kind().to_owned(),
            })
            .inc();
    }

    pub fn reading(&self, instrument: &str, quantity: Quantity, value: f64, unit: Unit) {
        self.readings
            .get_or_create(&ReadingLabels {
                instrument: instrument.to_owned(),
                quantity: quantity.name().to_owned(),
                unit: unit.symbol().to_owned(),
            })
            .set(value);
    }
}

impl fmt::Debug for FetchMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchMetrics").finish_non_exhaustive()
    }
}
