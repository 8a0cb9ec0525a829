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

use crate::cache::Reading;
use crate::error::QueryError;
use crate::station::{HeaderCard, Instrument};
use crate::units::{Quantity, Unit};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Shared state for all HTTP handlers.
pub struct RequestContext {
    registry: Registry,
    instruments: Vec<Arc<dyn Instrument>>,
}

impl RequestContext {
    pub fn new(registry: Registry, instruments: Vec<Arc<dyn Instrument>>) -> Self {
        RequestContext { registry, instruments }
    }

    fn instrument(&self, name: &str) -> Option<&Arc<dyn Instrument>> {
        self.instruments.iter().find(|i| i.name() == name)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.instruments.iter().map(|i| i.name()).collect();
        f.debug_struct("RequestContext").field("instruments", &names).finish()
    }
}

/// Routes for metrics, FITS metadata, individual readings and the interlock state
/// of every instrument.
pub fn app(context: Arc<RequestContext>) -> Router {
    Router::new()
        .route("/metrics", get(text_metrics))
        .route("/metadata", get(metadata))
        .route("/instruments/:name/:quantity", get(reading))
        .route("/interlock/:name", get(interlock))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    let mut buf = String::new();

    match encode(&mut buf, &context.registry) {
        Ok(_) => {
            tracing::debug!(message = "encoded prometheus metrics to text format", bytes = buf.len());
            ([(CONTENT_TYPE, OPENMETRICS_TEXT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn metadata(State(context): State<Arc<RequestContext>>) -> Json<BTreeMap<String, Vec<HeaderCard>>> {
    let mut out = BTreeMap::new();
    for instrument in context.instruments.iter() {
        out.insert(instrument.name().to_owned(), instrument.metadata_report().await);
    }

    Json(out)
}

#[derive(Debug, Deserialize)]
struct ReadingParams {
    unit: Option<String>,
}

async fn reading(
    State(context): State<Arc<RequestContext>>,
    Path((name, quantity)): Path<(String, String)>,
    Query(params): Query<ReadingParams>,
) -> Result<Json<Reading>, ApiError> {
    let quantity: Quantity = quantity.parse().map_err(|e| ApiError::BadRequest(format!("{}", e)))?;
    let unit = match params.unit {
        Some(u) => u.parse::<Unit>().map_err(|e| ApiError::BadRequest(format!("{}", e)))?,
        None => quantity.default_unit(),
    };

    let instrument = context
        .instrument(&name)
        .ok_or_else(|| ApiError::NotFound(format!("unknown instrument {}", name)))?;

    match instrument.get(quantity, unit).await {
        Ok(Some(r)) => Ok(Json(r)),
        Ok(None) => Err(ApiError::Unavailable(format!("no data available from {}", name))),
        Err(e @ QueryError::InvalidUnit { .. }) => Err(ApiError::BadRequest(e.to_string())),
        Err(QueryError::Unsupported(q)) => Err(ApiError::NotFound(format!("{} does not provide {}", name, q))),
    }
}

#[derive(Debug, Serialize)]
struct InterlockBody {
    weather_ok: bool,
}

async fn interlock(
    State(context): State<Arc<RequestContext>>,
    Path(name): Path<String>,
) -> Result<Json<InterlockBody>, ApiError> {
    let instrument = context
        .instrument(&name)
        .ok_or_else(|| ApiError::NotFound(format!("unknown instrument {}", name)))?;

    instrument
        .weather_ok()
        .map(|weather_ok| Json(InterlockBody { weather_ok }))
        .ok_or_else(|| ApiError::Unavailable(format!("no interlock state available from {}", name)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e),
            Self::Unavailable(e) => (StatusCode::SERVICE_UNAVAILABLE, e),
        };

        (status, Json(ErrorBody { error })).into_response()
    }
}
