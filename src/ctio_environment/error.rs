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

use crate::units::{Quantity, Unit};
use std::error;
use std::fmt;

pub type BoxError = Box<dyn error::Error + Send + Sync>;

/// Reasons a single fetch from an upstream data source can fail.
///
/// These never reach callers of instrument accessors: the cache logs them and
/// keeps serving the last good record.
#[derive(Debug)]
pub enum FetchError {
    Connection(BoxError),
    Timeout(String),
    MalformedPayload(String),
}

impl FetchError {
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedPayload(msg.into())
    }

    /// Short, stable name of the failure used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::MalformedPayload(_) => "malformed",
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {}", e),
            Self::Timeout(s) => write!(f, "timeout: {}", s),
            Self::MalformedPayload(s) => write!(f, "malformed payload: {}", s),
        }
    }
}

impl error::Error for FetchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::MalformedPayload(e.to_string())
        } else {
            Self::Connection(Box::new(e))
        }
    }
}

impl From<sqlx::Error> for FetchError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => Self::Timeout(e.to_string()),
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => Self::MalformedPayload(e.to_string()),
            _ => Self::Connection(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

impl From<quick_xml::DeError> for FetchError {
    fn from(e: quick_xml::DeError) -> Self {
        Self::MalformedPayload(e.to_string())
    }
}

/// Errors surfaced to callers asking an instrument for a reading. Both are
/// programming errors on the caller's side, unlike a missing reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    InvalidUnit { quantity: Quantity, unit: Unit },
    Unsupported(Quantity),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUnit { quantity, unit } => write!(f, "invalid {} unit {}", quantity, unit),
            Self::Unsupported(q) => write!(f, "{} is not provided by this instrument", q),
        }
    }
}

impl error::Error for QueryError {}

#[derive(Debug)]
pub enum StartError {
    Database(sqlx::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(e) => write!(f, "unable to configure database pool: {}", e),
        }
    }
}

impl error::Error for StartError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
        }
    }
}
