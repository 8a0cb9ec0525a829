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

//! Upstream data sources, one `Fetch` adapter per source.
//!
//! Each adapter splits into the I/O performed by `Fetch::fetch` and a pure parse
//! step turning the raw payload into a record, so that parsing can be exercised
//! with canned payloads.

mod database;
pub mod lcogt;
pub mod rasicam;
pub mod seeing;
pub mod weather;

use crate::error::FetchError;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

pub(crate) use database::Database;

const CLIENT_USER_AGENT: &str = "ctio_environment (https://github.com/astroufsc/chimera-ctioenviroment)";

/// Build an HTTP client whose connect and total request time are bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().connect_timeout(timeout).timeout(timeout).build()
}

/// GET `url` and return the body as text, failing on any status other than 200.
pub(crate) async fn get_text(client: &Client, url: Url, accept: &str) -> Result<String, FetchError> {
    tracing::debug!(message = "making request", url = %url);

    let res = client
        .get(url.clone())
        .header(USER_AGENT, CLIENT_USER_AGENT)
        .header(ACCEPT, accept)
        .send()
        .await?;

    let status = res.status();
    if status != StatusCode::OK {
        return Err(FetchError::Connection(
            format!("unexpected status {} for {}", status, url).into(),
        ));
    }

    Ok(res.text().await?)
}
