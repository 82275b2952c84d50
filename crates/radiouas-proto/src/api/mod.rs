//! HTTP clients for the station's data sources.

pub mod emby;
pub mod spc;
pub mod wordpress;

use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

pub use emby::EmbyClient;
pub use spc::SpcClient;
pub use wordpress::WordPressClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("radiouas/", env!("CARGO_PKG_VERSION"));

/// Failure talking to one of the station's data sources.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, TLS or timeout failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The body was not the JSON we expected.
    #[error("invalid JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ApiError>;

pub(crate) fn build_client(accept_invalid_certs: bool) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?;
    Ok(client)
}

/// Send `request` and decode a JSON body.
pub(crate) async fn fetch_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let resp = request.send().await?;
    let url = resp.url().to_string();
    let status = resp.status();
    if !status.is_success() {
        return Err(ApiError::Status { url, status });
    }
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| ApiError::Json { url, source })
}

/// `base` with exactly one trailing slash.
pub(crate) fn normalize_base(base: &str) -> String {
    format!("{}/", base.trim_end_matches('/'))
}
