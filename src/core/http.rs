//! HTTP client utilities shared by the web probes.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::error::{MeterError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns an error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("meterbar/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| MeterError::Network(e.to_string()))
}

/// Map a reqwest error into the probe taxonomy.
pub fn classify_request_error(provider: &str, err: &reqwest::Error) -> MeterError {
    if err.is_timeout() {
        MeterError::TimedOut {
            provider: provider.to_string(),
            seconds: DEFAULT_TIMEOUT.as_secs(),
        }
    } else {
        MeterError::Network(err.to_string())
    }
}

/// GET a JSON document, optionally with a cookie header.
///
/// # Errors
///
/// `Http` on non-success status, `Network`/`TimedOut` on transport failure,
/// `Json` on parse failure.
pub async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    cookie_header: Option<&str>,
) -> Result<T> {
    let mut request = client.get(url);
    if let Some(cookie) = cookie_header {
        request = request.header(reqwest::header::COOKIE, cookie);
    }

    let response = request
        .send()
        .await
        .map_err(|e| classify_request_error(provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MeterError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| MeterError::ParseFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_succeeds() {
        assert!(build_client(DEFAULT_TIMEOUT).is_ok());
    }
}
