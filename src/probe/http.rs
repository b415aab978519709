//! [`IpFetcher`] backed by `reqwest`.

use std::time::Duration;

use serde_json::Value;

use super::{AttemptError, FetchFuture, IpFetcher};

/// Per-request timeout, independent of the probe's overall budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Issues real HTTP requests.
#[derive(Clone, Debug)]
pub struct HttpIpFetcher {
    timeout: Duration,
}

impl Default for HttpIpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpIpFetcher {
    /// Creates a fetcher using [`REQUEST_TIMEOUT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: REQUEST_TIMEOUT,
        }
    }

    fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, AttemptError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(address) = proxy {
            let route =
                reqwest::Proxy::all(address).map_err(|err| AttemptError(err.to_string()))?;
            builder = builder.proxy(route);
        }
        builder.build().map_err(|err| AttemptError(err.to_string()))
    }
}

impl IpFetcher for HttpIpFetcher {
    fn fetch_json<'a>(&'a self, url: &'a str, proxy: Option<&'a str>) -> FetchFuture<'a> {
        Box::pin(async move {
            let client = self.client(proxy)?;
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|err| AttemptError(err.to_string()))?;
            response
                .json::<Value>()
                .await
                .map_err(|err| AttemptError(err.to_string()))
        })
    }
}
