//! "What is my IP" connectivity probe with bounded retry.
//!
//! A tunnel only counts as live once a request routed through it returns the
//! public address it egresses from. Individual attempt failures (network
//! errors, non-JSON bodies, missing fields) are expected while a tunnel is
//! still negotiating, so they are discarded and retried; only exhausting the
//! overall budget is reported.

mod http;

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

pub use http::{HttpIpFetcher, REQUEST_TIMEOUT};

/// Generic public IP service used when no gateway-local probe applies.
pub const DEFAULT_PUBLIC_PROBE_URL: &str = "https://ipinfo.io/json";

/// Path of the gateway control API returning the tunnel's public address.
pub const GATEWAY_PUBLIC_IP_PATH: &str = "/v1/publicip/ip";

/// Public address and country observed through a network path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObservedIp {
    /// Observed public address.
    pub ip: String,
    /// Country reported alongside the address.
    pub country: String,
}

/// Where and how to ask for the public address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeTarget {
    /// Endpoint returning a JSON object.
    pub url: String,
    /// Name of the field holding the address.
    pub ip_field: String,
    /// Name of the field holding the country.
    pub country_field: String,
    /// Optional proxy the request is forced through.
    pub proxy: Option<String>,
}

impl ProbeTarget {
    /// Targets the loopback control API of a gateway listening on `port`.
    #[must_use]
    pub fn gateway_control(port: u16) -> Self {
        Self {
            url: format!("http://127.0.0.1:{port}{GATEWAY_PUBLIC_IP_PATH}"),
            ip_field: String::from("public_ip"),
            country_field: String::from("country"),
            proxy: None,
        }
    }

    /// Targets the generic public probe service.
    #[must_use]
    pub fn public_default() -> Self {
        Self {
            url: String::from(DEFAULT_PUBLIC_PROBE_URL),
            ip_field: String::from("ip"),
            country_field: String::from("country"),
            proxy: None,
        }
    }

    /// Routes requests through `proxy`.
    #[must_use]
    pub fn via_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Pulls the address and country out of a response body.
    #[must_use]
    pub fn extract(&self, body: &Value) -> Option<ObservedIp> {
        let ip = body.get(&self.ip_field)?.as_str()?.trim();
        let country = body.get(&self.country_field)?.as_str()?.trim();
        if ip.is_empty() {
            return None;
        }
        Some(ObservedIp {
            ip: ip.to_owned(),
            country: country.to_owned(),
        })
    }
}

/// Retry budget for [`ConnectivityProbe::probe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeSchedule {
    /// Wall-clock budget measured from the first attempt.
    pub max_wait: Duration,
    /// Delay between attempts.
    pub poll_interval: Duration,
}

impl Default for ProbeSchedule {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Failure of a single probe attempt. Never surfaced past the probe.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct AttemptError(pub String);

/// Errors surfaced by the probe.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// No valid response arrived within the budget.
    #[error("no valid response from {url} after {attempts} attempts in {waited:?}")]
    TimeoutExceeded {
        /// Endpoint that was probed.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Elapsed time when the probe gave up.
        waited: Duration,
    },
}

/// Future returned by [`IpFetcher`] implementations.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, AttemptError>> + Send + 'a>>;

/// Performs a single timed GET and decodes the JSON body.
pub trait IpFetcher {
    /// Fetches `url`, optionally through `proxy`.
    fn fetch_json<'a>(&'a self, url: &'a str, proxy: Option<&'a str>) -> FetchFuture<'a>;
}

/// Bounded-retry public address probe.
#[derive(Clone, Debug)]
pub struct ConnectivityProbe<F> {
    fetcher: F,
}

impl<F: IpFetcher> ConnectivityProbe<F> {
    /// Creates a probe using `fetcher` for individual attempts.
    #[must_use]
    pub const fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Returns the fetcher, mainly so tests can inspect it.
    #[must_use]
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Probes `target` until it yields an address or the budget runs out.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::TimeoutExceeded`] once the elapsed time since
    /// the first attempt exceeds `schedule.max_wait`.
    pub async fn probe(
        &self,
        target: &ProbeTarget,
        schedule: &ProbeSchedule,
    ) -> Result<ObservedIp, ProbeError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            match self.attempt(target).await {
                Ok(observed) => {
                    tracing::debug!(url = %target.url, attempts, ip = %observed.ip, "probe succeeded");
                    return Ok(observed);
                }
                Err(err) => {
                    tracing::debug!(url = %target.url, attempt = attempts, error = %err, "probe attempt failed");
                }
            }

            let waited = started.elapsed();
            if waited > schedule.max_wait {
                return Err(ProbeError::TimeoutExceeded {
                    url: target.url.clone(),
                    attempts,
                    waited,
                });
            }
            sleep(schedule.poll_interval).await;
        }
    }

    async fn attempt(&self, target: &ProbeTarget) -> Result<ObservedIp, AttemptError> {
        let body = self
            .fetcher
            .fetch_json(&target.url, target.proxy.as_deref())
            .await?;
        target.extract(&body).ok_or_else(|| {
            AttemptError(format!(
                "response lacks string fields '{}' and '{}'",
                target.ip_field, target.country_field
            ))
        })
    }
}
