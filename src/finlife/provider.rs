//! Client for the FSS finlife open API (deposit / savings product search).

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const FINLIFE_BASE_URL: &str = "http://finlife.fss.or.kr/finlifeapi";

/// Top-level category code for banks; fixed for this pipeline.
const TOP_FIN_GRP_NO: &str = "020000";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductEndpoint {
    Deposit,
    Saving,
}

impl ProductEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            ProductEndpoint::Deposit => "depositProductsSearch.json",
            ProductEndpoint::Saving => "savingProductsSearch.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProductEndpoint::Deposit => "deposit",
            ProductEndpoint::Saving => "saving",
        }
    }
}

#[derive(Clone)]
pub struct FinlifeProvider {
    http: Client,
    api_key: String,
    /// Delay between availability probes.
    pub probe_interval: Duration,
    /// Overall ceiling for availability polling.
    pub probe_deadline: Duration,
}

impl FinlifeProvider {
    pub fn new(api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            api_key,
            probe_interval: Duration::from_secs(30),
            probe_deadline: Duration::from_secs(300),
        })
    }

    /// Fully-qualified request URL for an endpoint, first page only.
    pub fn product_url(&self, endpoint: ProductEndpoint) -> String {
        let mut url = url::Url::parse(FINLIFE_BASE_URL).expect("static base url");
        url.path_segments_mut()
            .expect("http base url")
            .push(endpoint.path());
        url.query_pairs_mut()
            .append_pair("auth", &self.api_key)
            .append_pair("topFinGrpNo", TOP_FIN_GRP_NO)
            .append_pair("pageNo", "1");
        url.to_string()
    }

    /// Lightweight readiness check: a short GET that succeeds only on 200.
    /// Transport errors count as "not ready", not as run failures.
    pub async fn probe(&self, endpoint: ProductEndpoint) -> bool {
        let url = self.product_url(endpoint);
        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(err) => {
                debug!(endpoint = endpoint.label(), error = %err, "probe request failed");
                false
            }
        }
    }

    /// Poll `probe` at a bounded interval until it succeeds or the ceiling
    /// elapses. Returns the full fetch URL on success so the caller never
    /// fetches an endpoint that was not probed.
    pub async fn wait_until_available(&self, endpoint: ProductEndpoint) -> Result<String> {
        let started = Instant::now();
        loop {
            if self.probe(endpoint).await {
                info!(endpoint = endpoint.label(), "source available");
                return Ok(self.product_url(endpoint));
            }
            if started.elapsed() + self.probe_interval > self.probe_deadline {
                bail!(
                    "source unavailable: {} did not respond 200 within {:?}",
                    endpoint.label(),
                    self.probe_deadline
                );
            }
            warn!(
                endpoint = endpoint.label(),
                elapsed = ?started.elapsed(),
                "source not ready; retrying"
            );
            tokio::time::sleep(self.probe_interval).await;
        }
    }

    /// Full data fetch. Any non-2xx status is a hard failure for the run;
    /// there is no cached or partial fallback.
    pub async fn fetch(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("finlife request failed")?
            .error_for_status()
            .context("finlife returned an error status")?;
        let body = resp
            .json::<Value>()
            .await
            .context("finlife response was not valid JSON")?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> FinlifeProvider {
        FinlifeProvider::new("test-key".to_string()).unwrap()
    }

    #[test]
    fn builds_deposit_url_with_required_params() {
        let url = provider().product_url(ProductEndpoint::Deposit);
        assert!(url.starts_with("http://finlife.fss.or.kr/finlifeapi/depositProductsSearch.json?"));
        assert!(url.contains("auth=test-key"));
        assert!(url.contains("topFinGrpNo=020000"));
        assert!(url.contains("pageNo=1"));
    }

    #[test]
    fn builds_saving_url_on_its_own_endpoint() {
        let url = provider().product_url(ProductEndpoint::Saving);
        assert!(url.contains("/savingProductsSearch.json?"));
    }

    #[test]
    fn api_key_is_query_encoded() {
        let p = FinlifeProvider::new("a b&c".to_string()).unwrap();
        let url = p.product_url(ProductEndpoint::Deposit);
        assert!(!url.contains("a b&c"));
        assert!(url.contains("auth=a+b%26c") || url.contains("auth=a%20b%26c"));
    }
}
