use chrono::Utc;
use futures::future::join_all;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::models::{Site, SiteStatus, Snapshot};

/// Issues one timed GET per site and classifies the outcome.
///
/// Cloning is cheap: the underlying `reqwest::Client` shares its connection
/// pool between clones.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Probes every site concurrently and returns once all of them are done.
    ///
    /// The result is index-aligned with `sites` whatever order the probes
    /// finish in. A per-site failure is data, never an error of the cycle.
    pub async fn run_cycle(&self, sites: &[Site]) -> Snapshot {
        let handles: Vec<_> = sites
            .iter()
            .cloned()
            .map(|site| {
                let prober = self.clone();
                tokio::spawn(async move { prober.check_site(&site).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(sites)
            .map(|(joined, site)| match joined {
                Ok(status) => status,
                Err(e) => failed_probe(site, &e),
            })
            .collect()
    }

    pub async fn check_site(&self, site: &Site) -> SiteStatus {
        let start = Instant::now();
        let outcome = self.fetch(&site.url).await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        let (is_up, status_code, error) = match outcome {
            Ok(code) => (is_up_status(code), code, String::new()),
            Err(e) => (false, 0, describe_error(&e)),
        };

        let status = SiteStatus {
            site: site.clone(),
            is_up,
            response_time_ms,
            status_code,
            last_checked: Utc::now(),
            error,
        };
        log_probe(&status);
        status
    }

    /// Sends the request and drains the body so the timing covers the full
    /// exchange. Any failure before the body is consumed counts as transport.
    async fn fetch(&self, url: &str) -> Result<u16, reqwest::Error> {
        let mut response = self.client.get(url).send().await?;
        let code = response.status().as_u16();
        while response.chunk().await?.is_some() {}
        Ok(code)
    }
}

/// Entry recorded for a site whose probe task died before reporting.
fn failed_probe(site: &Site, err: &JoinError) -> SiteStatus {
    error!(site = %site.name, "Probe task failed: {}", err);
    SiteStatus {
        site: site.clone(),
        is_up: false,
        response_time_ms: 0,
        status_code: 0,
        last_checked: Utc::now(),
        error: format!("probe task failed: {}", err),
    }
}

pub fn is_up_status(code: u16) -> bool {
    (200..400).contains(&code)
}

/// Flattens an error and its source chain into one line.
fn describe_error(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

fn log_probe(status: &SiteStatus) {
    let checked_at = status.last_checked.format("%H:%M:%S");
    if status.is_up {
        info!(
            site = %status.site.name,
            response_time_ms = status.response_time_ms,
            status_code = status.status_code,
            checked_at = %checked_at,
            "Site up"
        );
    } else {
        warn!(
            site = %status.site.name,
            response_time_ms = status.response_time_ms,
            status_code = status.status_code,
            checked_at = %checked_at,
            error = %status.error,
            "Site down"
        );
    }
}
