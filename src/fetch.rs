// src/fetch.rs
//! Release acquisition from the Census server or a local mirror.

use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SourceConfig;
use crate::error::{BpsError, Result};
use crate::process::NOT_AVAILABLE_MARKER;
use crate::schema::ReleaseKey;

/// Where release texts come from.
#[derive(Debug, Clone)]
pub enum ReleaseSource {
    Http { client: Client, base: Url },
    Mirror { root: PathBuf },
}

impl ReleaseSource {
    pub fn http(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        // a base without a trailing slash would lose its last segment on join
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(ReleaseSource::Http { client, base })
    }

    pub fn mirror(root: impl Into<PathBuf>) -> Self {
        ReleaseSource::Mirror { root: root.into() }
    }

    pub fn from_config(config: &SourceConfig) -> anyhow::Result<Self> {
        match &config.mirror_dir {
            Some(dir) => Ok(Self::mirror(dir)),
            None => Self::http(&config.base_url, config.timeout()),
        }
    }

    /// One attempt. Bodies are decoded lossily: old releases are not UTF-8.
    async fn fetch_once(&self, key: &ReleaseKey) -> Result<String> {
        let relative = key.relative_path()?;
        let text = match self {
            ReleaseSource::Http { client, base } => {
                let url = base
                    .join(&relative)
                    .map_err(|e| BpsError::InvalidRelease(format!("{}: {}", relative, e)))?;
                let resp = client.get(url).send().await?;
                if resp.status() == StatusCode::NOT_FOUND {
                    return Err(BpsError::not_found(key));
                }
                let bytes = resp.error_for_status()?.bytes().await?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            ReleaseSource::Mirror { root } => match tokio::fs::read(root.join(&relative)).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(BpsError::not_found(key))
                }
                Err(e) => return Err(e.into()),
            },
        };

        if text.contains(NOT_AVAILABLE_MARKER) {
            return Err(BpsError::not_found(key));
        }
        Ok(text)
    }
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    /// `ReleaseKey` display strings expected to be missing.
    pub known_absent: HashSet<String>,
}

impl From<&SourceConfig> for FetchSettings {
    fn from(config: &SourceConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            known_absent: config.known_absent_set(),
        }
    }
}

/// Fetch with retries. NotFound and invalid keys are final and never retried.
pub async fn fetch_with_retry(
    source: &ReleaseSource,
    key: &ReleaseKey,
    settings: &FetchSettings,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match source.fetch_once(key).await {
            Ok(text) => return Ok(text),
            Err(e)
                if e.is_not_found()
                    || matches!(e, BpsError::InvalidRelease(_) | BpsError::InvalidMonth(_)) =>
            {
                return Err(e)
            }
            Err(e) if attempt < settings.max_retries => {
                warn!(release = %key, attempt, "fetch failed, retrying: {}", e);
                sleep(settings.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedRelease {
    pub key: ReleaseKey,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FetchReport {
    pub fetched: usize,
    pub expected_missing: usize,
    pub unexpected_missing: usize,
    pub failed: usize,
}

/// Fetch every release with at most `settings.concurrency` in flight.
///
/// Missing and failed releases are reported and left out; the result is sorted
/// by year, then month, then release name.
#[tracing::instrument(level = "info", skip_all, fields(releases = keys.len()))]
pub async fn fetch_releases(
    source: &ReleaseSource,
    keys: Vec<ReleaseKey>,
    settings: &FetchSettings,
) -> (Vec<FetchedRelease>, FetchReport) {
    let start = Instant::now();
    let results: Vec<(ReleaseKey, Result<String>)> = stream::iter(keys)
        .map(|key| async move {
            let result = fetch_with_retry(source, &key, settings).await;
            (key, result)
        })
        .buffer_unordered(settings.concurrency.max(1))
        .collect()
        .await;

    let mut report = FetchReport::default();
    let mut fetched = Vec::with_capacity(results.len());
    for (key, result) in results {
        match result {
            Ok(text) => {
                debug!(release = %key, bytes = text.len(), "fetched");
                report.fetched += 1;
                fetched.push(FetchedRelease { key, text });
            }
            Err(e) if e.is_not_found() && settings.known_absent.contains(&key.to_string()) => {
                debug!(release = %key, "known absent release skipped");
                report.expected_missing += 1;
            }
            Err(e) if e.is_not_found() => {
                warn!(release = %key, "release not published");
                report.unexpected_missing += 1;
            }
            Err(e) => {
                error!(release = %key, "fetch failed: {}", e);
                report.failed += 1;
            }
        }
    }

    fetched.sort_by_key(|r| (r.key.year, r.key.month, r.key.to_string()));
    info!(
        fetched = report.fetched,
        missing = report.expected_missing + report.unexpected_missing,
        failed = report.failed,
        elapsed = ?start.elapsed(),
        "fetch complete"
    );
    (fetched, report)
}
