use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheKey};
use crate::title::Title;

/// Prefix applied when a caller does not say otherwise.
pub const DEFAULT_REPORT_PREFIX: &str = "File:";

/// Source of precomputed, numbered title reports.
pub trait ReportSource {
    /// Titles of report `id`, each prefixed with `prefix`. `None` and `Some("")` both mean no
    /// prefix.
    fn fetch_report(&mut self, id: u32, prefix: Option<&str>) -> Result<HashSet<Title>>;
}

pub struct ReportFetcher {
    client: Client,
    base_url: String,
    user_agent: String,
    cache: Arc<dyn Cache>,
    ttl: Duration,
    download_count: usize,
}

impl ReportFetcher {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        cache: Arc<dyn Cache>,
        ttl: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build report HTTP client")?;
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            user_agent: user_agent.into(),
            cache,
            ttl,
            download_count: 0,
        })
    }

    pub fn report_url(&self, id: u32) -> String {
        format!("{}report{id}.txt", self.base_url)
    }

    pub fn download_count(&self) -> usize {
        self.download_count
    }

    fn download(&mut self, id: u32) -> Result<String> {
        let url = self.report_url(id);
        debug!("downloading report {id} from {url}");
        self.download_count += 1;
        let response = self
            .client
            .get(&url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .with_context(|| format!("failed to download report {id}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("failed to download report {id}: HTTP {status}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body of report {id}"))?;
        Ok(decode_body(id, &bytes))
    }
}

/// The body as text. Titles are UTF-8 on the wiki side, so bytes that are not get replaced
/// and the substitution is logged.
fn decode_body(id: u32, bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(error) => {
            warn!("report {id} is not valid UTF-8 ({error}), invalid bytes were replaced");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

impl ReportSource for ReportFetcher {
    fn fetch_report(&mut self, id: u32, prefix: Option<&str>) -> Result<HashSet<Title>> {
        let key = CacheKey::report(id);
        let body = match self.cache.load(&key, self.ttl) {
            Some(body) => body,
            None => {
                let body = self.download(id)?;
                self.cache.store(&key, &body)?;
                body
            }
        };
        Ok(parse_report(&body, prefix))
    }
}

/// Split a raw report body into titles. Blank lines are skipped.
pub fn parse_report(body: &str, prefix: Option<&str>) -> HashSet<Title> {
    let prefix = prefix.unwrap_or_default();
    body.trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Title::new(format!("{prefix}{}", line.replace('_', " "))))
        .collect()
}
