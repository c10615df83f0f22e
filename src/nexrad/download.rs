//! Archive access over HTTP.
//!
//! [`ArchiveSource`] is the seam between the prefetch pipeline and the bucket:
//! `S3ArchiveSource` talks to the public Level-2 bucket, `MemoryArchive` serves
//! fixed buffers for tests and offline use.

use super::archive_index::{listing_prefix, parse_list_response, scans_from_objects, ArchiveIndex};
use super::types::ScanFile;
use crate::error::{ReplayError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use web_time::Instant;

/// Listing and fetching of archived volumes.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// All volumes for a site on one UTC date, sorted by time.
    async fn list(&self, site: &str, date: NaiveDate) -> Result<Vec<ScanFile>>;

    /// Raw bytes of one archive object.
    async fn fetch(&self, key: &str) -> Result<Bytes>;
}

/// Public S3 bucket accessed anonymously over HTTPS.
pub struct S3ArchiveSource {
    client: reqwest::Client,
    base_url: String,
    index: Mutex<ArchiveIndex>,
}

impl S3ArchiveSource {
    pub fn new(bucket: &str, timeout: Duration) -> Result<Self> {
        Self::with_base_url(format!("https://{}.s3.amazonaws.com", bucket), timeout)
    }

    /// Use a custom endpoint (S3-compatible mirrors).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReplayError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: Mutex::new(ArchiveIndex::new()),
        })
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<String> {
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = token {
            query.push(("continuation-token", token));
        }

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplayError::Http {
                status: status.as_u16(),
                key: prefix.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl ArchiveSource for S3ArchiveSource {
    async fn list(&self, site: &str, date: NaiveDate) -> Result<Vec<ScanFile>> {
        if let Ok(index) = self.index.lock() {
            if let Some(scans) = index.get(site, date) {
                return Ok(scans.clone());
            }
        }

        let prefix = listing_prefix(site, date);
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0;

        loop {
            let xml = self.list_page(&prefix, token.as_deref()).await?;
            let page = parse_list_response(&xml)?;
            pages += 1;
            objects.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let scans = scans_from_objects(site, &objects);
        log::info!(
            "Listed {} scans for {} on {} ({} pages)",
            scans.len(),
            site,
            date,
            pages
        );

        if let Ok(mut index) = self.index.lock() {
            index.insert(site, date, scans.clone());
        }
        Ok(scans)
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let start = Instant::now();
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, key))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplayError::Http {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }

        let data = response.bytes().await?;
        log::debug!(
            "Downloaded {} ({} bytes) in {:.0}ms",
            key,
            data.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(data)
    }
}

/// Archive held in memory.
#[derive(Default)]
pub struct MemoryArchive {
    listings: HashMap<(String, NaiveDate), Vec<ScanFile>>,
    objects: HashMap<String, Bytes>,
    fetches: AtomicUsize,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume under its listing date.
    pub fn insert(&mut self, date: NaiveDate, scan: ScanFile, data: Bytes) {
        self.objects.insert(scan.key.clone(), data);
        let listing = self
            .listings
            .entry((scan.site.to_uppercase(), date))
            .or_default();
        listing.push(scan);
        listing.sort_by_key(|s| s.timestamp_ms);
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchive {
    async fn list(&self, site: &str, date: NaiveDate) -> Result<Vec<ScanFile>> {
        Ok(self
            .listings
            .get(&(site.to_uppercase(), date))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.objects.get(key).cloned().ok_or_else(|| ReplayError::Http {
            status: 404,
            key: key.to_string(),
        })
    }
}
