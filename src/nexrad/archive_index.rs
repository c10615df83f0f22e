//! Archive bucket listings.
//!
//! Parses S3 `ListObjectsV2` responses into [`ScanFile`]s and caches listings by
//! site/date so repeated event loads do not hit the bucket again. Listings for
//! today's date are refreshed since new volumes may still arrive.

use super::types::ScanFile;
use crate::error::{ReplayError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// One object from a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    /// Token for the next page when the listing is truncated
    pub next_token: Option<String>,
}

/// Object prefix for a site's volumes on one UTC date: "YYYY/MM/DD/SITE/".
pub fn listing_prefix(site: &str, date: NaiveDate) -> String {
    format!("{}/{}/", date.format("%Y/%m/%d"), site.to_uppercase())
}

/// Parse a `ListObjectsV2` XML response.
pub fn parse_list_response(xml: &str) -> Result<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut page = ListPage::default();
    let mut truncated = false;
    let mut element = Vec::new();
    let mut key: Option<String> = None;
    let mut size: u64 = 0;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                element = e.name().as_ref().to_vec();
                if element == b"Contents" {
                    key = None;
                    size = 0;
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ReplayError::Listing(e.to_string()))?;
                match element.as_slice() {
                    b"Key" => key = Some(text.into_owned()),
                    b"Size" => size = text.parse().unwrap_or(0),
                    b"IsTruncated" => truncated = text.as_ref() == "true",
                    b"NextContinuationToken" => page.next_token = Some(text.into_owned()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Contents" {
                    if let Some(key) = key.take() {
                        page.objects.push(ListedObject { key, size });
                    }
                }
                element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ReplayError::Listing(format!(
                    "XML error at position {}: {:?}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !truncated {
        page.next_token = None;
    }
    Ok(page)
}

/// Metadata-only objects carry no radials.
pub fn is_metadata_object(name: &str) -> bool {
    name.ends_with("_MDM")
}

/// Parse the scan time from a file name of the form `SITEYYYYMMDD_HHMMSS_*`.
///
/// Returns milliseconds since the Unix epoch.
pub fn parse_scan_timestamp(name: &str) -> Option<i64> {
    let stamp = name.get(4..19)?;
    if stamp.as_bytes().get(8) != Some(&b'_') {
        return None;
    }
    let datetime = NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()?;
    Some(datetime.and_utc().timestamp_millis())
}

/// Convert listed objects into scan files, dropping metadata and unparseable names.
pub fn scans_from_objects(site: &str, objects: &[ListedObject]) -> Vec<ScanFile> {
    let mut scans: Vec<ScanFile> = objects
        .iter()
        .filter_map(|object| {
            let name = object.key.rsplit('/').next()?;
            if is_metadata_object(name) {
                return None;
            }
            let timestamp_ms = parse_scan_timestamp(name)?;
            Some(ScanFile::new(
                object.key.clone(),
                site.to_uppercase(),
                timestamp_ms,
                object.size,
            ))
        })
        .collect();
    scans.sort_by_key(|s| s.timestamp_ms);
    scans
}

/// In-memory cache for archive listings.
#[derive(Default)]
pub struct ArchiveIndex {
    listings: HashMap<(String, NaiveDate), Vec<ScanFile>>,
}

impl ArchiveIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing for this site/date. Today's listings are never served.
    pub fn get(&self, site: &str, date: NaiveDate) -> Option<&Vec<ScanFile>> {
        if date >= chrono::Utc::now().date_naive() {
            return None;
        }
        self.listings.get(&(site.to_uppercase(), date))
    }

    pub fn insert(&mut self, site: &str, date: NaiveDate, scans: Vec<ScanFile>) {
        log::debug!("Cached archive listing for {}/{} ({} scans)", site, date, scans.len());
        self.listings.insert((site.to_uppercase(), date), scans);
    }

    pub fn clear(&mut self) {
        self.listings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>unidata-nexrad-level2</Name>
  <Prefix>2013/05/20/KTLX/</Prefix>
  <KeyCount>3</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents>
    <Key>2013/05/20/KTLX/KTLX20130520_200356_V06.gz</Key>
    <Size>9871234</Size>
  </Contents>
  <Contents>
    <Key>2013/05/20/KTLX/KTLX20130520_195910_V06.gz</Key>
    <Size>9650012</Size>
  </Contents>
  <Contents>
    <Key>2013/05/20/KTLX/KTLX20130520_200356_V06_MDM</Key>
    <Size>12000</Size>
  </Contents>
</ListBucketResult>"#;

    #[test]
    fn test_listing_prefix() {
        let date = NaiveDate::from_ymd_opt(2013, 5, 20).unwrap();
        assert_eq!(listing_prefix("ktlx", date), "2013/05/20/KTLX/");
    }

    #[test]
    fn test_parse_page() {
        let page = parse_list_response(PAGE).unwrap();
        assert_eq!(page.objects.len(), 3);
        assert_eq!(page.objects[0].size, 9_871_234);
        assert_eq!(
            page.next_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
    }

    #[test]
    fn test_last_page_has_no_token() {
        let xml = PAGE.replace("<IsTruncated>true</IsTruncated>", "<IsTruncated>false</IsTruncated>");
        assert_eq!(parse_list_response(&xml).unwrap().next_token, None);
    }

    #[test]
    fn test_malformed_listing() {
        assert!(parse_list_response("<ListBucketResult><Contents></Key>").is_err());
    }

    #[test]
    fn test_parse_scan_timestamp() {
        let ts = parse_scan_timestamp("KTLX20130520_200356_V06.gz").unwrap();
        assert_eq!(ts, 1_369_080_236_000);
        assert_eq!(parse_scan_timestamp("KTLX2013052_200356"), None);
        assert_eq!(parse_scan_timestamp("NWS_NEXRAD_NXL2"), None);
    }

    #[test]
    fn test_scans_sorted_without_metadata() {
        let page = parse_list_response(PAGE).unwrap();
        let scans = scans_from_objects("ktlx", &page.objects);
        assert_eq!(scans.len(), 2);
        assert!(scans[0].timestamp_ms < scans[1].timestamp_ms);
        assert_eq!(scans[0].file_name(), "KTLX20130520_195910_V06.gz");
        assert_eq!(scans[0].site, "KTLX");
    }

    #[test]
    fn test_index_skips_today() {
        let mut index = ArchiveIndex::new();
        let past = NaiveDate::from_ymd_opt(2013, 5, 20).unwrap();
        let today = chrono::Utc::now().date_naive();
        index.insert("KTLX", past, Vec::new());
        index.insert("KTLX", today, Vec::new());
        assert!(index.get("ktlx", past).is_some());
        assert!(index.get("KTLX", today).is_none());
    }
}
