//! Level-2 volume parsing.
//!
//! Turns a raw archive buffer into a [`ParsedVolume`]: the decoded scan plus the
//! metadata rendering needs (site, VCP, elevation list, supplemental sweeps and
//! antenna position). Decoding failures never surface partial results; the
//! caller gets `None` and skips the frame.

use nexrad_data::volume::{File, Header};
use nexrad_model::data::{Scan, Sweep};
use nexrad_model::meta::registry;
use std::collections::BTreeMap;
use web_time::Instant;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// True when the buffer starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Elevation angle rounded to tenths of a degree, as an integer key.
fn angle_key(angle: f32) -> i32 {
    (angle * 10.0).round() as i32
}

/// One entry of a volume's public elevation list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationEntry {
    /// Elevation angle rounded to 0.1°
    pub angle: f32,
    /// Canonical elevation number for this angle
    pub elevation_number: u8,
}

/// Supplemental low-level sweep layout of a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SailsInfo {
    /// Sweeps at the lowest angle; 1 means no supplemental sweeps
    pub sweep_count: usize,
    /// Elevation numbers at the lowest angle, ascending
    pub elevation_numbers: Vec<u8>,
}

impl Default for SailsInfo {
    fn default() -> Self {
        Self {
            sweep_count: 1,
            elevation_numbers: Vec::new(),
        }
    }
}

/// Group elevation-number/angle pairs by rounded angle and report the lowest group.
pub fn detect_sails_elevations(pairs: &[(u8, f32)]) -> SailsInfo {
    let mut groups: BTreeMap<i32, Vec<u8>> = BTreeMap::new();
    for &(number, angle) in pairs {
        groups.entry(angle_key(angle)).or_default().push(number);
    }

    let Some((_, numbers)) = groups.into_iter().next() else {
        return SailsInfo::default();
    };

    let mut numbers = numbers;
    numbers.sort_unstable();
    numbers.dedup();

    SailsInfo {
        sweep_count: numbers.len().max(1),
        elevation_numbers: numbers,
    }
}

/// A decoded volume together with its rendering metadata.
///
/// Owned by a single render worker's parsed cache.
#[derive(Debug)]
pub struct ParsedVolume {
    scan: Scan,
    /// Four-letter site identifier
    pub site_id: String,
    /// Volume coverage pattern number
    pub vcp: u16,
    /// Elevations ordered by first appearance, deduplicated by rounded angle
    pub elevations: Vec<ElevationEntry>,
    /// Canonical elevation number -> additional elevation numbers at the same angle
    supplemental: BTreeMap<u8, Vec<u8>>,
    /// Supplemental low-level sweep layout
    pub sails: SailsInfo,
    /// Antenna latitude in degrees
    pub site_lat: f32,
    /// Antenna longitude in degrees
    pub site_lon: f32,
    /// Volume start in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl ParsedVolume {
    /// Build the metadata for an already decoded scan.
    ///
    /// `site_id` and `timestamp_ms` come from the archive header when present.
    /// Returns `None` when the scan has no usable elevation.
    pub fn from_scan(
        scan: Scan,
        site_id: Option<String>,
        timestamp_ms: Option<i64>,
        fallback_coords: Option<(f32, f32)>,
    ) -> Option<Self> {
        let mut elevations = Vec::new();
        let mut canonical_by_angle: BTreeMap<i32, u8> = BTreeMap::new();
        let mut supplemental: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut pairs = Vec::new();

        for sweep in scan.sweeps() {
            let Some(first) = sweep.radials().first() else {
                continue;
            };
            let number = sweep.elevation_number();
            if pairs.iter().any(|(n, _)| *n == number) {
                continue;
            }
            let angle = first.elevation_angle_degrees();
            pairs.push((number, angle));

            let key = angle_key(angle);
            match canonical_by_angle.get(&key) {
                Some(canonical) => supplemental.entry(*canonical).or_default().push(number),
                None => {
                    canonical_by_angle.insert(key, number);
                    elevations.push(ElevationEntry {
                        angle: key as f32 / 10.0,
                        elevation_number: number,
                    });
                }
            }
        }

        if elevations.is_empty() {
            return None;
        }

        let site_id = site_id
            .filter(|s| !s.trim().is_empty())
            .or_else(|| scan.site().map(|s| s.identifier_string()))
            .unwrap_or_default()
            .trim()
            .to_string();

        let (site_lat, site_lon) = scan
            .site()
            .map(|s| (s.latitude(), s.longitude()))
            .filter(|(lat, lon)| *lat != 0.0 && *lon != 0.0)
            .or(fallback_coords)
            .or_else(|| registry::site_by_id(&site_id).map(|e| (e.latitude, e.longitude)))
            .unwrap_or((0.0, 0.0));

        let timestamp_ms = timestamp_ms
            .or_else(|| {
                scan.sweeps()
                    .iter()
                    .filter_map(|s| s.radials().first())
                    .map(|r| r.collection_timestamp())
                    .min()
            })
            .unwrap_or(0);

        Some(Self {
            vcp: scan.coverage_pattern_number().number(),
            sails: detect_sails_elevations(&pairs),
            scan,
            site_id,
            elevations,
            supplemental,
            site_lat,
            site_lon,
            timestamp_ms,
        })
    }

    /// The decoded scan.
    pub fn scan(&self) -> &Scan {
        &self.scan
    }

    /// Additional elevation numbers sharing the canonical number's angle.
    pub fn supplemental_for(&self, canonical: u8) -> &[u8] {
        self.supplemental
            .get(&canonical)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Elevation number to render for a public elevation index and optional sweep index.
    ///
    /// A sweep index only applies to the lowest-angle elevation, where supplemental
    /// sweeps live.
    pub fn elevation_number_for(&self, elevation_index: usize, sweep_index: Option<u8>) -> Option<u8> {
        let entry = self.elevations.get(elevation_index)?;
        if let Some(index) = sweep_index {
            if self.sails.elevation_numbers.first() == Some(&entry.elevation_number) {
                if let Some(number) = self.sails.elevation_numbers.get(index as usize) {
                    return Some(*number);
                }
            }
        }
        Some(entry.elevation_number)
    }

    /// The sweep recorded under an elevation number, if it holds radials.
    pub fn sweep_by_number(&self, elevation_number: u8) -> Option<&Sweep> {
        self.scan
            .sweeps()
            .iter()
            .find(|s| s.elevation_number() == elevation_number && !s.radials().is_empty())
    }

    /// The sweep for a public elevation index and optional sweep index.
    pub fn sweep_for(&self, elevation_index: usize, sweep_index: Option<u8>) -> Option<&Sweep> {
        self.sweep_by_number(self.elevation_number_for(elevation_index, sweep_index)?)
    }

    /// Highest elevation number present in the volume.
    pub fn max_elevation_number(&self) -> u8 {
        self.scan
            .sweeps()
            .iter()
            .map(Sweep::elevation_number)
            .max()
            .unwrap_or(0)
    }
}

/// Site ICAO and volume start time (epoch ms) from the Archive II header.
fn header_fields(file: &File) -> (Option<String>, Option<i64>) {
    match file.header() {
        Some(header) => (
            header
                .icao_of_radar()
                .map(|icao| icao.trim_matches(char::from(0)).trim().to_string())
                .filter(|icao| !icao.is_empty()),
            header.date_time().map(|dt| dt.timestamp_millis()),
        ),
        None => (None, None),
    }
}

/// Decompress (when gzipped) and decode an archive buffer.
///
/// Returns `None` when the buffer cannot be decoded or has no elevations.
pub fn parse_volume(data: &[u8], fallback_coords: Option<(f32, f32)>) -> Option<ParsedVolume> {
    let start = Instant::now();

    let file = match File::new(data.to_vec()).decompress() {
        Ok(file) => file,
        Err(e) => {
            log::warn!("Failed to gunzip volume ({} bytes): {}", data.len(), e);
            return None;
        }
    };

    if file.data().len() <= std::mem::size_of::<Header>() {
        log::warn!("Volume too short to decode ({} bytes)", file.data().len());
        return None;
    }

    let (site_id, timestamp_ms) = header_fields(&file);

    let scan = match file.scan() {
        Ok(scan) => scan,
        Err(e) => {
            log::warn!("Failed to decode volume ({} bytes): {}", data.len(), e);
            return None;
        }
    };

    let parsed = ParsedVolume::from_scan(scan, site_id, timestamp_ms, fallback_coords);
    match &parsed {
        Some(volume) => log::debug!(
            "Parsed {} volume: VCP {}, {} elevations, {} SAILS sweeps in {:.1}ms",
            volume.site_id,
            volume.vcp,
            volume.elevations.len(),
            volume.sails.sweep_count,
            start.elapsed().as_secs_f64() * 1000.0
        ),
        None => log::warn!("Volume decoded without any elevations"),
    }
    parsed
}
