//! NEXRAD data integration module.
//!
//! This module provides functionality for:
//! - Listing and downloading archival Level-2 volumes from the public bucket
//! - Decoding volumes into sweeps with elevation and SAILS metadata

mod archive_index;
mod download;
mod types;
mod volume;

pub use archive_index::{
    is_metadata_object, listing_prefix, parse_list_response, parse_scan_timestamp,
    scans_from_objects, ArchiveIndex, ListPage, ListedObject,
};
pub use download::{ArchiveSource, MemoryArchive, S3ArchiveSource};
pub use types::ScanFile;
pub use volume::{
    detect_sails_elevations, is_gzip, parse_volume, ElevationEntry, ParsedVolume, SailsInfo,
};
