//! Geographic placement of rendered frames.
//!
//! A frame is a planar raster centered on the radar. Placing it on a Web
//! Mercator map with symmetric degree offsets pushes it visibly north, since
//! Mercator stretches higher latitudes more. The north and south edges are
//! therefore shifted in Mercator space so their midpoint lands on the site.

use geo_types::{Coord, Rect};
use std::f64::consts::FRAC_PI_4;

/// Kilometers per degree of latitude.
const KM_PER_DEG_LAT: f64 = 111.32;

/// Web Mercator latitude limit in degrees.
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Corner coordinates of a frame, x = longitude and y = latitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarBounds {
    pub top_left: Coord<f64>,
    pub top_right: Coord<f64>,
    pub bottom_right: Coord<f64>,
    pub bottom_left: Coord<f64>,
}

impl RadarBounds {
    fn from_edges(north: f64, south: f64, west: f64, east: f64) -> Self {
        Self {
            top_left: Coord { x: west, y: north },
            top_right: Coord { x: east, y: north },
            bottom_right: Coord { x: east, y: south },
            bottom_left: Coord { x: west, y: south },
        }
    }

    pub fn north(&self) -> f64 {
        self.top_left.y
    }

    pub fn south(&self) -> f64 {
        self.bottom_left.y
    }

    pub fn west(&self) -> f64 {
        self.top_left.x
    }

    pub fn east(&self) -> f64 {
        self.top_right.x
    }

    /// Corners clockwise from the top left, as map layers expect them.
    pub fn corners(&self) -> [Coord<f64>; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(self.bottom_left, self.top_right)
    }
}

fn lat_to_mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (FRAC_PI_4 + lat / 2.0).tan().ln()
}

fn mercator_y_to_lat(y: f64) -> f64 {
    (2.0 * y.exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees()
}

fn degree_offsets(lat: f64, range_km: f64) -> (f64, f64) {
    let lat_offset = range_km / KM_PER_DEG_LAT;
    let cos_lat = lat.to_radians().cos().max(1e-6);
    let lon_offset = range_km / (KM_PER_DEG_LAT * cos_lat);
    (lat_offset, lon_offset)
}

/// Symmetric degree offsets around the site, without Mercator correction.
pub fn naive_bounds(lat: f64, lon: f64, range_km: f64) -> RadarBounds {
    let (lat_offset, lon_offset) = degree_offsets(lat, range_km);
    RadarBounds::from_edges(
        lat + lat_offset,
        lat - lat_offset,
        lon - lon_offset,
        lon + lon_offset,
    )
}

/// Bounds of a frame covering `range_km` around the site, corrected for Mercator.
pub fn compute_radar_bounds(lat: f64, lon: f64, range_km: f64) -> RadarBounds {
    let naive = naive_bounds(lat, lon, range_km);

    let north_y = lat_to_mercator_y(naive.north());
    let south_y = lat_to_mercator_y(naive.south());
    let shift = lat_to_mercator_y(lat) - (north_y + south_y) / 2.0;

    RadarBounds::from_edges(
        mercator_y_to_lat(north_y + shift),
        mercator_y_to_lat(south_y + shift),
        naive.west(),
        naive.east(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equator_is_symmetric() {
        let bounds = compute_radar_bounds(0.0, 10.0, 230.0);
        assert!((bounds.north() + bounds.south()).abs() < 1e-9);
        assert!((bounds.west() - 10.0 + bounds.east() - 10.0).abs() < 1e-9);
        let naive = naive_bounds(0.0, 10.0, 230.0);
        assert!((bounds.north() - naive.north()).abs() < 1e-9);
    }

    #[test]
    fn test_mid_latitude_correction_scales_with_range() {
        let shift = |range_km| {
            let corrected = compute_radar_bounds(45.0, -97.0, range_km);
            let naive = naive_bounds(45.0, -97.0, range_km);
            naive.north() - corrected.north()
        };
        let near = shift(100.0);
        let far = shift(460.0);
        assert!(near > 0.0);
        assert!(far > near);
    }

    #[test]
    fn test_site_is_mercator_midpoint() {
        let bounds = compute_radar_bounds(35.333, -97.278, 460.0);
        let mid = (lat_to_mercator_y(bounds.north()) + lat_to_mercator_y(bounds.south())) / 2.0;
        assert!((mid - lat_to_mercator_y(35.333)).abs() < 1e-9);
        assert!(((bounds.east() + bounds.west()) / 2.0 + 97.278).abs() < 1e-9);
    }

    #[test]
    fn test_corner_order() {
        let bounds = compute_radar_bounds(35.0, -97.0, 100.0);
        let [tl, tr, br, bl] = bounds.corners();
        assert!(tl.y > bl.y && tl.x < tr.x);
        assert_eq!(tr.x, br.x);
        let rect = bounds.to_rect();
        assert_eq!(rect.min(), bl);
        assert_eq!(rect.max(), tr);
    }
}
