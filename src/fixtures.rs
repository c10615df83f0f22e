//! Synthetic volumes for unit tests.

use nexrad_model::data::{
    MomentData, PulseWidth, Radial, RadialStatus, Scan, Sweep, VolumeCoveragePattern,
};
use nexrad_model::meta::Site;

/// First gate inner edge used by synthetic radials, in meters.
pub const FIRST_GATE_M: u16 = 2000;
/// Gate spacing used by synthetic radials, in meters.
pub const GATE_M: u16 = 1000;

/// Encode dBZ values with the standard reflectivity scale (2.0) and offset (66.0).
pub fn reflectivity_moment(values: &[Option<f32>]) -> MomentData {
    let raw = values
        .iter()
        .map(|v| match v {
            Some(dbz) => (dbz * 2.0 + 66.0).round().clamp(2.0, 255.0) as u8,
            None => 0,
        })
        .collect::<Vec<u8>>();
    MomentData::from_fixed_point(raw.len() as u16, FIRST_GATE_M, GATE_M, 8, 2.0, 66.0, raw)
}

/// Encode m/s values with the standard velocity scale (2.0) and offset (129.0).
pub fn velocity_moment(values: &[Option<f32>]) -> MomentData {
    let raw = values
        .iter()
        .map(|v| match v {
            Some(ms) => (ms * 2.0 + 129.0).round().clamp(2.0, 255.0) as u8,
            None => 0,
        })
        .collect::<Vec<u8>>();
    MomentData::from_fixed_point(raw.len() as u16, FIRST_GATE_M, GATE_M, 8, 2.0, 129.0, raw)
}

/// One radial carrying reflectivity and optionally velocity.
pub fn radial(
    azimuth: f32,
    elevation_number: u8,
    elevation_angle: f32,
    reflectivity: &[Option<f32>],
    velocity: Option<&[Option<f32>]>,
) -> Radial {
    Radial::new(
        1_369_080_236_000,
        0,
        azimuth,
        1.0,
        RadialStatus::IntermediateRadialData,
        elevation_number,
        elevation_angle,
        Some(reflectivity_moment(reflectivity)),
        velocity.map(velocity_moment),
        None,
        None,
        None,
        None,
        None,
    )
}

/// A full sweep of `count` evenly spaced radials, all with the same gates.
pub fn uniform_sweep(
    elevation_number: u8,
    elevation_angle: f32,
    count: usize,
    reflectivity: &[Option<f32>],
) -> Sweep {
    let spacing = 360.0 / count as f32;
    let radials = (0..count)
        .map(|i| {
            radial(
                i as f32 * spacing,
                elevation_number,
                elevation_angle,
                reflectivity,
                Some(reflectivity),
            )
        })
        .collect();
    Sweep::new(elevation_number, radials)
}

fn coverage_pattern(number: u16) -> VolumeCoveragePattern {
    VolumeCoveragePattern::new(
        number,
        1,
        0.5,
        PulseWidth::Short,
        false,
        0,
        false,
        0,
        false,
        false,
        0,
        false,
        false,
        Vec::new(),
    )
}

/// A scan for VCP 212 with the given sweeps and no site block.
pub fn scan(sweeps: Vec<Sweep>) -> Scan {
    Scan::new(coverage_pattern(212), sweeps)
}

/// A scan whose site block reports the given antenna position.
pub fn scan_with_site(sweeps: Vec<Sweep>, lat: f32, lon: f32) -> Scan {
    Scan::with_site(
        Site::new(*b"KTLX", lat, lon, 370, 20),
        coverage_pattern(212),
        sweeps,
    )
}
