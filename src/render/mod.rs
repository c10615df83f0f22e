//! Polar-to-raster rendering.
//!
//! This module provides:
//! - Color tables mapping product values to RGBA
//! - Direct arc-batched scan conversion for unsmoothed frames
//! - Reverse-mapped bilinear resampling for smoothed frames
//! - Per-frame summary statistics

mod palette;
mod polar;
mod resample;
mod stats;

pub use palette::{
    parse_color_table, value_to_color, value_to_rgba, ColorStop, ColorTable, PaletteRegistry,
    Rgba,
};
pub use polar::{render_direct, ARC_OVERLAP_RAD};
pub use resample::render_resampled;
pub use stats::FrameStats;

use crate::error::{ReplayError, Result};
use nexrad_model::data::{DataMoment, MomentData, MomentValue, Radial, Sweep};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tiny_skia::Pixmap;

/// Radar product rendered into a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    Reflectivity,
    Velocity,
}

impl Product {
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Reflectivity => "reflectivity",
            Product::Velocity => "velocity",
        }
    }

    /// The moment this product reads from a radial.
    pub fn moment<'a>(&self, radial: &'a Radial) -> Option<&'a MomentData> {
        match self {
            Product::Reflectivity => radial.reflectivity(),
            Product::Velocity => radial.velocity(),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Product {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reflectivity" | "ref" | "dbz" => Ok(Product::Reflectivity),
            "velocity" | "vel" => Ok(Product::Velocity),
            other => Err(ReplayError::Config(format!("unknown product '{}'", other))),
        }
    }
}

/// Smoothing mode, which also selects the rasterization algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    /// Direct scan conversion with arc batching
    #[default]
    None,
    /// Bilinear resampling
    Low,
    /// Bilinear resampling with extra azimuthal samples at far range
    High,
}

impl Smoothing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Smoothing::None => "none",
            Smoothing::Low => "low",
            Smoothing::High => "high",
        }
    }
}

impl fmt::Display for Smoothing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Smoothing {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Smoothing::None),
            "low" => Ok(Smoothing::Low),
            "high" => Ok(Smoothing::High),
            other => Err(ReplayError::Config(format!("unknown smoothing '{}'", other))),
        }
    }
}

/// A single radial of gate values for one product.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarRadial {
    /// Azimuth angle in degrees (0 = North, clockwise)
    pub azimuth: f32,
    /// Range to the inner edge of the first gate in km
    pub first_gate_km: f32,
    /// Gate spacing in km
    pub gate_km: f32,
    /// Gate values; `None` for below-threshold or range-folded gates
    pub values: Vec<Option<f32>>,
}

/// One product of one sweep, radials sorted by azimuth.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarSweep {
    pub elevation_number: u8,
    pub elevation_angle: f32,
    pub radials: Vec<PolarRadial>,
}

impl PolarSweep {
    /// Build from explicit radials, sorting them by azimuth.
    pub fn new(elevation_number: u8, elevation_angle: f32, mut radials: Vec<PolarRadial>) -> Self {
        radials.sort_by(|a, b| a.azimuth.total_cmp(&b.azimuth));
        Self {
            elevation_number,
            elevation_angle,
            radials,
        }
    }

    /// Extract one product from a decoded sweep. `None` when no radial carries it.
    pub fn from_sweep(sweep: &Sweep, product: Product) -> Option<Self> {
        let radials: Vec<PolarRadial> = sweep
            .radials()
            .iter()
            .filter_map(|radial| {
                let moment = product.moment(radial)?;
                let values = moment
                    .iter()
                    .map(|v| match v {
                        MomentValue::Value(v) => Some(v),
                        MomentValue::BelowThreshold | MomentValue::RangeFolded => None,
                    })
                    .collect();
                Some(PolarRadial {
                    azimuth: radial.azimuth_angle_degrees().rem_euclid(360.0),
                    first_gate_km: moment.first_gate_range_km() as f32,
                    gate_km: moment.gate_interval_km() as f32,
                    values,
                })
            })
            .filter(|r| r.gate_km > 0.0 && !r.values.is_empty())
            .collect();

        if radials.is_empty() {
            return None;
        }

        let elevation_angle = sweep
            .radials()
            .first()
            .map(|r| r.elevation_angle_degrees())
            .unwrap_or(0.0);
        Some(Self::new(sweep.elevation_number(), elevation_angle, radials))
    }

    /// Nearest range with data; the blind cone lies inside it.
    pub fn blind_range_km(&self) -> f32 {
        self.radials
            .iter()
            .map(|r| r.first_gate_km)
            .fold(f32::INFINITY, f32::min)
    }
}

/// Output surface geometry shared by both rasterizers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterGeometry {
    pub width: u32,
    pub height: u32,
    /// Range mapped to half the shorter image edge
    pub range_km: f32,
}

impl RasterGeometry {
    pub fn for_pixmap(pixmap: &Pixmap, range_km: f32) -> Self {
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            range_km,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width as f32 / 2.0, self.height as f32 / 2.0)
    }

    pub fn px_per_km(&self) -> f32 {
        self.width.min(self.height) as f32 / 2.0 / self.range_km
    }
}

/// Render a sweep with the algorithm chosen by `smoothing`.
pub fn rasterize(
    pixmap: &mut Pixmap,
    sweep: &PolarSweep,
    table: &ColorTable,
    range_km: f32,
    smoothing: Smoothing,
) -> Result<()> {
    pixmap.fill(tiny_skia::Color::TRANSPARENT);
    let geometry = RasterGeometry::for_pixmap(pixmap, range_km);
    let operations = match smoothing {
        Smoothing::None => render_direct(pixmap, sweep, table, &geometry)?,
        Smoothing::Low => render_resampled(pixmap, sweep, table, &geometry, false)?,
        Smoothing::High => render_resampled(pixmap, sweep, table, &geometry, true)?,
    };
    log::trace!("Rasterized sweep {} ({}): {} operations", sweep.elevation_number, smoothing, operations);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_product_and_smoothing_parse() {
        assert_eq!("REF".parse::<Product>().unwrap(), Product::Reflectivity);
        assert_eq!("velocity".parse::<Product>().unwrap(), Product::Velocity);
        assert!("zdr".parse::<Product>().is_err());
        assert_eq!("high".parse::<Smoothing>().unwrap(), Smoothing::High);
        assert_eq!(Smoothing::default(), Smoothing::None);
        assert_eq!(Smoothing::Low.to_string(), "low");
    }

    #[test]
    fn test_polar_sweep_from_sweep() {
        let sweep = fixtures::uniform_sweep(1, 0.5, 4, &[Some(10.0), None, Some(45.0)]);
        let polar = PolarSweep::from_sweep(&sweep, Product::Reflectivity).unwrap();

        assert_eq!(polar.radials.len(), 4);
        assert_eq!(polar.elevation_number, 1);
        let radial = &polar.radials[0];
        assert_eq!(radial.values, vec![Some(10.0), None, Some(45.0)]);
        assert!((radial.first_gate_km - 2.0).abs() < 1e-6);
        assert!((radial.gate_km - 1.0).abs() < 1e-6);
        assert!((polar.blind_range_km() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_polar_sweep_sorted_by_azimuth() {
        let radial = |azimuth| PolarRadial {
            azimuth,
            first_gate_km: 1.0,
            gate_km: 1.0,
            values: vec![Some(1.0)],
        };
        let sweep = PolarSweep::new(1, 0.5, vec![radial(270.0), radial(10.0), radial(90.0)]);
        let azimuths: Vec<f32> = sweep.radials.iter().map(|r| r.azimuth).collect();
        assert_eq!(azimuths, vec![10.0, 90.0, 270.0]);
    }
}
