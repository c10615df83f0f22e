//! Reverse-mapped resampling for smoothed frames.
//!
//! Every output pixel inside the radar circle is mapped back to (range, azimuth)
//! and interpolated from the surrounding gates. Null gates contribute zero
//! weight, so echoes fade out at their edges instead of dropping to a hard hole.
//! Pixels are written straight into the buffer since every pixel is visited.

use super::palette::{value_to_rgba, ColorTable};
use super::{PolarRadial, PolarSweep, RasterGeometry};
use crate::error::{ReplayError, Result};
use tiny_skia::{ColorU8, Pixmap};

/// Arc/gate aspect ratio above which extra azimuthal samples are taken.
const ELONGATION_THRESHOLD: f32 = 2.0;

/// Weighted sum of valid samples and the total weight considered.
#[derive(Debug, Clone, Copy, Default)]
struct Accum {
    value: f32,
    valid: f32,
    total: f32,
}

impl Accum {
    fn add(&mut self, value: Option<f32>, weight: f32) {
        if weight <= 0.0 {
            return;
        }
        self.total += weight;
        if let Some(v) = value {
            self.value += v * weight;
            self.valid += weight;
        }
    }

    fn merge(&mut self, other: Accum, weight: f32) {
        self.value += other.value * weight;
        self.valid += other.valid * weight;
        self.total += other.total * weight;
    }

    /// Interpolated value and the fraction of weight that was valid.
    fn resolve(&self) -> Option<(f32, f32)> {
        if self.valid <= 0.0 || self.total <= 0.0 {
            return None;
        }
        Some((self.value / self.valid, self.valid / self.total))
    }
}

/// Linear interpolation along one radial between gate centers.
fn sample_range(radial: &PolarRadial, range_km: f32, weight: f32, acc: &mut Accum) {
    let last = radial.values.len() as f32 - 1.0;
    let g = ((range_km - radial.first_gate_km) / radial.gate_km - 0.5).clamp(0.0, last.max(0.0));
    if radial.values.is_empty()
        || range_km > radial.first_gate_km + radial.gate_km * radial.values.len() as f32
    {
        acc.add(None, weight);
        return;
    }

    let g0 = g.floor() as usize;
    let frac = g - g0 as f32;
    acc.add(radial.values[g0], weight * (1.0 - frac));
    if frac > 0.0 {
        acc.add(radial.values.get(g0 + 1).copied().flatten(), weight * frac);
    }
}

/// Sorted azimuth index for bracketing lookups.
struct AzimuthIndex<'a> {
    radials: &'a [PolarRadial],
    azimuths: Vec<f32>,
}

impl<'a> AzimuthIndex<'a> {
    fn new(radials: &'a [PolarRadial]) -> Self {
        Self {
            azimuths: radials.iter().map(|r| r.azimuth).collect(),
            radials,
        }
    }

    /// Mean angular spacing between radials in degrees.
    fn mean_spacing(&self) -> f32 {
        360.0 / self.radials.len() as f32
    }

    /// Bilinear sample at (range, azimuth).
    fn sample(&self, range_km: f32, azimuth: f32) -> Accum {
        let n = self.radials.len();
        let mut acc = Accum::default();
        if n == 1 {
            sample_range(&self.radials[0], range_km, 1.0, &mut acc);
            return acc;
        }

        let azimuth = azimuth.rem_euclid(360.0);
        let upper = self.azimuths.partition_point(|a| *a <= azimuth) % n;
        let lower = (upper + n - 1) % n;

        let span = (self.azimuths[upper] - self.azimuths[lower]).rem_euclid(360.0);
        let t = if span > 0.0 {
            ((azimuth - self.azimuths[lower]).rem_euclid(360.0) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };

        sample_range(&self.radials[lower], range_km, 1.0 - t, &mut acc);
        sample_range(&self.radials[upper], range_km, t, &mut acc);
        acc
    }
}

/// Resample a sweep into the pixel buffer.
///
/// With `high`, far-range pixels whose azimuthal footprint is much longer than a
/// gate also average Gaussian-weighted samples at ±σ (and ±2σ when very
/// elongated), σ being a third of the mean radial spacing.
///
/// Returns the number of pixels written.
pub fn render_resampled(
    pixmap: &mut Pixmap,
    sweep: &PolarSweep,
    table: &ColorTable,
    geometry: &RasterGeometry,
    high: bool,
) -> Result<usize> {
    if sweep.radials.is_empty() {
        return Err(ReplayError::Render("sweep has no radials".into()));
    }

    let index = AzimuthIndex::new(&sweep.radials);
    let (cx, cy) = geometry.center();
    let scale = geometry.px_per_km();
    let blind_km = sweep.blind_range_km();
    let spacing = index.mean_spacing();
    let sigma = spacing / 3.0;
    let gate_km = sweep
        .radials
        .iter()
        .map(|r| r.gate_km)
        .fold(f32::INFINITY, f32::min);

    let width = pixmap.width() as usize;
    let pixels = pixmap.pixels_mut();
    let mut written = 0;

    for (i, pixel) in pixels.iter_mut().enumerate() {
        let dx = (i % width) as f32 + 0.5 - cx;
        let dy = (i / width) as f32 + 0.5 - cy;
        let range_km = (dx * dx + dy * dy).sqrt() / scale;
        if range_km > geometry.range_km || range_km < blind_km {
            continue;
        }
        // Clockwise from north.
        let azimuth = dx.atan2(-dy).to_degrees();

        let mut acc = index.sample(range_km, azimuth);

        if high {
            let ratio = range_km * spacing.to_radians() / gate_km;
            if ratio > ELONGATION_THRESHOLD {
                let mut offsets = vec![sigma, -sigma];
                if ratio >= 2.0 * ELONGATION_THRESHOLD {
                    offsets.extend([2.0 * sigma, -2.0 * sigma]);
                }
                for offset in offsets {
                    let weight = (-(offset * offset) / (2.0 * sigma * sigma)).exp();
                    acc.merge(index.sample(range_km, azimuth + offset), weight);
                }
            }
        }

        let Some((value, coverage)) = acc.resolve() else {
            continue;
        };
        let Some([r, g, b, a]) = value_to_rgba(table, value) else {
            continue;
        };
        let alpha = (a as f32 * coverage).round() as u8;
        if alpha == 0 {
            continue;
        }
        *pixel = ColorU8::from_rgba(r, g, b, alpha).premultiply();
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ColorStop, Rgba};

    fn ramp_table() -> ColorTable {
        ColorTable::new(
            "ramp",
            vec![
                ColorStop::new(0.0, 0, 0, 0, 1.0),
                ColorStop::new(100.0, 200, 100, 0, 1.0),
            ],
        )
        .unwrap()
    }

    fn uniform(count: usize, values: Vec<Option<f32>>) -> PolarSweep {
        let radials = (0..count)
            .map(|i| PolarRadial {
                azimuth: i as f32 * 360.0 / count as f32,
                first_gate_km: 2.0,
                gate_km: 1.0,
                values: values.clone(),
            })
            .collect();
        PolarSweep::new(1, 0.5, radials)
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> Rgba {
        let p = pixmap.pixel(x, y).unwrap().demultiply();
        [p.red(), p.green(), p.blue(), p.alpha()]
    }

    #[test]
    fn test_blind_cone_and_outside_range_are_transparent() {
        let mut pixmap = Pixmap::new(100, 100).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        render_resampled(&mut pixmap, &uniform(360, vec![Some(50.0); 8]), &ramp_table(), &geometry, false)
            .unwrap();

        assert_eq!(pixel(&pixmap, 50, 50)[3], 0);
        assert_eq!(pixel(&pixmap, 0, 0)[3], 0);
        assert_eq!(pixel(&pixmap, 50, 30), [100, 50, 0, 255]);
    }

    #[test]
    fn test_interpolates_between_gates() {
        let mut pixmap = Pixmap::new(200, 200).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        let sweep = uniform(360, vec![Some(0.0), Some(100.0), Some(100.0)]);
        render_resampled(&mut pixmap, &sweep, &ramp_table(), &geometry, false).unwrap();

        // 10 px per km; gate centers at 2.5 km and 3.5 km. Pixel center at 3.05 km.
        let c = pixel(&pixmap, 100, 69);
        assert!(c[0] > 80 && c[0] < 140, "{:?}", c);
        assert_eq!(c[3], 255);
    }

    #[test]
    fn test_null_gates_fade_alpha() {
        let mut pixmap = Pixmap::new(200, 200).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        let sweep = uniform(360, vec![Some(50.0), None, None]);
        render_resampled(&mut pixmap, &sweep, &ramp_table(), &geometry, false).unwrap();

        // Halfway between a valid and a null gate: the valid value at partial opacity.
        let c = pixel(&pixmap, 100, 69);
        assert!(c[3] > 0 && c[3] < 255, "{:?}", c);
        assert!((c[0] as i32 - 100).abs() <= 2, "{:?}", c);
        // Fully inside the null gates.
        assert_eq!(pixel(&pixmap, 100, 64)[3], 0);
    }

    #[test]
    fn test_high_smoothing_blends_azimuthally() {
        let radials: Vec<PolarRadial> = (0..8)
            .map(|i| PolarRadial {
                azimuth: i as f32 * 45.0,
                first_gate_km: 1.0,
                gate_km: 0.5,
                values: vec![Some(if i == 2 { 100.0 } else { 0.0 }); 40],
            })
            .collect();
        let sweep = PolarSweep::new(1, 0.5, radials);
        let geometry_of = |p: &Pixmap| RasterGeometry::for_pixmap(p, 20.0);

        let mut low = Pixmap::new(200, 200).unwrap();
        let low_geometry = geometry_of(&low);
        render_resampled(&mut low, &sweep, &ramp_table(), &low_geometry, false).unwrap();
        let mut high = Pixmap::new(200, 200).unwrap();
        let high_geometry = geometry_of(&high);
        render_resampled(&mut high, &sweep, &ramp_table(), &high_geometry, true).unwrap();

        // Due east sits exactly on the 100-valued radial; high mode pulls in neighbours.
        let east_low = pixel(&low, 190, 100);
        let east_high = pixel(&high, 190, 100);
        assert!(east_high[0] < east_low[0], "{:?} vs {:?}", east_high, east_low);
    }

    #[test]
    fn test_empty_sweep_errors() {
        let mut pixmap = Pixmap::new(8, 8).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        let sweep = PolarSweep::new(1, 0.5, Vec::new());
        assert!(render_resampled(&mut pixmap, &sweep, &ramp_table(), &geometry, true).is_err());
    }
}
