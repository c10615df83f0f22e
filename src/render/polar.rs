//! Direct scan conversion of polar radials.
//!
//! Each radial is drawn as a wedge from the midpoint with its previous neighbour
//! to the midpoint with its next one. Consecutive gates resolving to the same
//! color are merged into a single annulus sector, so a radial costs one fill per
//! color run instead of one per gate.

use super::palette::{value_to_color, ColorTable, Rgba};
use super::{PolarRadial, PolarSweep, RasterGeometry};
use crate::error::{ReplayError, Result};
use std::f32::consts::PI;
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};

/// Angular overlap added to each side of a wedge to hide seams between neighbours.
pub const ARC_OVERLAP_RAD: f32 = 0.002;

/// Maximum angle covered by one chord when approximating an arc.
const MAX_CHORD_RAD: f32 = 2.0 * PI / 180.0;

/// Start and end angle (radians, screen space, clockwise from +x) of each radial's wedge.
fn wedge_bounds(radials: &[PolarRadial]) -> Vec<(f32, f32)> {
    let n = radials.len();
    radials
        .iter()
        .enumerate()
        .map(|(i, radial)| {
            let (before, after) = if n == 1 {
                (180.0, 180.0)
            } else {
                let prev = radials[(i + n - 1) % n].azimuth;
                let next = radials[(i + 1) % n].azimuth;
                let before = (radial.azimuth - prev).rem_euclid(360.0);
                let after = (next - radial.azimuth).rem_euclid(360.0);
                (
                    if before == 0.0 { 360.0 / n as f32 } else { before },
                    if after == 0.0 { 360.0 / n as f32 } else { after },
                )
            };

            // North up: azimuth 0 points at -y.
            let center = (radial.azimuth - 90.0).to_radians();
            (
                center - (before / 2.0).to_radians() - ARC_OVERLAP_RAD,
                center + (after / 2.0).to_radians() + ARC_OVERLAP_RAD,
            )
        })
        .collect()
}

/// Append an annulus sector between two radii to the path.
///
/// Both arcs use the same angular subdivision, so runs that share a radius
/// share their edge vertices exactly.
fn push_sector(
    pb: &mut PathBuilder,
    center: (f32, f32),
    inner: f32,
    outer: f32,
    start: f32,
    end: f32,
) {
    let segments = ((end - start) / MAX_CHORD_RAD).ceil().max(1.0) as usize;
    let angle = |k: usize| start + (end - start) * k as f32 / segments as f32;
    let point = |r: f32, a: f32| (center.0 + r * a.cos(), center.1 + r * a.sin());

    let (x, y) = point(outer, angle(0));
    pb.move_to(x, y);
    for k in 1..=segments {
        let (x, y) = point(outer, angle(k));
        pb.line_to(x, y);
    }
    for k in (0..=segments).rev() {
        let (x, y) = point(inner, angle(k));
        pb.line_to(x, y);
    }
    pb.close();
}

/// Fill one run of same-colored gates.
fn flush_run(
    pixmap: &mut Pixmap,
    color: Rgba,
    center: (f32, f32),
    inner: f32,
    outer: f32,
    bounds: (f32, f32),
) {
    let mut pb = PathBuilder::new();
    push_sector(&mut pb, center, inner, outer, bounds.0, bounds.1);
    let Some(path) = pb.finish() else {
        return;
    };

    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = false;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Scan-convert a sweep with step color lookup and run batching.
///
/// Returns the number of fill operations issued.
pub fn render_direct(
    pixmap: &mut Pixmap,
    sweep: &PolarSweep,
    table: &ColorTable,
    geometry: &RasterGeometry,
) -> Result<usize> {
    if sweep.radials.is_empty() {
        return Err(ReplayError::Render("sweep has no radials".into()));
    }

    let center = geometry.center();
    let scale = geometry.px_per_km();
    let bounds = wedge_bounds(&sweep.radials);
    let mut fills = 0;

    for (radial, bounds) in sweep.radials.iter().zip(bounds) {
        // (color, inner km, outer km) of the run being accumulated
        let mut run: Option<(Rgba, f32, f32)> = None;

        for (g, value) in radial.values.iter().enumerate() {
            let inner = radial.first_gate_km + g as f32 * radial.gate_km;
            if inner >= geometry.range_km {
                break;
            }
            let outer = (inner + radial.gate_km).min(geometry.range_km);
            let color = value
                .and_then(|v| value_to_color(table, v))
                .filter(|c| c[3] > 0);

            match (run, color) {
                (Some((run_color, start, _)), Some(c)) if run_color == c => {
                    run = Some((run_color, start, outer));
                }
                (previous, next) => {
                    if let Some((c, start, end)) = previous {
                        flush_run(pixmap, c, center, start * scale, end * scale, bounds);
                        fills += 1;
                    }
                    run = next.map(|c| (c, inner, outer));
                }
            }
        }

        if let Some((c, start, end)) = run {
            flush_run(pixmap, c, center, start * scale, end * scale, bounds);
            fills += 1;
        }
    }

    Ok(fills)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ColorStop, PolarSweep};
    use std::collections::HashSet;

    fn scenario_table() -> ColorTable {
        ColorTable::new(
            "scenario",
            vec![
                ColorStop::new(0.0, 0, 0, 0, 0.0),
                ColorStop::new(10.0, 0, 255, 0, 1.0),
                ColorStop::new(45.0, 255, 0, 0, 1.0),
            ],
        )
        .unwrap()
    }

    fn two_radial_sweep() -> PolarSweep {
        let radial = |azimuth| PolarRadial {
            azimuth,
            first_gate_km: 2.0,
            gate_km: 1.0,
            values: vec![Some(10.0), Some(45.0)],
        };
        PolarSweep::new(1, 0.5, vec![radial(0.0), radial(180.0)])
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> Rgba {
        let p = pixmap.pixel(x, y).unwrap().demultiply();
        [p.red(), p.green(), p.blue(), p.alpha()]
    }

    #[test]
    fn test_wedges_cover_circle_with_overlap() {
        let sweep = two_radial_sweep();
        let bounds = wedge_bounds(&sweep.radials);
        let total: f32 = bounds.iter().map(|(s, e)| e - s).sum();
        assert!((total - (2.0 * PI + 4.0 * ARC_OVERLAP_RAD)).abs() < 1e-4);
    }

    #[test]
    fn test_two_gate_scenario_has_two_colors_and_no_holes() {
        let mut pixmap = Pixmap::new(100, 100).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 4.0);
        let fills = render_direct(&mut pixmap, &two_radial_sweep(), &scenario_table(), &geometry)
            .unwrap();
        assert_eq!(fills, 4);

        let green = [0, 255, 0, 255];
        let red = [255, 0, 0, 255];
        let mut colors = HashSet::new();
        for y in 0..100 {
            for x in 0..100 {
                let c = pixel(&pixmap, x, y);
                if c[3] > 0 {
                    colors.insert(c);
                }
            }
        }
        assert_eq!(colors, HashSet::from([green, red]));

        // 12.5 px per km: green spans 25..37.5 px, red 37.5..50 px from center.
        let scale = geometry.px_per_km();
        for step in 0..72 {
            let angle = (step as f32 * 5.0).to_radians();
            for r in [26.0, 36.0, 37.0, 38.0, 39.0, 48.0] {
                let x = (50.0 + r * angle.cos()) as u32;
                let y = (50.0 + r * angle.sin()) as u32;
                let c = pixel(&pixmap, x, y);
                let dx = x as f32 + 0.5 - 50.0;
                let dy = y as f32 + 0.5 - 50.0;
                let km = (dx * dx + dy * dy).sqrt() / scale;
                if km > 2.1 && km < 2.9 {
                    assert_eq!(c, green, "pixel ({}, {})", x, y);
                } else if km > 3.1 && km < 3.9 {
                    assert_eq!(c, red, "pixel ({}, {})", x, y);
                } else if km > 2.0 && km < 4.0 {
                    assert!(c == green || c == red, "hole at ({}, {})", x, y);
                }
            }
        }

        assert_eq!(pixel(&pixmap, 50, 50)[3], 0);
    }

    #[test]
    fn test_runs_batch_equal_colors() {
        let mut pixmap = Pixmap::new(64, 64).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        let sweep = PolarSweep::new(
            1,
            0.5,
            vec![PolarRadial {
                azimuth: 0.0,
                first_gate_km: 1.0,
                gate_km: 1.0,
                values: vec![Some(12.0), Some(13.5), Some(20.0), None, Some(50.0), Some(-3.0)],
            }],
        );
        let fills = render_direct(&mut pixmap, &sweep, &scenario_table(), &geometry).unwrap();
        assert_eq!(fills, 2);
    }

    #[test]
    fn test_empty_sweep_errors() {
        let mut pixmap = Pixmap::new(8, 8).unwrap();
        let geometry = RasterGeometry::for_pixmap(&pixmap, 10.0);
        let sweep = PolarSweep::new(1, 0.5, Vec::new());
        assert!(render_direct(&mut pixmap, &sweep, &scenario_table(), &geometry).is_err());
    }
}
