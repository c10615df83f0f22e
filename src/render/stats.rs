//! Per-frame summary statistics.

use nexrad_model::data::{MomentValue, Sweep};
use serde::{Deserialize, Serialize};

/// Reflectivity thresholds (dBZ) counted in [`FrameStats`].
pub const SEVERITY_THRESHOLDS_DBZ: [f32; 3] = [30.0, 50.0, 60.0];

/// Scalar summary of one rendered frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Maximum reflectivity in dBZ
    pub max_reflectivity: Option<f32>,
    /// Gates at or above 30 dBZ
    pub gates_above_30: u32,
    /// Gates at or above 50 dBZ
    pub gates_above_50: u32,
    /// Gates at or above 60 dBZ
    pub gates_above_60: u32,
    /// Strongest inbound velocity in m/s (positive magnitude)
    pub max_inbound: Option<f32>,
    /// Strongest outbound velocity in m/s
    pub max_outbound: Option<f32>,
    /// Volume coverage pattern
    pub vcp: u16,
    /// Elevation angle in degrees
    pub elevation_angle: f32,
    /// Radials in the sweep
    pub radial_count: usize,
    /// Rasterize and encode time in milliseconds
    pub render_ms: f64,
}

impl FrameStats {
    /// Summarize both moments of a sweep.
    pub fn from_sweep(sweep: &Sweep, vcp: u16, elevation_angle: f32) -> Self {
        let mut stats = Self {
            vcp,
            elevation_angle,
            radial_count: sweep.radials().len(),
            ..Default::default()
        };

        for radial in sweep.radials() {
            if let Some(moment) = radial.reflectivity() {
                for value in moment.iter() {
                    if let MomentValue::Value(dbz) = value {
                        stats.max_reflectivity = Some(stats.max_reflectivity.map_or(dbz, |m| m.max(dbz)));
                        stats.gates_above_30 += (dbz >= SEVERITY_THRESHOLDS_DBZ[0]) as u32;
                        stats.gates_above_50 += (dbz >= SEVERITY_THRESHOLDS_DBZ[1]) as u32;
                        stats.gates_above_60 += (dbz >= SEVERITY_THRESHOLDS_DBZ[2]) as u32;
                    }
                }
            }

            if let Some(moment) = radial.velocity() {
                for value in moment.iter() {
                    if let MomentValue::Value(v) = value {
                        if v < 0.0 {
                            stats.max_inbound = Some(stats.max_inbound.map_or(-v, |m| m.max(-v)));
                        } else if v > 0.0 {
                            stats.max_outbound = Some(stats.max_outbound.map_or(v, |m| m.max(v)));
                        }
                    }
                }
            }
        }

        stats
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("VCP {}", self.vcp), format!("{:.1}°", self.elevation_angle)];
        if let Some(max) = self.max_reflectivity {
            parts.push(format!("max {:.0} dBZ", max));
        }
        if self.gates_above_50 > 0 {
            parts.push(format!("{} gates ≥50 dBZ", self.gates_above_50));
        }
        if let (Some(inbound), Some(outbound)) = (self.max_inbound, self.max_outbound) {
            parts.push(format!("vel -{:.0}/+{:.0} m/s", inbound, outbound));
        }
        parts.join(" · ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_stats_from_sweep() {
        let sweep = Sweep::new(
            1,
            vec![
                fixtures::radial(
                    0.0,
                    1,
                    0.5,
                    &[Some(20.0), Some(55.0), None],
                    Some(&[Some(-20.0), Some(12.5), None][..]),
                ),
                fixtures::radial(
                    1.0,
                    1,
                    0.5,
                    &[Some(62.0), Some(31.0), Some(5.0)],
                    Some(&[Some(-31.0), Some(0.0), None][..]),
                ),
            ],
        );
        let stats = FrameStats::from_sweep(&sweep, 212, 0.5);

        assert_eq!(stats.max_reflectivity, Some(62.0));
        assert_eq!(stats.gates_above_30, 3);
        assert_eq!(stats.gates_above_50, 2);
        assert_eq!(stats.gates_above_60, 1);
        assert_eq!(stats.max_inbound, Some(31.0));
        assert_eq!(stats.max_outbound, Some(12.5));
        assert_eq!(stats.radial_count, 2);
        assert!(stats.summary().contains("max 62 dBZ"));
    }

    #[test]
    fn test_stats_empty_sweep() {
        let stats = FrameStats::from_sweep(&Sweep::new(1, Vec::new()), 35, 1.5);
        assert_eq!(stats.max_reflectivity, None);
        assert_eq!(stats.summary(), "VCP 35 · 1.5°");
    }
}
