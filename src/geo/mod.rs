//! Geographic registration of rendered frames on a Mercator map.

mod bounds;

pub use bounds::{compute_radar_bounds, naive_bounds, RadarBounds};
