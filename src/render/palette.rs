//! Color tables for radar products.
//!
//! Tables are ascending lists of value -> color breakpoints. Gradient segments in
//! imported tables are expanded into 1-unit steps with rounded channels, so gate
//! values that differ by less than a unit resolve to byte-identical colors and
//! the direct rasterizer can batch them into one fill.

use super::Product;
use crate::error::{ReplayError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Straight (non-premultiplied) RGBA bytes.
pub type Rgba = [u8; 4];

/// NWS-style reflectivity table in the import format.
const NWS_REFLECTIVITY: &str = "\
product: BR
units: dBZ
; step colors blend across each 5 dBZ band
Color: 5 4 233 231
Color: 10 1 159 244
Color: 15 3 0 244
Color: 20 2 253 2
Color: 25 1 197 1
Color: 30 0 142 0
Color: 35 253 248 2
Color: 40 229 188 0
Color: 45 253 149 0
Color: 50 253 0 0
Color: 55 212 0 0
Color: 60 188 0 0
Color: 65 248 0 253
Color: 70 152 84 198
SolidColor: 75 253 253 253
";

/// Base velocity table in m/s, inbound negative.
const NWS_VELOCITY: &str = "\
product: BV
units: m/s
Color: -64 130 0 180
Color: -50 0 255 0
Color: -25 0 130 0
Color: -1 110 140 110
SolidColor: 0 130 130 130
Color: 1 140 110 110
Color: 25 130 0 0
Color: 50 255 0 0
Color: 64 255 180 200
SolidColor: 100 255 180 200
";

/// One breakpoint of a color table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub value: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Opacity in 0..=1
    pub a: f32,
}

impl ColorStop {
    pub fn new(value: f32, r: u8, g: u8, b: u8, a: f32) -> Self {
        Self {
            value,
            r,
            g,
            b,
            a: a.clamp(0.0, 1.0),
        }
    }

    pub fn rgba(&self) -> Rgba {
        [self.r, self.g, self.b, alpha_byte(self.a)]
    }
}

fn alpha_byte(a: f32) -> u8 {
    (a.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// An ascending list of color stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorTable {
    pub name: String,
    stops: Vec<ColorStop>,
}

impl ColorTable {
    /// Sort the stops and reject tables with fewer than two distinct values.
    pub fn new(name: impl Into<String>, mut stops: Vec<ColorStop>) -> Result<Self> {
        if stops.iter().any(|s| !s.value.is_finite()) {
            return Err(ReplayError::Palette("non-finite stop value".into()));
        }
        stops.sort_by(|a, b| a.value.total_cmp(&b.value));
        stops.dedup_by(|later, earlier| later.value == earlier.value);
        if stops.len() < 2 {
            return Err(ReplayError::Palette(format!(
                "table needs at least 2 stops, found {}",
                stops.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            stops,
        })
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Built-in table for a product.
    pub fn builtin(product: Product) -> Self {
        let (name, text) = match product {
            Product::Reflectivity => ("NWS Reflectivity", NWS_REFLECTIVITY),
            Product::Velocity => ("NWS Velocity", NWS_VELOCITY),
        };
        match parse_color_table(text) {
            Ok(mut table) => {
                table.name = name.to_string();
                table
            }
            Err(e) => {
                log::error!("Built-in {} table failed to parse: {}", name, e);
                Self {
                    name: name.to_string(),
                    stops: vec![
                        ColorStop::new(0.0, 0, 0, 0, 0.0),
                        ColorStop::new(1.0, 255, 255, 255, 1.0),
                    ],
                }
            }
        }
    }

    /// Index of the highest stop whose value is <= `value`.
    fn floor_index(&self, value: f32) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        self.stops
            .partition_point(|s| s.value <= value)
            .checked_sub(1)
    }
}

/// Step lookup: the color of the highest stop at or below `value`.
///
/// `None` below the first stop.
pub fn value_to_color(table: &ColorTable, value: f32) -> Option<Rgba> {
    table.floor_index(value).map(|i| table.stops[i].rgba())
}

/// Interpolated lookup between the bracketing stops.
///
/// `None` below the first stop; clamps to the last stop's exact color at or above it.
pub fn value_to_rgba(table: &ColorTable, value: f32) -> Option<Rgba> {
    let index = table.floor_index(value)?;
    let lo = &table.stops[index];
    let Some(hi) = table.stops.get(index + 1) else {
        return Some(lo.rgba());
    };

    let t = (value - lo.value) / (hi.value - lo.value);
    let lerp = |a: u8, b: u8| channel(a as f32 + (b as f32 - a as f32) * t);
    Some([
        lerp(lo.r, hi.r),
        lerp(lo.g, hi.g),
        lerp(lo.b, hi.b),
        alpha_byte(lo.a + (hi.a - lo.a) * t),
    ])
}

#[derive(Debug, Clone, Copy)]
struct Breakpoint {
    value: f32,
    rgb: [f32; 3],
    a: f32,
    solid: bool,
}

/// Parse a breakpoint-list color table.
///
/// Recognized directives are `Color:`, `Color4:`, `SolidColor:` and `SolidColor4:`
/// followed by `value r g b [a]`. Alpha above 1 is read on a 0-255 scale. Other
/// `key: value` headers and `;`/`#` comments are ignored.
pub fn parse_color_table(text: &str) -> Result<ColorTable> {
    let mut points = Vec::new();
    let mut name = String::from("Imported");

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let Some((directive, rest)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_ascii_lowercase();
        let (solid, with_alpha) = match directive.as_str() {
            "color" => (false, false),
            "color4" => (false, true),
            "solidcolor" => (true, false),
            "solidcolor4" => (true, true),
            "product" => {
                name = rest.trim().to_string();
                continue;
            }
            _ => continue,
        };

        let numbers = rest
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| ReplayError::Palette(format!("line {}: {}", line_no + 1, e)))?;

        let needed = if with_alpha { 5 } else { 4 };
        if numbers.len() < needed {
            return Err(ReplayError::Palette(format!(
                "line {}: expected {} numbers, found {}",
                line_no + 1,
                needed,
                numbers.len()
            )));
        }

        let a = if with_alpha {
            let a = numbers[4];
            if a > 1.0 {
                a / 255.0
            } else {
                a
            }
        } else {
            1.0
        };
        points.push(Breakpoint {
            value: numbers[0],
            rgb: [numbers[1], numbers[2], numbers[3]],
            a: a.clamp(0.0, 1.0),
            solid,
        });
    }

    points.sort_by(|a, b| a.value.total_cmp(&b.value));
    ColorTable::new(name, expand_gradients(&points))
}

/// Expand gradient breakpoints into 1-unit steps toward the next breakpoint.
fn expand_gradients(points: &[Breakpoint]) -> Vec<ColorStop> {
    let mut stops = Vec::new();

    for (i, point) in points.iter().enumerate() {
        let next = points.get(i + 1);
        match next {
            Some(next) if !point.solid && next.value > point.value => {
                let span = next.value - point.value;
                let mut step = 0u32;
                loop {
                    let value = point.value + step as f32;
                    if value >= next.value {
                        break;
                    }
                    let t = (value - point.value) / span;
                    let mix = |k: usize| point.rgb[k] + (next.rgb[k] - point.rgb[k]) * t;
                    stops.push(ColorStop::new(
                        value,
                        channel(mix(0)),
                        channel(mix(1)),
                        channel(mix(2)),
                        point.a + (next.a - point.a) * t,
                    ));
                    step += 1;
                }
            }
            _ => stops.push(ColorStop::new(
                point.value,
                channel(point.rgb[0]),
                channel(point.rgb[1]),
                channel(point.rgb[2]),
                point.a,
            )),
        }
    }

    stops
}

/// Active color table per product, with a version bumped on every edit.
///
/// Cache keys embed the version so frames rendered with an older table are
/// never served after an edit.
#[derive(Debug, Clone)]
pub struct PaletteRegistry {
    tables: HashMap<Product, Arc<ColorTable>>,
    version: u64,
}

impl Default for PaletteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PaletteRegistry {
    pub fn new() -> Self {
        let tables = [Product::Reflectivity, Product::Velocity]
            .into_iter()
            .map(|p| (p, Arc::new(ColorTable::builtin(p))))
            .collect();
        Self { tables, version: 1 }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn table(&self, product: Product) -> Arc<ColorTable> {
        self.tables
            .get(&product)
            .cloned()
            .unwrap_or_else(|| Arc::new(ColorTable::builtin(product)))
    }

    /// Replace a product's table. Returns the new version.
    pub fn set_table(&mut self, product: Product, table: ColorTable) -> u64 {
        self.tables.insert(product, Arc::new(table));
        self.version += 1;
        log::info!("Palette for {} updated, version {}", product, self.version);
        self.version
    }

    /// Import a table from text and make it active.
    pub fn import(&mut self, product: Product, text: &str) -> Result<u64> {
        let table = parse_color_table(text)?;
        Ok(self.set_table(product, table))
    }

    /// Restore the built-in table.
    pub fn reset(&mut self, product: Product) -> u64 {
        self.set_table(product, ColorTable::builtin(product))
    }
}
