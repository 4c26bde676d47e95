//! Crop and scale arithmetic for video frames.
//!
//! Everything here is pure integer/float math with no I/O: callers feed in
//! detected dimensions (e.g. from ffprobe or an autocrop pass) and get back
//! rectangles that satisfy the encoder's divisibility constraints.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("Divisor must be positive, got {0}")]
    InvalidDivisor(i32),
}

/// Width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: i32,
    pub height: i32,
}

impl Dimensions {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Width over height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate<T> {
    pub x: T,
    pub y: T,
}

impl<T> Coordinate<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }
}

/// Inclusive bounds where either end may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy> Range<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        if self.min.map_or(false, |min| value < min) {
            return false;
        }
        if self.max.map_or(false, |max| value > max) {
            return false;
        }
        true
    }
}

/// A crop rectangle: top-left offset plus size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropParameters {
    pub start: Coordinate<i32>,
    pub size: Dimensions,
}

impl CropParameters {
    pub fn new(start: Coordinate<i32>, size: Dimensions) -> Self {
        Self { start, size }
    }
}

/// Nearest multiple of `divisor`, ties resolved to even so that e.g.
/// 804 with divisor 8 lands on 800 rather than 808.
fn round_to_multiple(value: f64, divisor: i32) -> i32 {
    (value / divisor as f64).round_ties_even() as i32 * divisor
}

/// Derive the final crop rectangle from a detected autocrop.
///
/// Starts from `autocrop` (or the full source frame when absent), rounds the
/// crop height to the nearest multiple of `divisor`, and re-centers: rows lost
/// to rounding move the top edge down by `ceil(delta / 2)`. The width is then
/// derived from the rounded height and `aspect_ratio`, rounded to the divisor
/// as well, and columns lost relative to the detected crop width move the left
/// edge right by `floor(delta / 2)`.
pub fn calculate_crop_parameters(
    source: Dimensions,
    autocrop: Option<CropParameters>,
    aspect_ratio: f64,
    divisor: i32,
) -> Result<CropParameters, GeometryError> {
    if divisor <= 0 {
        return Err(GeometryError::InvalidDivisor(divisor));
    }

    let crop = autocrop
        .unwrap_or_else(|| CropParameters::new(Coordinate::new(0, 0), source));

    let height = round_to_multiple(crop.size.height as f64, divisor);
    let mut top = crop.start.y;
    let height_delta = crop.size.height - height;
    if height_delta > 0 {
        top += (height_delta + 1) / 2;
    }

    let width = round_to_multiple(height as f64 * aspect_ratio, divisor);
    let mut left = crop.start.x;
    let width_delta = crop.size.width - width;
    if width_delta > 0 {
        left += width_delta / 2;
    }

    Ok(CropParameters::new(
        Coordinate::new(left, top),
        Dimensions::new(width, height),
    ))
}

/// Fit `source` into `target` bounds preserving the source aspect ratio, with
/// both output axes divisible by `divisor`.
///
/// When the target box is narrower than the source (smaller aspect ratio) the
/// width drives: the target width is rounded to the divisor and the height
/// follows from the source aspect. Otherwise the height drives symmetrically.
pub fn calculate_scaled_dimensions(
    source: Dimensions,
    target: Dimensions,
    divisor: i32,
) -> Result<Dimensions, GeometryError> {
    if divisor <= 0 {
        return Err(GeometryError::InvalidDivisor(divisor));
    }

    let source_aspect = source.aspect_ratio();

    let (width, height) = if target.aspect_ratio() < source_aspect {
        let width = round_to_multiple(target.width as f64, divisor);
        let height = round_to_multiple(width as f64 / source_aspect, divisor);
        (width, height)
    } else {
        let height = round_to_multiple(target.height as f64, divisor);
        let width = round_to_multiple(height as f64 * source_aspect, divisor);
        (width, height)
    };

    Ok(Dimensions::new(width, height))
}
