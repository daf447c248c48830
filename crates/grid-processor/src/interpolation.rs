//! Interpolation methods for grid resampling.
//!
//! Positions are fractional indices in cell-centre units: `(0.0, 0.0)` is the
//! centre of the top-left cell. Positions within half a cell of the outer edge
//! are clamped onto the edge centres; anything further out yields NaN.

use crate::types::InterpolationMethod;

/// Clamp a position onto the grid, or `None` if it lies outside its edges.
#[inline]
fn clamp_to_grid(width: usize, height: usize, x: f64, y: f64) -> Option<(f64, f64)> {
    if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
        return None;
    }
    let max_x = width as f64 - 0.5;
    let max_y = height as f64 - 0.5;
    if x < -0.5 || y < -0.5 || x > max_x || y > max_y {
        return None;
    }
    Some((x.clamp(0.0, (width - 1) as f64), y.clamp(0.0, (height - 1) as f64)))
}

/// Interpolate with the given method.
pub fn interpolate(method: InterpolationMethod, data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    match method {
        InterpolationMethod::Nearest => nearest_interpolate(data, width, height, x, y),
        InterpolationMethod::Bilinear => bilinear_interpolate(data, width, height, x, y),
        InterpolationMethod::Cubic => cubic_interpolate(data, width, height, x, y),
    }
}

/// Nearest neighbor interpolation.
///
/// Returns the value of the nearest grid point.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let Some((x, y)) = clamp_to_grid(width, height, x, y) else {
        return f32::NAN;
    };
    let col = (x.round() as usize).min(width - 1);
    let row = (y.round() as usize).min(height - 1);

    data[row * width + col]
}

/// Bilinear interpolation.
///
/// Smoothly interpolates between the four nearest grid points.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let Some((x, y)) = clamp_to_grid(width, height, x, y) else {
        return f32::NAN;
    };
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    // Handle NaN values - if any corner is NaN, return NaN
    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Bicubic interpolation.
///
/// Uses 16 surrounding points for smoother interpolation.
pub fn cubic_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let Some((x, y)) = clamp_to_grid(width, height, x, y) else {
        return f32::NAN;
    };
    let xi = x.floor() as i64;
    let yi = y.floor() as i64;

    let xf = (x - xi as f64) as f32;
    let yf = (y - yi as f64) as f32;

    let mut values = [[0.0f32; 4]; 4];

    for j in 0..4i64 {
        for i in 0..4i64 {
            let px = (xi + i - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j - 1).clamp(0, height as i64 - 1) as usize;
            let value = data[py * width + px];

            // If any value is NaN, fall back to bilinear
            if value.is_nan() {
                return bilinear_interpolate(data, width, height, x, y);
            }
            values[j as usize][i as usize] = value;
        }
    }

    let mut row_values = [0.0f32; 4];
    for (j, row) in values.iter().enumerate() {
        row_values[j] = cubic_1d(row[0], row[1], row[2], row[3], xf);
    }

    cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], yf)
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}
