//! Test data generators for synthetic rasters.
//!
//! These generators create predictable, verifiable patterns that can be
//! used across the test suite.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates an NDVI-like digital-number grid (0-250) with a smooth gradient.
pub fn create_ndvi_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f32 / width.max(1) as f32;
            let y_factor = row as f32 / height.max(1) as f32;
            data.push((x_factor * 125.0 + y_factor * 125.0).round());
        }
    }
    data
}

/// Creates a constant grid where a deterministic share of cells carries the
/// flag value `fill` (roughly one in `every` cells).
pub fn create_flagged_grid(width: usize, height: usize, value: f32, fill: f32, every: u32, seed: u32) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let hash = simple_hash(col as u32, row as u32, seed);
            data.push(if every > 0 && hash % every == 0 { fill } else { value });
        }
    }
    data
}

/// Simple deterministic hash for reproducible test data.
fn simple_hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h = h.wrapping_mul(31).wrapping_add(y);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid_pattern() {
        let grid = create_test_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_ndvi_grid_in_valid_range() {
        let grid = create_ndvi_grid(16, 16);
        assert!(grid.iter().all(|v| (0.0..=250.0).contains(v)));
    }

    #[test]
    fn test_flagged_grid_is_deterministic() {
        let a = create_flagged_grid(20, 20, 100.0, 255.0, 4, 7);
        let b = create_flagged_grid(20, 20, 100.0, 255.0, 4, 7);
        assert_eq!(a, b);
        assert!(a.iter().any(|v| *v == 255.0));
        assert!(a.iter().any(|v| *v == 100.0));
    }
}
