//! Common test fixtures for the raster time-series tests.

/// Quality conventions of the NDVI digital numbers.
pub mod ndvi {
    pub const VALID_MIN: f32 = 0.0;
    pub const VALID_MAX: f32 = 250.0;
    pub const FLAGS: [f32; 5] = [251.0, 252.0, 253.0, 254.0, 255.0];
}
