//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

use crate::error::{SeriesError, SeriesResult};

/// A geographic bounding box in degrees (EPSG:4326, north-up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Parse "minlon,minlat,maxlon,maxlat".
    pub fn parse(s: &str) -> SeriesResult<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(SeriesError::InvalidAoi(format!(
                "{}: expected 'minlon,minlat,maxlon,maxlat'",
                s
            )));
        }

        let mut values = [0.0f64; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| SeriesError::InvalidAoi(format!("invalid number '{}'", part)))?;
        }
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }

    /// Validate as an area of interest: finite, non-empty and inside the
    /// geographic domain.
    pub fn validated(self) -> SeriesResult<Self> {
        let coords = [self.min_x, self.min_y, self.max_x, self.max_y];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(SeriesError::InvalidAoi(format!("non-finite coordinate in {:?}", coords)));
        }
        if self.min_x >= self.max_x || self.min_y >= self.max_y {
            return Err(SeriesError::InvalidAoi(format!(
                "min must be below max, got {:?}",
                coords
            )));
        }
        if self.min_x < -180.0 || self.max_x > 180.0 || self.min_y < -90.0 || self.max_y > 90.0 {
            return Err(SeriesError::InvalidAoi(format!(
                "{:?} exceeds -180..180 / -90..90",
                coords
            )));
        }
        Ok(self)
    }

    /// Width of the bounding box in degrees.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in degrees.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if this bbox intersects another.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// Compute the intersection of two bounding boxes.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }

        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let bbox = BoundingBox::parse("-125.0, 24.0,-66.0,50.0").unwrap();
        assert_eq!(bbox.min_x, -125.0);
        assert_eq!(bbox.min_y, 24.0);
        assert_eq!(bbox.max_x, -66.0);
        assert_eq!(bbox.max_y, 50.0);
    }

    #[test]
    fn test_intersection() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        let intersection = a.intersection(&b).unwrap();
        assert_eq!(intersection, BoundingBox::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(a.union(&c), BoundingBox::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn test_validated_rejects_degenerate() {
        assert!(BoundingBox::new(10.0, 0.0, 10.0, 5.0).validated().is_err());
        assert!(BoundingBox::new(-190.0, 0.0, 10.0, 5.0).validated().is_err());
        assert!(BoundingBox::new(0.0, 0.0, f64::NAN, 5.0).validated().is_err());
        assert!(BoundingBox::new(-10.0, -5.0, 10.0, 5.0).validated().is_ok());
    }
}
