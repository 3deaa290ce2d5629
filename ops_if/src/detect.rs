//! # Detection Types
//!
//! Wire types for object detections produced on board and overlaid on the
//! video stream.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single detected object bounding box.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectionBox {
    /// Left edge in pixels
    pub x1: i32,

    /// Top edge in pixels
    pub y1: i32,

    /// Right edge in pixels
    pub x2: i32,

    /// Bottom edge in pixels
    pub y2: i32,

    /// Human readable class label
    pub label: String,

    /// Detection confidence in [0, 1]
    pub confidence: f64,

    /// Numeric class id from the model
    pub class_id: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl DetectionBox {
    /// Horizontal centroid of the box in pixels.
    pub fn centroid_x(&self) -> f64 {
        (self.x1 + self.x2) as f64 / 2.0
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_centroid() {
        let b = DetectionBox {
            x1: 100,
            y1: 50,
            x2: 300,
            y2: 250,
            label: "person".into(),
            confidence: 0.9,
            class_id: 0,
        };

        assert_eq!(b.centroid_x(), 200.0);
    }
}
