//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Return the euclidean distance between two 2D points.
pub fn norm_2d<T>(a: (T, T), b: (T, T)) -> T
where
    T: Float,
{
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Clamp a value into the inclusive range [min, max].
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    if value > max {
        max
    } else if value < min {
        min
    } else {
        value
    }
}

/// Wrap an angle in degrees into the range [0, 360).
pub fn wrap_degrees<T>(angle: T) -> T
where
    T: Float,
{
    let full: T = T::from(360.0).unwrap();
    let r = angle % full;
    if r < T::from(0.0).unwrap() {
        r + full
    } else {
        r
    }
}

/// Get the signed angular difference `a - b` in degrees, reduced to the
/// range (-180, 180].
pub fn signed_delta_degrees<T>(a: T, b: T) -> T
where
    T: Float,
{
    let full: T = T::from(360.0).unwrap();
    let half: T = T::from(180.0).unwrap();

    let mut delta = wrap_degrees(a - b);
    if delta > half {
        delta = delta - full;
    }
    delta
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
