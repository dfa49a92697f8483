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

/// Linearly interpolate between `a` and `b`, with `t` clamped to [0, 1].
pub fn lerp_clamped<T>(a: T, b: T, t: T) -> T
where
    T: Float,
{
    let t = t.max(T::zero()).min(T::one());
    a + (b - a) * t
}

/// Return the euclidian norm (distance between) of two points.
///
/// If the points do not have the same number of dimentions then `None` is
/// returned.
pub fn norm<T>(point_0: &[T], point_1: &[T]) -> Option<T>
where
    T: Float,
{
    if point_0.len() != point_1.len() {
        return None;
    }

    let sum = point_0
        .iter()
        .zip(point_1.iter())
        .fold(T::zero(), |acc, (a, b)| acc + (*a - *b).powi(2));

    Some(sum.sqrt())
}

/// Clamp the magnitude of a 2D vector to `max`, preserving its direction.
pub fn clamp_magnitude<T>(vec: [T; 2], max: T) -> [T; 2]
where
    T: Float,
{
    let mag = (vec[0].powi(2) + vec[1].powi(2)).sqrt();

    if mag > max && mag > T::zero() {
        let scale = max / mag;
        [vec[0] * scale, vec[1] * scale]
    } else {
        vec
    }
}
