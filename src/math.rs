//! Type aliases and small helpers for doing math with `ultraviolet`.

pub use ultraviolet as uv;

pub type Vec3 = uv::Vec3;

/// Normalize a vector, falling back to the given direction
/// when the input is too short to have a meaningful direction.
#[inline]
pub fn normalized_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let mag_sq = v.mag_sq();
    if mag_sq > f32::EPSILON {
        v / mag_sq.sqrt()
    } else {
        fallback
    }
}
