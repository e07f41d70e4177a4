//! The octagonal bounding volume, the geometric primitive
//! everything in the collision pipeline is built on.
//!
//! It stores an interval on five axes: the three cardinal ones plus the
//! two 45° diagonals of the xy plane. The diagonals cut the corners off
//! the axis-aligned box, matching a rounded footprint much more closely
//! than a plain box does.

use crate::math::{self as m};

use itertools::izip;

/// Number of interval axes in an octagonal volume.
pub const AXIS_COUNT: usize = 5;

pub const AXIS_X: usize = 0;
pub const AXIS_Y: usize = 1;
pub const AXIS_Z: usize = 2;
/// Diagonal axis measuring `x + y`.
pub const AXIS_XY: usize = 3;
/// Diagonal axis measuring `y - x`.
pub const AXIS_YX: usize = 4;

const SQRT_2: f32 = std::f32::consts::SQRT_2;

/// Interval lengths on the diagonal axes are scaled by √2
/// relative to world space; divide by this to get world-space depths.
pub(crate) const AXIS_SCALE: [f32; AXIS_COUNT] = [1.0, 1.0, 1.0, SQRT_2, SQRT_2];

/// World-space direction of an axis, for turning a separating axis
/// into a contact normal.
pub(crate) fn axis_normal(axis: usize) -> m::Vec3 {
    use std::f32::consts::FRAC_1_SQRT_2;
    match axis {
        AXIS_X => m::Vec3::new(1.0, 0.0, 0.0),
        AXIS_Y => m::Vec3::new(0.0, 1.0, 0.0),
        AXIS_Z => m::Vec3::new(0.0, 0.0, 1.0),
        AXIS_XY => m::Vec3::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2, 0.0),
        AXIS_YX => m::Vec3::new(-FRAC_1_SQRT_2, FRAC_1_SQRT_2, 0.0),
        _ => unreachable!(),
    }
}

/// An octagonal bounding volume: an interval on each of the five axes.
///
/// A volume is only meaningful if `min < max` on every axis;
/// anything else reads as "empty" and never overlaps anything.
/// All values must be finite; rejecting NaN is the caller's job.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OctBB {
    pub mins: [f32; AXIS_COUNT],
    pub maxs: [f32; AXIS_COUNT],
}

impl OctBB {
    /// Project a point onto all five axes.
    #[inline]
    pub fn project(p: m::Vec3) -> [f32; AXIS_COUNT] {
        [p.x, p.y, p.z, p.x + p.y, p.y - p.x]
    }

    /// Build a volume from the corners of an axis-aligned box,
    /// deriving the diagonal intervals from the cardinal ones.
    pub fn from_aabb(min: m::Vec3, max: m::Vec3) -> Self {
        debug_assert!(min.x.is_finite() && max.x.is_finite());
        Self {
            mins: [min.x, min.y, min.z, min.x + min.y, min.y - max.x],
            maxs: [max.x, max.y, max.z, max.x + max.y, max.y - min.x],
        }
    }

    /// An octagonal cylinder with the given footprint radius and height,
    /// centered on the origin in xy, feet at z = 0.
    ///
    /// The diagonal extent is `r√2 / 2 + r/2`-ish in a true regular octagon;
    /// we use the slightly looser `r√2` corner cut the original bump
    /// volumes used, which keeps fat characters from snagging on corners.
    pub fn cylinder(radius: f32, height: f32) -> Self {
        let d = radius * SQRT_2;
        Self {
            mins: [-radius, -radius, 0.0, -d, -d],
            maxs: [radius, radius, height.max(f32::EPSILON), d, d],
        }
    }

    /// A degenerate volume that overlaps nothing.
    pub fn empty() -> Self {
        Self {
            mins: [f32::MAX; AXIS_COUNT],
            maxs: [f32::MIN; AXIS_COUNT],
        }
    }

    /// min < max on every axis. Anything else denotes "empty".
    #[inline]
    pub fn is_valid(&self) -> bool {
        izip!(&self.mins, &self.maxs).all(|(lo, hi)| lo < hi)
    }

    /// Shift a local volume to a world position.
    pub fn translated(&self, pos: m::Vec3) -> Self {
        let offs = Self::project(pos);
        let mut out = *self;
        for (min, max, off) in izip!(&mut out.mins, &mut out.maxs, &offs) {
            *min += off;
            *max += off;
        }
        out
    }

    /// The smallest volume containing both inputs.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for (min, max, omin, omax) in izip!(&mut out.mins, &mut out.maxs, &other.mins, &other.maxs)
        {
            *min = min.min(*omin);
            *max = max.max(*omax);
        }
        out
    }

    /// The overlapping region of two volumes, or None if they're disjoint.
    ///
    /// Checks the three cardinal axes before touching the diagonals
    /// so callers short-circuit cheaply in the common non-overlapping case.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let mut out = Self::empty();
        for axis in [AXIS_X, AXIS_Y, AXIS_Z, AXIS_XY, AXIS_YX] {
            let lo = self.mins[axis].max(other.mins[axis]);
            let hi = self.maxs[axis].min(other.maxs[axis]);
            if lo >= hi {
                return None;
            }
            out.mins[axis] = lo;
            out.maxs[axis] = hi;
        }
        Some(out)
    }

    /// Quick overlap test without materializing the intersection.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        izip!(&self.mins, &self.maxs, &other.mins, &other.maxs)
            .all(|(lo, hi, olo, ohi)| lo.max(*olo) < hi.min(*ohi))
    }

    /// Expand the volume along a velocity over the sub-frame interval
    /// [t0, t1], covering every position the entity passes through.
    /// This is what keeps fast movers from tunneling through each other.
    pub fn swept(&self, vel: m::Vec3, t0: f32, t1: f32) -> Self {
        debug_assert!(t0 <= t1);
        let v = Self::project(vel);
        let mut out = *self;
        for (min, max, v) in izip!(&mut out.mins, &mut out.maxs, &v) {
            let d0 = v * t0;
            let d1 = v * t1;
            *min += d0.min(d1);
            *max += d0.max(d1);
        }
        out
    }

    /// Grow the volume by a constant margin on every axis.
    pub fn padded(&self, margin: f32) -> Self {
        let mut out = *self;
        for (min, max, scale) in izip!(&mut out.mins, &mut out.maxs, &AXIS_SCALE) {
            *min -= margin * scale;
            *max += margin * scale;
        }
        out
    }

    #[inline]
    pub fn contains_point(&self, p: m::Vec3) -> bool {
        izip!(&self.mins, &self.maxs, &Self::project(p)).all(|(lo, hi, v)| *lo <= *v && *v <= *hi)
    }

    /// Center of the cardinal box.
    #[inline]
    pub fn center(&self) -> m::Vec3 {
        m::Vec3::new(
            (self.mins[AXIS_X] + self.maxs[AXIS_X]) * 0.5,
            (self.mins[AXIS_Y] + self.maxs[AXIS_Y]) * 0.5,
            (self.mins[AXIS_Z] + self.maxs[AXIS_Z]) * 0.5,
        )
    }

    /// Drop the diagonal axes, leaving an axis-aligned box.
    pub fn to_aabb(&self) -> (m::Vec3, m::Vec3) {
        (
            m::Vec3::new(self.mins[AXIS_X], self.mins[AXIS_Y], self.mins[AXIS_Z]),
            m::Vec3::new(self.maxs[AXIS_X], self.maxs[AXIS_Y], self.maxs[AXIS_Z]),
        )
    }

    /// Penetration depth on each axis of an already-overlapping pair,
    /// in world-space units. Empty overlap reads as zero depth.
    pub(crate) fn overlap_depths(&self, other: &Self) -> [f32; AXIS_COUNT] {
        let mut depths = [0.0; AXIS_COUNT];
        for (depth, lo, hi, olo, ohi, scale) in izip!(
            &mut depths,
            &self.mins,
            &self.maxs,
            &other.mins,
            &other.maxs,
            &AXIS_SCALE
        ) {
            *depth = ((hi.min(*ohi) - lo.max(*olo)) / scale).max(0.0);
        }
        depths
    }

    /// Heuristic size measure used when growing the spatial tree:
    /// half the surface area of the cardinal box.
    pub(crate) fn measure(&self) -> f32 {
        let dx = self.maxs[AXIS_X] - self.mins[AXIS_X];
        let dy = self.maxs[AXIS_Y] - self.mins[AXIS_Y];
        let dz = self.maxs[AXIS_Z] - self.mins[AXIS_Z];
        dx * dy + dy * dz + dz * dx
    }
}

/// The two levels of detail an entity's footprint is tested at:
/// a tight volume for actual hits and a looser one for resting contact
/// and platform scoring.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BumpProfile {
    pub tight: OctBB,
    pub loose: OctBB,
}

/// How far beyond the tight footprint the loose volume reaches,
/// horizontally and below the feet. Also the vertical band within which
/// a platform top is considered "under" a rider.
pub const PLATFORM_TOLERANCE: f32 = 10.0;

impl BumpProfile {
    /// Standard profile for an entity with the given footprint radius and height.
    pub fn new(radius: f32, height: f32) -> Self {
        let tight = OctBB::cylinder(radius, height);
        let mut loose = tight.padded(radius * 0.25);
        // the loose volume reaches below the feet so resting/platform
        // contact is found before the tight volumes ever touch
        loose.mins[AXIS_Z] = tight.mins[AXIS_Z] - PLATFORM_TOLERANCE;
        loose.maxs[AXIS_Z] = tight.maxs[AXIS_Z];
        Self { tight, loose }
    }

    /// A zero-size profile for entities that don't bump anything
    /// (they still interact with platforms).
    pub fn point() -> Self {
        let vol = OctBB::cylinder(f32::EPSILON, f32::EPSILON);
        Self {
            tight: vol,
            loose: vol,
        }
    }

    /// True if the footprint is too small to bump other entities.
    pub fn is_point(&self) -> bool {
        self.tight.maxs[AXIS_X] - self.tight.mins[AXIS_X] < 0.01
    }
}
