//! The binary pass: turn collision records into physical response.
//!
//! True collisions (the swept volumes first meet inside the frame) get
//! an impulse along the contact normal; steady-state overlap gets a
//! gentler pressure response that pushes the pair apart over several
//! frames. All corrections go through the per-entity accumulators and
//! land on the entities exactly once.

use crate::{
    entity::{Character, CharacterKey, EntitySet, EntityRef},
    math::{self as m},
    pair::{CoNode, PairKey},
    volume::{axis_normal, AXIS_COUNT, AXIS_Z, OctBB},
    FrameSummary,
};

/// Ticks over which bumps against a just-dismounted mount fade back in.
pub const DISMOUNT_TICKS: u8 = 32;

/// Fraction of the penetration depth corrected per frame under pressure.
const POSITION_CORRECTION: f32 = 0.125;

/// Separating speed per unit of penetration depth under pressure.
const PRESSURE_PUSH_RATE: f32 = 0.5;

/// Pick the contact normal: the axis of least penetration, oriented
/// along `from_a_to_b`. Returns the axis depth along with the normal.
fn contact_normal(depths: &[f32; AXIS_COUNT], from_a_to_b: m::Vec3) -> Option<(f32, m::Vec3)> {
    let mut best: Option<(f32, usize)> = None;
    for (axis, &depth) in depths.iter().enumerate() {
        if depth <= 0.0 {
            continue;
        }
        if best.map_or(true, |(d, _)| depth < d) {
            best = Some((depth, axis));
        }
    }
    let (depth, axis) = best?;
    let mut n = axis_normal(axis);
    if from_a_to_b.dot(n) < 0.0 {
        n = -n;
    }
    Some((depth, n))
}

/// Extents of the combined overlap volume, in world units per axis.
/// Used as the depth estimate when the tight volumes aren't touching yet.
fn volume_extents(vol: &OctBB) -> [f32; AXIS_COUNT] {
    // a volume's overlap with itself is its own extent
    vol.overlap_depths(vol)
}

/// How strongly a pair is allowed to interact, in [0, 1].
/// Zero means skip the pair entirely.
fn interaction_strength(
    a: &Character,
    a_key: CharacterKey,
    b: &Character,
    b_key: CharacterKey,
) -> f32 {
    if a.held || b.held {
        return 0.0;
    }
    // rider/mount and rider/platform pairs are handled by their own passes
    if a.riding == Some(b_key) || b.riding == Some(a_key) {
        return 0.0;
    }
    if a.standing_on == Some(EntityRef::Character(b_key))
        || b.standing_on == Some(EntityRef::Character(a_key))
    {
        return 0.0;
    }
    if a.profile.is_point() || b.profile.is_point() {
        return 0.0;
    }

    let mut strength = 1.0;
    // fade bumps back in after a dismount so the rider can get clear
    if a.dismount_from == Some(b_key) && a.dismount_timer > 0 {
        strength *= 1.0 - a.dismount_timer as f32 / DISMOUNT_TICKS as f32;
    }
    if b.dismount_from == Some(a_key) && b.dismount_timer > 0 {
        strength *= 1.0 - b.dismount_timer as f32 / DISMOUNT_TICKS as f32;
    }
    strength
}

fn mark_bumped(set: &mut EntitySet, key: CharacterKey, by: EntityRef) {
    if let Some(chr) = set.character_mut(key) {
        chr.bumped = true;
        chr.bumped_by = Some(by);
    }
}

/// Resolve every character/character and character/tile record.
/// Corrections are only accumulated here; the caller applies them
/// after the whole pass so processing order can't double-move anyone.
pub(crate) fn binary_pass(set: &mut EntitySet, nodes: &[CoNode], summary: &mut FrameSummary) {
    let _span = crate::tracy_span!("binary resolve", "binary_pass");

    for node in nodes {
        match node.pair {
            PairKey::CharChar(a_key, b_key) => {
                resolve_char_pair(set, node, a_key, b_key, summary);
            }
            PairKey::CharTile(c_key, _) => {
                resolve_char_tile(set, node, c_key, summary);
            }
            PairKey::CharPart(..) => {}
        }
    }
}

fn resolve_char_pair(
    set: &mut EntitySet,
    node: &CoNode,
    a_key: CharacterKey,
    b_key: CharacterKey,
    summary: &mut FrameSummary,
) {
    let (Some(a), Some(b)) = (
        set.character(a_key).cloned(),
        set.character(b_key).cloned(),
    ) else {
        return;
    };
    let strength = interaction_strength(&a, a_key, &b, b_key);
    if strength <= 0.0 {
        return;
    }

    let inv_a = a.mass.inv();
    let inv_b = b.mass.inv();
    let inv_sum = inv_a + inv_b;

    if let Some(axis) = node.axis {
        // true collision: the sweep tells us the contact axis directly
        let mut n = axis_normal(axis);
        if (b.pos - a.pos).dot(n) < 0.0 {
            n = -n;
        }
        // n points from a toward b; vn < 0 means they're closing
        let vn = (b.vel - a.vel).dot(n);
        if vn < 0.0 {
            if inv_sum > 0.0 {
                let e = (a.restitution * b.restitution).clamp(0.0, 1.0);
                let j = -(1.0 + e) * vn / inv_sum * strength;
                set.accumulate_char(a_key, m::Vec3::zero(), -n * (j * inv_a));
                set.accumulate_char(b_key, m::Vec3::zero(), n * (j * inv_b));
            }
            mark_bumped(set, a_key, EntityRef::Character(b_key));
            mark_bumped(set, b_key, EntityRef::Character(a_key));
            summary.bumps += 1;
        }
        return;
    }

    // steady-state overlap: depths from the tight volumes.
    // loose-only contact is the platform/mount passes' business.
    let a_tight = a.profile.tight.translated(a.pos);
    let b_tight = b.profile.tight.translated(b.pos);
    if !a_tight.overlaps(&b_tight) {
        return;
    }
    let depths = a_tight.overlap_depths(&b_tight);
    let Some((depth, n)) = contact_normal(&depths, b.pos - a.pos) else {
        return;
    };
    let vn = (b.vel - a.vel).dot(n);
    let prev_vn = (b.prev_vel - a.prev_vel).dot(n);

    if inv_sum > 0.0 {
        let wa = inv_a / inv_sum;
        let wb = inv_b / inv_sum;
        let push = depth * POSITION_CORRECTION * strength;
        let shove = depth * PRESSURE_PUSH_RATE * strength;
        set.accumulate_char(a_key, -n * (push * wa), -n * (shove * wa));
        set.accumulate_char(b_key, n * (push * wb), n * (shove * wb));

        // pressure that flips the pair's relative motion along the
        // normal since last frame still reads as a bump to the AI layer
        if (vn < 0.0) != (prev_vn < 0.0) {
            mark_bumped(set, a_key, EntityRef::Character(b_key));
            mark_bumped(set, b_key, EntityRef::Character(a_key));
            summary.bumps += 1;
        }
    }
}

fn resolve_char_tile(
    set: &mut EntitySet,
    node: &CoNode,
    c_key: CharacterKey,
    summary: &mut FrameSummary,
) {
    let Some(c) = set.character(c_key).cloned() else {
        return;
    };
    if c.held || c.mass.inv() == 0.0 {
        return;
    }

    if let Some(axis) = node.axis {
        // true collision with a wall; bounce off the entry axis
        let mut n = axis_normal(axis);
        if (c.pos - node.volume.center()).dot(n) < 0.0 {
            n = -n;
        }
        let vn = c.vel.dot(n);
        if vn < 0.0 {
            let e = c.restitution.clamp(0.0, 1.0);
            set.accumulate_char(c_key, m::Vec3::zero(), n * (-(1.0 + e) * vn));
            if let Some(chr) = set.character_mut(c_key) {
                chr.bumped = true;
            }
            summary.bumps += 1;
        }
        return;
    }

    // embedded in the wall: push out horizontally along the thinnest
    // axis of the overlap region. Floors and ceilings are the movement
    // code's problem, not a wall tile's.
    let mut depths = volume_extents(&node.volume);
    depths[AXIS_Z] = 0.0;
    let Some((depth, n)) = contact_normal(&depths, c.pos - node.volume.center()) else {
        return;
    };
    set.accumulate_char(
        c_key,
        n * (depth * POSITION_CORRECTION),
        n * (depth * PRESSURE_PUSH_RATE),
    );
}
