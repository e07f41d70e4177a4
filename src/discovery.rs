//! Pair discovery: broad-phase queries against the spatial trees,
//! the precise swept-interval narrow phase, and the gating rules that
//! decide which pairs are even worth testing.

use crate::{
    entity::{Character, CharacterKey, EntitySet, EntityRef, Particle},
    math::{self as m},
    pair::{CoNode, NodeStore, PairKey},
    spatial::VolumeTree,
    volume::{OctBB, AXIS_COUNT},
    FrameError,
};

/// Relative velocities below this are treated as no motion on an axis.
const SWEEP_EPSILON: f32 = 1e-6;

/// Static geometry as the collision core sees it: something that can
/// list the impassable tiles overlapping a volume. Map data and loading
/// live outside this crate.
pub trait Terrain {
    /// Push `(tile id, world-space tile volume)` for every impassable
    /// tile overlapping the query volume.
    fn overlapping_tiles(&self, volume: &OctBB, out: &mut Vec<(u32, OctBB)>);
}

/// A world with no collidable terrain.
pub struct NoTerrain;

impl Terrain for NoTerrain {
    fn overlapping_tiles(&self, _volume: &OctBB, _out: &mut Vec<(u32, OctBB)>) {}
}

/// Result of a swept overlap test: the sub-frame window the volumes
/// share space in, the axis they first met on, and the combined
/// overlap volume.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SweepHit {
    pub tmin: f32,
    pub tmax: f32,
    /// The axis whose entry time is `tmin`, i.e. the contact normal of
    /// a true collision. None when the pair was overlapping all along.
    pub axis: Option<usize>,
    pub volume: OctBB,
}

/// Precise swept-interval overlap test between two volumes moving
/// linearly over one frame (displacements, not velocities).
///
/// tmin is clamped to -1 so "already overlapping with no relative
/// motion" still sorts finitely; any tmin <= 0 reads as steady-state
/// pressure downstream.
pub(crate) fn sweep_overlap(
    a: &OctBB,
    a_disp: m::Vec3,
    b: &OctBB,
    b_disp: m::Vec3,
) -> Option<SweepHit> {
    let rel = OctBB::project(b_disp - a_disp);
    let mut tmin = -1.0_f32;
    let mut tmax = 1.0_f32;
    let mut entry_axis = None;

    for axis in 0..AXIS_COUNT {
        let v = rel[axis];
        if v.abs() < SWEEP_EPSILON {
            // not moving relative to each other on this axis:
            // either always overlapping or never
            if b.maxs[axis] <= a.mins[axis] || b.mins[axis] >= a.maxs[axis] {
                return None;
            }
        } else {
            let mut t0 = (a.mins[axis] - b.maxs[axis]) / v;
            let mut t1 = (a.maxs[axis] - b.mins[axis]) / v;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            if t0 > tmin {
                tmin = t0;
                entry_axis = Some(axis);
            }
            tmax = tmax.min(t1);
            if tmin > tmax {
                return None;
            }
        }
    }
    if tmax < 0.0 || tmin > 1.0 {
        // the volumes only overlap outside this frame
        return None;
    }

    let window_start = tmin.max(0.0);
    let sa = a.swept(a_disp, window_start, tmax);
    let sb = b.swept(b_disp, window_start, tmax);
    let volume = sa.intersection(&sb)?;
    Some(SweepHit {
        tmin,
        tmax,
        axis: if tmin > 0.0 { entry_axis } else { None },
        volume,
    })
}

/// Whether a character pair is worth a narrow-phase test at all.
fn char_pair_allowed(a: &Character, b: &Character) -> bool {
    if a.held || b.held {
        return false;
    }
    // zero-size entities don't bump, but they still use platforms
    if a.profile.is_point() || b.profile.is_point() {
        return (a.uses_platforms && b.is_platform) || (b.uses_platforms && a.is_platform);
    }
    true
}

fn char_part_allowed(chr: &Character, chr_key: CharacterKey, prt: &Particle) -> bool {
    if chr.held || prt.end_requested {
        return false;
    }
    if prt.attached_to == Some(chr_key) {
        return false;
    }
    if chr.profile.is_point() {
        return prt.is_platform && chr.uses_platforms;
    }
    true
}

/// Clear and rebuild both spatial trees from every live entity's
/// swept loose volume for this frame.
pub(crate) fn rebuild_indices(
    set: &EntitySet,
    dt: f32,
    char_tree: &mut VolumeTree,
    part_tree: &mut VolumeTree,
) {
    char_tree.clear();
    for (key, chr) in set.iter_characters() {
        if chr.held {
            continue;
        }
        let vol = chr
            .profile
            .loose
            .translated(chr.pos)
            .swept(chr.vel * dt, 0.0, 1.0);
        char_tree.insert(EntityRef::Character(key), vol);
    }

    part_tree.clear();
    for (key, prt) in set.iter_particles() {
        if prt.end_requested {
            continue;
        }
        let vol = prt
            .profile
            .loose
            .translated(prt.pos)
            .swept(prt.vel * dt, 0.0, 1.0);
        part_tree.insert(EntityRef::Particle(key), vol);
    }
}

/// Discovery from the characters' point of view: each character queries
/// both trees and the terrain for everything its swept volume reaches.
#[allow(clippy::too_many_arguments)]
pub(crate) fn character_pass(
    set: &EntitySet,
    dt: f32,
    char_tree: &mut VolumeTree,
    part_tree: &mut VolumeTree,
    terrain: &impl Terrain,
    store: &mut NodeStore,
    candidates: &mut Vec<EntityRef>,
    tile_scratch: &mut Vec<(u32, OctBB)>,
) -> Result<(), FrameError> {
    let _span = crate::tracy_span!("discovery characters", "character_pass");

    for (a_key, a) in set.iter_characters() {
        if a.held {
            continue;
        }
        let a_vol = a.profile.loose.translated(a.pos);
        let a_disp = a.vel * dt;
        let query = a_vol.swept(a_disp, 0.0, 1.0);

        candidates.clear();
        candidates.extend(char_tree.overlaps(&query));
        candidates.extend(part_tree.overlaps(&query));

        for cand in candidates.drain(..) {
            match cand {
                EntityRef::Character(b_key) => {
                    // the broad phase returns the querying character itself
                    if b_key == a_key {
                        continue;
                    }
                    let Some(b) = set.character(b_key) else {
                        continue;
                    };
                    if !char_pair_allowed(a, b) {
                        continue;
                    }
                    let b_vol = b.profile.loose.translated(b.pos);
                    if let Some(hit) = sweep_overlap(&a_vol, a_disp, &b_vol, b.vel * dt) {
                        store.insert(CoNode {
                            pair: PairKey::chars(a_key, b_key),
                            tmin: hit.tmin,
                            tmax: hit.tmax,
                            axis: hit.axis,
                            volume: hit.volume,
                        })?;
                    }
                }
                EntityRef::Particle(p_key) => {
                    let Some(p) = set.particle(p_key) else {
                        continue;
                    };
                    if !char_part_allowed(a, a_key, p) {
                        continue;
                    }
                    let p_vol = p.profile.loose.translated(p.pos);
                    if let Some(hit) = sweep_overlap(&a_vol, a_disp, &p_vol, p.vel * dt) {
                        store.insert(CoNode {
                            pair: PairKey::char_part(a_key, p_key),
                            tmin: hit.tmin,
                            tmax: hit.tmax,
                            axis: hit.axis,
                            volume: hit.volume,
                        })?;
                    }
                }
            }
        }

        tile_scratch.clear();
        terrain.overlapping_tiles(&query, tile_scratch);
        for (tile, tile_vol) in tile_scratch.drain(..) {
            if let Some(hit) = sweep_overlap(&a_vol, a_disp, &tile_vol, m::Vec3::zero()) {
                store.insert(CoNode {
                    pair: PairKey::char_tile(a_key, tile),
                    tmin: hit.tmin,
                    tmax: hit.tmax,
                    axis: hit.axis,
                    volume: hit.volume,
                })?;
            }
        }
    }
    Ok(())
}

/// Second discovery pass from the particles' point of view, for
/// particles with contact semantics (end on bump/ground, reaffirm,
/// platform) that no character query may have reached.
/// The dedup table swallows pairs already found above.
pub(crate) fn particle_pass(
    set: &EntitySet,
    dt: f32,
    char_tree: &mut VolumeTree,
    store: &mut NodeStore,
    candidates: &mut Vec<EntityRef>,
) -> Result<(), FrameError> {
    let _span = crate::tracy_span!("discovery particles", "particle_pass");

    for (p_key, p) in set.iter_particles() {
        if p.end_requested || !p.needs_reaffirm_pass() {
            continue;
        }
        let p_vol = p.profile.loose.translated(p.pos);
        let p_disp = p.vel * dt;
        let query = p_vol.swept(p_disp, 0.0, 1.0);

        candidates.clear();
        candidates.extend(char_tree.overlaps(&query));

        for cand in candidates.drain(..) {
            let EntityRef::Character(c_key) = cand else {
                continue;
            };
            let Some(c) = set.character(c_key) else {
                continue;
            };
            if !char_part_allowed(c, c_key, p) {
                continue;
            }
            let c_vol = c.profile.loose.translated(c.pos);
            if let Some(hit) = sweep_overlap(&c_vol, c.vel * dt, &p_vol, p_disp) {
                store.insert(CoNode {
                    pair: PairKey::char_part(c_key, p_key),
                    tmin: hit.tmin,
                    tmax: hit.tmax,
                    axis: hit.axis,
                    volume: hit.volume,
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Character;

    fn world_vol(pos: m::Vec3) -> OctBB {
        OctBB::cylinder(1.0, 2.0).translated(pos)
    }

    #[test]
    fn steady_overlap_reads_as_pressure() {
        let a = world_vol(m::Vec3::zero());
        let b = world_vol(m::Vec3::new(1.0, 0.0, 0.5));
        let hit = sweep_overlap(&a, m::Vec3::zero(), &b, m::Vec3::zero()).expect("should overlap");
        assert!(hit.tmin <= 0.0);
        assert!(hit.tmax >= 1.0 - 1e-6);
        assert!(hit.axis.is_none());
        assert!(hit.volume.is_valid());
    }

    #[test]
    fn fast_mover_does_not_tunnel() {
        let a = world_vol(m::Vec3::zero());
        // starts 10 units away and crosses a in the middle of the frame
        let b = world_vol(m::Vec3::new(-10.0, 0.0, 0.0));
        let hit = sweep_overlap(&a, m::Vec3::zero(), &b, m::Vec3::new(20.0, 0.0, 0.0))
            .expect("sweep should catch the crossing");
        assert!(hit.tmin > 0.0 && hit.tmin < 1.0);
        assert!(hit.tmax > hit.tmin);
        // first contact is on the x axis
        assert_eq!(hit.axis, Some(crate::volume::AXIS_X));

        // without enough displacement there is no overlap at all
        assert!(sweep_overlap(&a, m::Vec3::zero(), &b, m::Vec3::new(2.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn sweep_is_symmetric() {
        let a = world_vol(m::Vec3::zero());
        let b = world_vol(m::Vec3::new(-5.0, 0.2, 0.0));
        let va = m::Vec3::new(-1.0, 0.0, 0.0);
        let vb = m::Vec3::new(6.0, 0.0, 0.0);
        let fwd = sweep_overlap(&a, va, &b, vb).expect("overlap");
        let rev = sweep_overlap(&b, vb, &a, va).expect("overlap");
        assert!((fwd.tmin - rev.tmin).abs() < 1e-5);
        assert!((fwd.tmax - rev.tmax).abs() < 1e-5);
        assert_eq!(fwd.axis, rev.axis);
    }

    #[test]
    fn discovery_records_each_pair_once() {
        let mut set = EntitySet::new();
        let a = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let b = set.insert_character(Character::new(m::Vec3::new(1.0, 0.0, 0.0), 1.0, 2.0, 10.0));

        let mut char_tree = VolumeTree::new();
        let mut part_tree = VolumeTree::new();
        rebuild_indices(&set, 1.0, &mut char_tree, &mut part_tree);

        let mut store = NodeStore::with_capacity(16);
        let mut candidates = Vec::new();
        let mut tiles = Vec::new();
        character_pass(
            &set,
            1.0,
            &mut char_tree,
            &mut part_tree,
            &NoTerrain,
            &mut store,
            &mut candidates,
            &mut tiles,
        )
        .unwrap();

        // both characters queried and found each other; one record exists
        assert_eq!(store.len(), 1);
        let mut out = Vec::new();
        store.drain_sorted(&mut out);
        assert_eq!(out[0].pair, PairKey::chars(b, a));
    }

    #[test]
    fn zero_size_entity_only_meets_platforms() {
        let mut set = EntitySet::new();
        let mut point = Character::new(m::Vec3::zero(), 1.0, 2.0, 1.0);
        point.profile = crate::volume::BumpProfile::point();
        let point = set.insert_character(point);
        let _solid =
            set.insert_character(Character::new(m::Vec3::new(0.1, 0.0, 0.0), 1.0, 2.0, 10.0));
        let plat = set.insert_character(
            Character::new(m::Vec3::new(0.0, 0.1, 0.0), 2.0, 1.0, 100.0).as_platform(),
        );

        let mut char_tree = VolumeTree::new();
        let mut part_tree = VolumeTree::new();
        rebuild_indices(&set, 1.0, &mut char_tree, &mut part_tree);

        let mut store = NodeStore::with_capacity(16);
        let mut candidates = Vec::new();
        let mut tiles = Vec::new();
        character_pass(
            &set,
            1.0,
            &mut char_tree,
            &mut part_tree,
            &NoTerrain,
            &mut store,
            &mut candidates,
            &mut tiles,
        )
        .unwrap();

        let mut out = Vec::new();
        store.drain_sorted(&mut out);
        // the point character pairs with the platform but not the solid;
        // solid and platform pair with each other
        assert!(out
            .iter()
            .any(|n| n.pair == PairKey::chars(point, plat)));
        assert!(!out
            .iter()
            .any(|n| n.pair == PairKey::chars(point, _solid)));
    }
}
