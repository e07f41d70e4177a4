//! The platform passes: decide who is standing on what this frame.
//!
//! Runs in two sub-passes over the sorted collision records:
//! detection scores every geometrically valid host, commit attaches
//! each rider to its single best host and detaches stale relations.
//! The relation is re-derived from scratch every frame.

use crate::{
    entity::{CharacterKey, EntitySet, EntityRef},
    pair::{CoNode, PairKey},
    volume::PLATFORM_TOLERANCE,
};

use std::collections::HashMap;

/// A scored host candidate found during detection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlatformCandidate {
    host: EntityRef,
    /// Top surface height the rider would rest at.
    level: f32,
    /// |rider bottom - host top|; smaller is a closer geometric fit.
    fit: f32,
}

/// Rider-indexed best candidates, kept in the context as scratch.
pub(crate) type PlatformCandidates = HashMap<CharacterKey, PlatformCandidate>;

fn order_bits(e: EntityRef) -> u64 {
    match e {
        EntityRef::Character(c) => c.order_bits(),
        EntityRef::Particle(p) => p.order_bits(),
    }
}

fn offer(
    candidates: &mut PlatformCandidates,
    rider: CharacterKey,
    host: EntityRef,
    level: f32,
    fit: f32,
) {
    use std::collections::hash_map::Entry;
    match candidates.entry(rider) {
        Entry::Vacant(slot) => {
            slot.insert(PlatformCandidate { host, level, fit });
        }
        Entry::Occupied(mut slot) => {
            let best = slot.get();
            // closer fit wins; exact ties go to the lower entity id so
            // the result can't depend on record iteration order
            if fit < best.fit || (fit == best.fit && order_bits(host) < order_bits(best.host)) {
                slot.insert(PlatformCandidate { host, level, fit });
            }
        }
    }
}

/// Whether `rider` standing on a host whose top is at `level` is
/// geometrically plausible this frame.
fn fit_of(rider_bottom: f32, level: f32) -> Option<f32> {
    let fit = (rider_bottom - level).abs();
    (fit < PLATFORM_TOLERANCE).then_some(fit)
}

/// Detection sub-pass: score platform candidates from every record.
pub(crate) fn detect(set: &EntitySet, nodes: &[CoNode], candidates: &mut PlatformCandidates) {
    let _span = crate::tracy_span!("platform detect", "detect");

    candidates.clear();
    for node in nodes {
        match node.pair {
            PairKey::CharChar(a_key, b_key) => {
                let (Some(a), Some(b)) = (set.character(a_key), set.character(b_key)) else {
                    continue;
                };
                let a_on_b = a.uses_platforms && b.is_platform && a.riding != Some(b_key);
                let b_on_a = b.uses_platforms && a.is_platform && b.riding != Some(a_key);
                let a_fit = a_on_b.then(|| fit_of(a.bottom(), b.top())).flatten();
                let b_fit = b_on_a.then(|| fit_of(b.bottom(), a.top())).flatten();
                // when both sides could carry the other, the closer-fitting
                // arrangement is the real one
                match (a_fit, b_fit) {
                    (Some(af), Some(bf)) => {
                        if af <= bf {
                            offer(candidates, a_key, EntityRef::Character(b_key), b.top(), af);
                        } else {
                            offer(candidates, b_key, EntityRef::Character(a_key), a.top(), bf);
                        }
                    }
                    (Some(af), None) => {
                        offer(candidates, a_key, EntityRef::Character(b_key), b.top(), af)
                    }
                    (None, Some(bf)) => {
                        offer(candidates, b_key, EntityRef::Character(a_key), a.top(), bf)
                    }
                    (None, None) => {}
                }
            }
            PairKey::CharPart(c_key, p_key) => {
                let (Some(c), Some(p)) = (set.character(c_key), set.particle(p_key)) else {
                    continue;
                };
                if !(c.uses_platforms && p.is_platform) {
                    continue;
                }
                if let Some(fit) = fit_of(c.bottom(), p.top()) {
                    offer(candidates, c_key, EntityRef::Particle(p_key), p.top(), fit);
                }
            }
            PairKey::CharTile(..) => {}
        }
    }
}

/// Commit sub-pass: attach every rider to its best-scoring host and
/// drop relations whose host wasn't re-confirmed this frame.
pub(crate) fn commit(set: &mut EntitySet, candidates: &PlatformCandidates) {
    let _span = crate::tracy_span!("platform commit", "commit");

    for (key, chr) in set.characters.iter_mut() {
        let key = CharacterKey(key);
        match candidates.get(&key) {
            Some(cand) => {
                chr.standing_on = Some(cand.host);
                chr.platform_level = cand.level;
                // settle the rider onto the surface if it has sunk below
                let bottom = chr.bottom();
                if bottom < cand.level {
                    chr.pos.z += cand.level - bottom;
                    chr.vel.z = chr.vel.z.max(0.0);
                }
            }
            None => {
                // stale host from an earlier frame
                chr.standing_on = None;
            }
        }
    }
}
