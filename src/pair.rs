//! Collision records and the per-frame table that deduplicates them.
//!
//! Every interacting pair gets exactly one record per frame no matter
//! which side's discovery query found it first. The table is a
//! fixed-capacity pool: running out is a hard error for the frame,
//! never a silent drop.

use crate::{
    entity::{CharacterKey, ParticleKey},
    volume::OctBB,
    FrameError,
};

use std::collections::HashMap;

/// Canonical identifier of an unordered interacting pair.
///
/// Character pairs are stored with the lower-ordered key first, so
/// (A, B) and (B, A) produce the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PairKey {
    CharChar(CharacterKey, CharacterKey),
    CharPart(CharacterKey, ParticleKey),
    /// A character against a static terrain tile.
    CharTile(CharacterKey, u32),
}

impl PairKey {
    /// Canonical key for a character pair, independent of argument order.
    pub fn chars(a: CharacterKey, b: CharacterKey) -> Self {
        if a.order_bits() <= b.order_bits() {
            PairKey::CharChar(a, b)
        } else {
            PairKey::CharChar(b, a)
        }
    }

    pub fn char_part(c: CharacterKey, p: ParticleKey) -> Self {
        PairKey::CharPart(c, p)
    }

    pub fn char_tile(c: CharacterKey, tile: u32) -> Self {
        PairKey::CharTile(c, tile)
    }

    /// Stable ordering used as the final sort tie-break, so processing
    /// order is reproducible for identical entity sets.
    pub(crate) fn order_key(&self) -> (u8, u64, u64) {
        match self {
            PairKey::CharChar(a, b) => (0, a.order_bits(), b.order_bits()),
            PairKey::CharPart(c, p) => (1, c.order_bits(), p.order_bits()),
            PairKey::CharTile(c, t) => (2, c.order_bits(), *t as u64),
        }
    }
}

/// A single collision record: the pair, the sub-frame time window the
/// swept volumes overlap, and the combined overlap volume.
///
/// `tmin > 0` is a true collision happening later this frame;
/// `tmin <= 0` is steady-state overlap resolved as pressure.
/// Records live for one frame only.
#[derive(Clone, Copy, Debug)]
pub struct CoNode {
    pub pair: PairKey,
    pub tmin: f32,
    pub tmax: f32,
    /// The axis whose entry time produced `tmin`; the contact normal of
    /// a true collision. None for steady-state overlap.
    pub axis: Option<usize>,
    pub volume: OctBB,
}

/// Default record capacity; matches a few hundred entities bumping
/// into each other in a crowded room.
pub const DEFAULT_NODE_CAPACITY: usize = 2048;

/// The frame-scoped store of collision records, keyed for dedup.
///
/// First writer wins: once a pair has a record, later discoveries of
/// the same unordered pair are ignored.
#[derive(Debug)]
pub struct NodeStore {
    nodes: Vec<CoNode>,
    index: HashMap<PairKey, usize>,
    capacity: usize,
}

impl NodeStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Logical reset retaining all storage. Run at the start of every frame.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a record unless its pair already has one.
    /// Returns whether the record was actually added.
    pub fn insert(&mut self, node: CoNode) -> Result<bool, FrameError> {
        if self.index.contains_key(&node.pair) {
            return Ok(false);
        }
        if self.nodes.len() >= self.capacity {
            return Err(FrameError::NodePoolExhausted {
                capacity: self.capacity,
            });
        }
        self.index.insert(node.pair, self.nodes.len());
        self.nodes.push(node);
        Ok(true)
    }

    /// Move all records into `out` in deterministic processing order:
    /// ascending tmin, then tmax, then the pair identifier tie-break.
    pub fn drain_sorted(&mut self, out: &mut Vec<CoNode>) {
        out.clear();
        out.append(&mut self.nodes);
        self.index.clear();
        out.sort_unstable_by(|a, b| {
            a.tmin
                .total_cmp(&b.tmin)
                .then_with(|| a.tmax.total_cmp(&b.tmax))
                .then_with(|| a.pair.order_key().cmp(&b.pair.order_key()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math as m;
    use thunderdome as td;

    fn keys(n: usize) -> Vec<CharacterKey> {
        let mut arena = td::Arena::new();
        (0..n).map(|_| CharacterKey(arena.insert(()))).collect()
    }

    fn node(pair: PairKey, tmin: f32) -> CoNode {
        CoNode {
            pair,
            tmin,
            tmax: tmin + 0.5,
            axis: None,
            volume: OctBB::from_aabb(m::Vec3::zero(), m::Vec3::new(1.0, 1.0, 1.0)),
        }
    }

    #[test]
    fn unordered_pair_is_canonical() {
        let k = keys(2);
        assert_eq!(PairKey::chars(k[0], k[1]), PairKey::chars(k[1], k[0]));

        let mut store = NodeStore::with_capacity(8);
        assert!(store.insert(node(PairKey::chars(k[0], k[1]), 0.1)).unwrap());
        // mirrored discovery of the same pair is ignored
        assert!(!store.insert(node(PairKey::chars(k[1], k[0]), 0.3)).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn exhaustion_is_a_hard_error() {
        let k = keys(6);
        let mut store = NodeStore::with_capacity(2);
        store.insert(node(PairKey::chars(k[0], k[1]), 0.0)).unwrap();
        store.insert(node(PairKey::chars(k[2], k[3]), 0.0)).unwrap();
        let err = store.insert(node(PairKey::chars(k[4], k[5]), 0.0));
        assert!(matches!(
            err,
            Err(FrameError::NodePoolExhausted { capacity: 2 })
        ));
        // the table stays consistent after the failed insert
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn drain_sorts_by_time_then_pair() {
        let k = keys(6);
        let mut store = NodeStore::with_capacity(8);
        store.insert(node(PairKey::chars(k[4], k[5]), 0.5)).unwrap();
        store.insert(node(PairKey::chars(k[2], k[3]), -0.1)).unwrap();
        store.insert(node(PairKey::chars(k[0], k[1]), 0.5)).unwrap();

        let mut out = Vec::new();
        store.drain_sorted(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].pair, PairKey::chars(k[2], k[3]));
        // equal times fall back to the pair id tie-break
        assert_eq!(out[1].pair, PairKey::chars(k[0], k[1]));
        assert_eq!(out[2].pair, PairKey::chars(k[4], k[5]));
        assert!(store.is_empty());
    }
}
