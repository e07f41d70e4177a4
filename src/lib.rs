//! Per-frame collision detection and resolution for a top-down action
//! game: octagonal bump volumes, swept pair discovery over two spatial
//! trees, and the platform / mount / bump / particle-hit passes that
//! turn contacts into motion and gameplay events.
//!
//! The crate owns geometry and motion only. Health, inventories and
//! other character state stay outside, reached through the
//! [`CharacterModel`] trait.

// Re-exported so the tracy_span macro can refer to it.
#[doc(hidden)]
pub use tracy_client;

/// Create a profiling span that's alive until the end of the enclosing scope.
/// Compiles to nothing unless the `tracy` feature is enabled.
#[macro_export]
macro_rules! tracy_span {
    ($name:expr, $function:expr) => {
        $crate::tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $function, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::uv;

pub mod volume;
pub use volume::{BumpProfile, OctBB, PLATFORM_TOLERANCE};

pub mod entity;
pub use entity::{
    Character, CharacterKey, DamageKind, EntityRef, EntitySet, Mass, Particle, ParticleKey,
    StatusEffect, Team,
};

pub mod spatial;
pub use spatial::VolumeTree;

pub mod pair;
pub use pair::{CoNode, NodeStore, PairKey, DEFAULT_NODE_CAPACITY};

pub mod discovery;
pub use discovery::{NoTerrain, Terrain};

mod platform;

mod mount;

mod resolve;
pub use resolve::DISMOUNT_TICKS;

mod interact;
pub use interact::POST_HIT_INVULN_TICKS;

use rand::{rngs::SmallRng, SeedableRng};

/// Frames between tree storage prunes.
const PRUNE_INTERVAL: u64 = 64;

/// Hard failures that abort a collision frame.
///
/// The entity set is left consistent (nothing half-applied), but the
/// frame's contacts are lost; the caller decides whether to retry with
/// a bigger capacity or bail.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("collision record pool exhausted (capacity {capacity})")]
    NodePoolExhausted { capacity: usize },
}

/// Counters describing what a frame did, for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSummary {
    /// Collision records discovered (after dedup).
    pub pairs: usize,
    /// Character bumps that set the `bumped` flag.
    pub bumps: usize,
    /// Damage deliveries handed to the character model.
    pub damage_events: usize,
    /// Particles that requested termination this frame.
    pub particles_ended: usize,
}

/// What a character does to an incoming missile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissileTreatment {
    /// Let it hit.
    Normal,
    /// Knock it away from the character, keeping its speed.
    Deflect,
    /// Send it straight back at the sender and take ownership of it.
    Reflect,
}

/// Result of a damage delivery, reported back by the character model.
#[derive(Clone, Copy, Debug, Default)]
pub struct DamageOutcome {
    /// Damage actually applied after the model's own resistances.
    pub applied: f32,
    /// The hit killed the target; knockback is skipped.
    pub killed: bool,
}

/// The gameplay side of characters, as far as the collision pipeline
/// needs to reach it. Every method has a neutral default so simple
/// simulations can use [`DefaultModel`].
pub trait CharacterModel {
    /// A rider has reached a mount's saddle. Returning true seats them.
    fn request_mount(&mut self, rider: CharacterKey, host: CharacterKey) -> bool {
        let _ = (rider, host);
        true
    }

    /// How this character treats missiles about to hit it.
    fn missile_treatment(&mut self, chr: CharacterKey) -> MissileTreatment {
        let _ = chr;
        MissileTreatment::Normal
    }

    /// Directional invulnerability (shield walls, cover).
    fn is_invulnerable_from(&self, chr: CharacterKey, dir: math::Vec3) -> bool {
        let _ = (chr, dir);
        false
    }

    /// Team-level gate on whether a particle may hurt a character.
    fn may_damage(
        &self,
        attacker: Option<CharacterKey>,
        attacker_team: Team,
        target: CharacterKey,
        target_team: Team,
        friendly_fire: bool,
    ) -> bool {
        let _ = (attacker, target);
        friendly_fire || attacker_team != target_team
    }

    /// Chance in [0, 1] for the target to avoid a hit entirely.
    fn dodge_chance(&self, chr: CharacterKey) -> f32 {
        let _ = chr;
        0.0
    }

    /// Chance in [0, 1] for the attacker to land a critical hit.
    fn crit_chance(&self, attacker: Option<CharacterKey>) -> f32 {
        let _ = attacker;
        0.0
    }

    /// Whether the target takes extra damage from this kind.
    fn is_vulnerable(&self, chr: CharacterKey, kind: DamageKind) -> bool {
        let _ = (chr, kind);
        false
    }

    /// Flat bonus added to a damage roll by the attacker.
    fn damage_bonus(&self, attacker: Option<CharacterKey>, kind: DamageKind) -> f32 {
        let _ = (attacker, kind);
        0.0
    }

    /// Deliver damage. The model owns health and resistances.
    fn apply_damage(
        &mut self,
        target: CharacterKey,
        kind: DamageKind,
        amount: f32,
        attacker: Option<CharacterKey>,
    ) -> DamageOutcome {
        let _ = (target, kind, attacker);
        DamageOutcome {
            applied: amount,
            killed: false,
        }
    }

    /// Deliver a status effect carried by a particle that hit.
    fn apply_status(&mut self, target: CharacterKey, status: StatusEffect) {
        let _ = (target, status);
    }

    /// Transfer drained life/mana from the target to the attacker.
    fn apply_drain(
        &mut self,
        target: CharacterKey,
        attacker: Option<CharacterKey>,
        life: f32,
        mana: f32,
    ) {
        let _ = (target, attacker, life, mana);
    }

    /// Whether the target currently carries an affliction of this kind
    /// (burning, frozen...). Gates the reaffirm path below.
    fn is_affected_by(&self, target: CharacterKey, kind: DamageKind) -> bool {
        let _ = (target, kind);
        false
    }

    /// Keep an existing affliction going; called instead of damage when
    /// a same-team particle of a matching kind touches an afflicted
    /// character.
    fn reaffirm_affliction(&mut self, target: CharacterKey, kind: DamageKind) {
        let _ = (target, kind);
    }

    /// A character walked over a money particle.
    fn pickup_money(&mut self, chr: CharacterKey, amount: u16) {
        let _ = (chr, amount);
    }
}

/// A model that accepts every mount, damages across team lines and
/// ignores everything else. Good enough for physics-only simulations
/// and tests.
pub struct DefaultModel;

impl CharacterModel for DefaultModel {}

/// All the state the collision pipeline keeps between frames:
/// the spatial trees, the record pool, scratch buffers and the RNG
/// for combat rolls. Owns no entities.
pub struct CollisionContext {
    char_tree: VolumeTree,
    part_tree: VolumeTree,
    store: NodeStore,
    sorted: Vec<CoNode>,
    candidates: Vec<EntityRef>,
    tile_scratch: Vec<(u32, OctBB)>,
    platform_candidates: platform::PlatformCandidates,
    frame_count: u64,
    rng: SmallRng,
}

impl Default for CollisionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionContext {
    pub fn new() -> Self {
        Self::with_node_capacity(DEFAULT_NODE_CAPACITY)
    }

    pub fn with_node_capacity(capacity: usize) -> Self {
        Self {
            char_tree: VolumeTree::new(),
            part_tree: VolumeTree::new(),
            store: NodeStore::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
            candidates: Vec::new(),
            tile_scratch: Vec::new(),
            platform_candidates: platform::PlatformCandidates::new(),
            frame_count: 0,
            rng: SmallRng::seed_from_u64(0),
        }
    }

    /// Seed the combat RNG. Two contexts with the same seed running the
    /// same entity sets produce identical results.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Run one full collision frame over the entity set.
    ///
    /// `dt` is the frame duration in seconds; entity velocities are in
    /// units per second. Pass order: discovery, platforms, mounts,
    /// binary resolution, particle interactions.
    pub fn process_frame(
        &mut self,
        set: &mut EntitySet,
        dt: f32,
        terrain: &impl Terrain,
        model: &mut impl CharacterModel,
    ) -> Result<FrameSummary, FrameError> {
        let _span = tracy_span!("collision frame", "process_frame");
        let mut summary = FrameSummary::default();

        self.store.reset();
        set.reset_accumulators();
        frame_setup(set);

        discovery::rebuild_indices(set, dt, &mut self.char_tree, &mut self.part_tree);
        discovery::character_pass(
            set,
            dt,
            &mut self.char_tree,
            &mut self.part_tree,
            terrain,
            &mut self.store,
            &mut self.candidates,
            &mut self.tile_scratch,
        )?;
        discovery::particle_pass(
            set,
            dt,
            &mut self.char_tree,
            &mut self.store,
            &mut self.candidates,
        )?;
        summary.pairs = self.store.len();
        if summary.pairs * 4 >= self.store.capacity() * 3 {
            log::warn!(
                "collision record pool under pressure: {} of {} used",
                summary.pairs,
                self.store.capacity(),
            );
        }
        self.store.drain_sorted(&mut self.sorted);

        platform::detect(set, &self.sorted, &mut self.platform_candidates);
        platform::commit(set, &self.platform_candidates);

        mount::mount_pass(set, &self.sorted, dt, model);

        resolve::binary_pass(set, &self.sorted, &mut summary);
        set.apply_accumulators();

        interact::particle_interactions(set, &self.sorted, model, &mut self.rng, &mut summary);

        // remember this frame's final velocities so the next frame's
        // pressure pass can spot sign flips along a contact normal
        for (_, chr) in set.characters.iter_mut() {
            chr.prev_vel = chr.vel;
        }

        log::trace!(
            "frame {}: {} pairs, {} bumps, {} damage events, {} particles ended",
            self.frame_count,
            summary.pairs,
            summary.bumps,
            summary.damage_events,
            summary.particles_ended,
        );

        self.frame_count += 1;
        if self.frame_count % PRUNE_INTERVAL == 0 {
            self.char_tree.prune();
            self.part_tree.prune();
            log::debug!(
                "pruned spatial trees (chars: {} nodes, particles: {} nodes)",
                self.char_tree.capacity(),
                self.part_tree.capacity(),
            );
        }

        Ok(summary)
    }
}

/// Per-frame state clearing and timer ticking, before discovery runs.
fn frame_setup(set: &mut EntitySet) {
    for (_, chr) in set.characters.iter_mut() {
        chr.bumped = false;
        chr.bumped_by = None;
        chr.invuln_timer = chr.invuln_timer.saturating_sub(1);
        if chr.dismount_timer > 0 {
            chr.dismount_timer -= 1;
            if chr.dismount_timer == 0 {
                chr.dismount_from = None;
            }
        }
    }
}
