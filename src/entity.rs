//! The live entity tables the collision pipeline works on:
//! characters and particles in generational arenas,
//! plus the per-frame physics accumulators that sit alongside them.
//!
//! Handles are only valid while the entity lives; a stale handle
//! simply fails to resolve, which the pipeline treats as "no interaction".

use crate::{
    math::{self as m},
    volume::BumpProfile,
};

use thunderdome as td;

/// Key type to look up a character stored in the entity set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CharacterKey(pub(crate) td::Index);

impl CharacterKey {
    /// Stable per-frame ordering value, used for deterministic tie-breaks.
    #[inline]
    pub(crate) fn order_bits(&self) -> u64 {
        self.0.to_bits()
    }
}

/// Key type to look up a particle stored in the entity set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParticleKey(pub(crate) td::Index);

impl ParticleKey {
    #[inline]
    pub(crate) fn order_bits(&self) -> u64 {
        self.0.to_bits()
    }
}

/// What a spatial-index leaf or a bump source points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Character(CharacterKey),
    Particle(ParticleKey),
}

/// Mass of an entity, which can be infinite (immovable).
///
/// Stores the inverse alongside the value because the inverse is what
/// every recoil computation actually wants.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mass {
    Finite { mass: f32, inverse: f32 },
    Infinite,
}

impl From<f32> for Mass {
    #[inline]
    fn from(mass: f32) -> Self {
        if mass <= 0.0 || !mass.is_finite() {
            Mass::Infinite
        } else {
            Mass::Finite {
                mass,
                inverse: 1.0 / mass,
            }
        }
    }
}

impl Mass {
    /// Inverse mass; zero for an immovable entity.
    #[inline]
    pub fn inv(&self) -> f32 {
        match self {
            Mass::Finite { inverse, .. } => *inverse,
            Mass::Infinite => 0.0,
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        match self {
            Mass::Finite { mass, .. } => *mass,
            Mass::Infinite => f32::INFINITY,
        }
    }
}

/// Teams gate which particles may hurt which characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Team(pub u8);

/// The flavors of damage a particle can carry.
/// Burn-capable kinds can "reaffirm" an already burning character
/// even through friendly-fire rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DamageKind {
    Slash,
    Crush,
    Pierce,
    Flame,
    Frost,
    Shock,
    Holy,
    Evil,
}

impl DamageKind {
    /// Kinds that keep an existing burn/affliction of the same kind going.
    #[inline]
    pub fn can_reaffirm(&self) -> bool {
        matches!(self, DamageKind::Flame | DamageKind::Frost | DamageKind::Shock)
    }

    /// How strongly this kind of damage shoves the target around.
    #[inline]
    pub(crate) fn knockback_factor(&self) -> f32 {
        match self {
            DamageKind::Crush => 1.5,
            DamageKind::Slash | DamageKind::Pierce => 1.0,
            DamageKind::Flame | DamageKind::Frost | DamageKind::Shock => 0.75,
            DamageKind::Holy | DamageKind::Evil => 0.5,
        }
    }
}

/// Status effect a particle can inflict on hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusEffect {
    /// Stun-like: can't act for the given number of ticks.
    Daze(u16),
    /// Confusion-like: acts erratically for the given number of ticks.
    Grog(u16),
}

/// A character as the collision core sees it: position, motion,
/// bump volumes, mass, and the capability flags that gate the
/// platform/mount/bump passes. Everything else about a character
/// (health, stats, perks) lives in the character model outside this crate.
#[derive(Clone, Debug)]
pub struct Character {
    pub pos: m::Vec3,
    pub vel: m::Vec3,
    /// Velocity at the end of the previous frame. The binary pass
    /// compares its sign along the contact normal against the current
    /// one to tell a fresh shove apart from steady-state pressure.
    pub prev_vel: m::Vec3,
    pub profile: BumpProfile,
    pub mass: Mass,
    /// How bouncy collisions with this character are, in [0, 1].
    pub restitution: f32,
    pub team: Team,

    /// Other entities can stand on top of this one.
    pub is_platform: bool,
    /// This one can stand on top of platforms.
    pub uses_platforms: bool,
    /// Other characters can ride this one.
    pub is_mount: bool,
    /// This one can ride mounts.
    pub can_ride: bool,
    /// Attachment-slot volume riders must reach, local to `pos`.
    pub saddle: BumpProfile,
    /// Inside an inventory or otherwise removed from the world;
    /// excluded from every pass.
    pub held: bool,

    /// Who this character is standing on this frame, if anyone.
    /// Re-derived every frame by the platform pass.
    pub standing_on: Option<EntityRef>,
    /// Top surface height of the platform being stood on.
    pub platform_level: f32,
    /// Mount this character is riding. Set on successful mount proposal,
    /// cleared by the character model on dismount.
    pub riding: Option<CharacterKey>,
    /// Recently dismounted from this character; bumps against it
    /// fade back in over `dismount_timer` ticks.
    pub dismount_from: Option<CharacterKey>,
    pub dismount_timer: u8,

    /// Post-hit invulnerability ticks; no damage while nonzero.
    pub invuln_timer: u8,

    /// Gameplay-visible "was bumped" flag, consumed by the AI layer.
    pub bumped: bool,
    pub bumped_by: Option<EntityRef>,
}

impl Character {
    pub fn new(pos: m::Vec3, radius: f32, height: f32, mass: impl Into<Mass>) -> Self {
        Self {
            pos,
            vel: m::Vec3::zero(),
            prev_vel: m::Vec3::zero(),
            profile: BumpProfile::new(radius, height),
            mass: mass.into(),
            restitution: 0.4,
            team: Team(0),
            is_platform: false,
            uses_platforms: true,
            is_mount: false,
            can_ride: false,
            saddle: BumpProfile::point(),
            held: false,
            standing_on: None,
            platform_level: 0.0,
            riding: None,
            dismount_from: None,
            dismount_timer: 0,
            invuln_timer: 0,
            bumped: false,
            bumped_by: None,
        }
    }

    pub fn with_velocity(mut self, vel: m::Vec3) -> Self {
        self.vel = vel;
        self.prev_vel = vel;
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.team = team;
        self
    }

    /// Mark as a platform others can stand on.
    pub fn as_platform(mut self) -> Self {
        self.is_platform = true;
        self
    }

    /// Mark as a mount with a saddle at the given height.
    pub fn as_mount(mut self, saddle_radius: f32, saddle_height: f32) -> Self {
        self.is_mount = true;
        let mut saddle = BumpProfile::new(saddle_radius, saddle_radius);
        saddle.tight = saddle.tight.translated(m::Vec3::new(0.0, 0.0, saddle_height));
        saddle.loose = saddle.loose.translated(m::Vec3::new(0.0, 0.0, saddle_height));
        self.saddle = saddle;
        self
    }

    /// Bottom of the tight volume in world space (the feet).
    #[inline]
    pub fn bottom(&self) -> f32 {
        self.pos.z + self.profile.tight.mins[crate::volume::AXIS_Z]
    }

    /// Top of the tight volume in world space.
    #[inline]
    pub fn top(&self) -> f32 {
        self.pos.z + self.profile.tight.maxs[crate::volume::AXIS_Z]
    }
}

/// A particle (projectile, effect, dropped money...) as the collision
/// core sees it.
#[derive(Clone, Debug)]
pub struct Particle {
    pub pos: m::Vec3,
    pub vel: m::Vec3,
    pub profile: BumpProfile,
    /// Physical heft used for knockback weighting. Zero means weightless.
    pub weight: f32,
    pub team: Team,
    /// Character that fired this particle, if any.
    pub owner: Option<CharacterKey>,
    /// Character this particle is attached to (a held weapon's spark,
    /// an enchant aura); never interacts with its anchor.
    pub attached_to: Option<CharacterKey>,

    pub damage: (f32, f32),
    pub kind: DamageKind,
    pub status: Option<StatusEffect>,
    /// Life/mana drained from the target and given to the owner on hit.
    pub life_drain: f32,
    pub mana_drain: f32,
    /// Scales the velocity nudge applied to characters this hits.
    pub knockback: f32,

    /// May hit the same character more than once over its lifetime.
    pub piercing: bool,
    /// Hurts characters on its own team too.
    pub friendly_fire: bool,
    /// Request termination after the first character bump.
    pub end_on_bump: bool,
    /// Request termination when it settles on the ground.
    pub end_on_ground: bool,
    /// Money value; nonzero particles are picked up rather than resolved.
    pub money: u16,
    /// Characters may stand on this (falling platforms, ice floes).
    pub is_platform: bool,

    /// Characters already hit this lifetime; blocks re-triggering
    /// unless `piercing` is set.
    pub hit_characters: Vec<CharacterKey>,
    /// Set by the pipeline to ask the particle model to terminate this
    /// particle at the end of the frame.
    pub end_requested: bool,
}

impl Particle {
    pub fn new(pos: m::Vec3, vel: m::Vec3, radius: f32, damage: (f32, f32), kind: DamageKind) -> Self {
        Self {
            pos,
            vel,
            profile: BumpProfile::new(radius, radius * 2.0),
            weight: 1.0,
            team: Team(0),
            owner: None,
            attached_to: None,
            damage,
            kind,
            status: None,
            life_drain: 0.0,
            mana_drain: 0.0,
            knockback: 1.0,
            piercing: false,
            friendly_fire: false,
            end_on_bump: false,
            end_on_ground: false,
            money: 0,
            is_platform: false,
            hit_characters: Vec::new(),
            end_requested: false,
        }
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.team = team;
        self
    }

    pub fn with_owner(mut self, owner: CharacterKey) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn ends_on_bump(mut self) -> Self {
        self.end_on_bump = true;
        self
    }

    /// Whether this particle needs its own discovery pass even when no
    /// character's query found it (contact/reaffirm semantics).
    #[inline]
    pub(crate) fn needs_reaffirm_pass(&self) -> bool {
        self.end_on_bump || self.end_on_ground || self.is_platform || self.kind.can_reaffirm()
    }

    #[inline]
    pub fn top(&self) -> f32 {
        self.pos.z + self.profile.tight.maxs[crate::volume::AXIS_Z]
    }
}

/// Per-entity sums of all pairwise position/velocity corrections
/// found during a frame. Applied to the entity exactly once at the end
/// of the binary pass so that many simultaneous collisions can't
/// double-apply a displacement.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhysAccumulator {
    pub dpos: m::Vec3,
    pub dvel: m::Vec3,
}

impl PhysAccumulator {
    #[inline]
    fn clear(&mut self) {
        self.dpos = m::Vec3::zero();
        self.dvel = m::Vec3::zero();
    }
}

/// The live entity tables. Owned by the simulation driver;
/// the collision pipeline takes it by `&mut` for the duration of a frame.
#[derive(Default)]
pub struct EntitySet {
    pub(crate) characters: td::Arena<Character>,
    pub(crate) particles: td::Arena<Particle>,
    // accumulators live in parallel arenas addressed by the same index
    pub(crate) char_accs: td::Arena<PhysAccumulator>,
    pub(crate) part_accs: td::Arena<PhysAccumulator>,
}

impl EntitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_character(&mut self, chr: Character) -> CharacterKey {
        let key = self.characters.insert(chr);
        self.char_accs.insert_at(key, PhysAccumulator::default());
        CharacterKey(key)
    }

    pub fn insert_particle(&mut self, prt: Particle) -> ParticleKey {
        let key = self.particles.insert(prt);
        self.part_accs.insert_at(key, PhysAccumulator::default());
        ParticleKey(key)
    }

    #[inline]
    pub fn character(&self, key: CharacterKey) -> Option<&Character> {
        self.characters.get(key.0)
    }

    #[inline]
    pub fn character_mut(&mut self, key: CharacterKey) -> Option<&mut Character> {
        self.characters.get_mut(key.0)
    }

    #[inline]
    pub fn particle(&self, key: ParticleKey) -> Option<&Particle> {
        self.particles.get(key.0)
    }

    #[inline]
    pub fn particle_mut(&mut self, key: ParticleKey) -> Option<&mut Particle> {
        self.particles.get_mut(key.0)
    }

    pub fn remove_character(&mut self, key: CharacterKey) -> Option<Character> {
        self.char_accs.remove(key.0);
        self.characters.remove(key.0)
    }

    pub fn remove_particle(&mut self, key: ParticleKey) -> Option<Particle> {
        self.part_accs.remove(key.0);
        self.particles.remove(key.0)
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn iter_characters(&self) -> impl Iterator<Item = (CharacterKey, &Character)> {
        self.characters.iter().map(|(k, c)| (CharacterKey(k), c))
    }

    pub fn iter_particles(&self) -> impl Iterator<Item = (ParticleKey, &Particle)> {
        self.particles.iter().map(|(k, p)| (ParticleKey(k), p))
    }

    /// Zero every accumulator. Run at the start of each frame;
    /// the buffers themselves are retained across frames.
    pub(crate) fn reset_accumulators(&mut self) {
        for (_, acc) in self.char_accs.iter_mut() {
            acc.clear();
        }
        for (_, acc) in self.part_accs.iter_mut() {
            acc.clear();
        }
    }

    /// Sum a correction into a character's accumulator.
    #[inline]
    pub(crate) fn accumulate_char(&mut self, key: CharacterKey, dpos: m::Vec3, dvel: m::Vec3) {
        if let Some(acc) = self.char_accs.get_mut(key.0) {
            acc.dpos += dpos;
            acc.dvel += dvel;
        }
    }

    #[inline]
    pub(crate) fn accumulate_part(&mut self, key: ParticleKey, dpos: m::Vec3, dvel: m::Vec3) {
        if let Some(acc) = self.part_accs.get_mut(key.0) {
            acc.dpos += dpos;
            acc.dvel += dvel;
        }
    }

    /// Apply every accumulator to its entity, once.
    pub(crate) fn apply_accumulators(&mut self) {
        for (key, chr) in self.characters.iter_mut() {
            if let Some(acc) = self.char_accs.get(key) {
                chr.pos += acc.dpos;
                chr.vel += acc.dvel;
            }
        }
        for (key, prt) in self.particles.iter_mut() {
            if let Some(acc) = self.part_accs.get(key) {
                prt.pos += acc.dpos;
                prt.vel += acc.dvel;
            }
        }
    }
}
