//! The character/particle pass: deflection, damage, status, drains,
//! knockback and money pickup.
//!
//! Geometry decides whether a hit happened; everything gameplay-shaped
//! (health, inventories, resistances) is delegated to the
//! [`CharacterModel`][crate::CharacterModel] so this crate never owns
//! character stats.

use crate::{
    entity::{CharacterKey, DamageKind, EntitySet, EntityRef, ParticleKey, StatusEffect, Team},
    math::{self as m},
    pair::{CoNode, PairKey},
    CharacterModel, DamageOutcome, FrameSummary, MissileTreatment,
};

use rand::Rng;

/// Ticks of post-hit invulnerability granted after taking damage.
pub const POST_HIT_INVULN_TICKS: u8 = 16;

const CRIT_MULTIPLIER: f32 = 2.0;
const VULNERABILITY_MULTIPLIER: f32 = 1.5;

/// Everything read from a particle before any mutation happens.
struct ParticleSnapshot {
    pos: m::Vec3,
    vel: m::Vec3,
    team: Team,
    owner: Option<CharacterKey>,
    damage: (f32, f32),
    kind: DamageKind,
    status: Option<StatusEffect>,
    life_drain: f32,
    mana_drain: f32,
    knockback: f32,
    weight: f32,
    piercing: bool,
    friendly_fire: bool,
    money: u16,
    already_hit: bool,
}

/// Process every character/particle record in sorted order.
pub(crate) fn particle_interactions(
    set: &mut EntitySet,
    nodes: &[CoNode],
    model: &mut impl CharacterModel,
    rng: &mut impl Rng,
    summary: &mut FrameSummary,
) {
    let _span = crate::tracy_span!("particle interactions", "particle_interactions");

    for node in nodes {
        let PairKey::CharPart(c_key, p_key) = node.pair else {
            continue;
        };
        interact_one(set, node, c_key, p_key, model, rng, summary);
    }
}

fn interact_one(
    set: &mut EntitySet,
    node: &CoNode,
    c_key: CharacterKey,
    p_key: ParticleKey,
    model: &mut impl CharacterModel,
    rng: &mut impl Rng,
    summary: &mut FrameSummary,
) {
    let (Some(c), Some(p)) = (set.character(c_key), set.particle(p_key)) else {
        return;
    };
    if c.held || p.end_requested || p.attached_to == Some(c_key) {
        return;
    }
    // particle platforms are the platform pass's business
    if p.is_platform {
        return;
    }

    let c = c.clone();
    let p = ParticleSnapshot {
        pos: p.pos,
        vel: p.vel,
        team: p.team,
        owner: p.owner,
        damage: p.damage,
        kind: p.kind,
        status: p.status,
        life_drain: p.life_drain,
        mana_drain: p.mana_drain,
        knockback: p.knockback,
        weight: p.weight,
        piercing: p.piercing,
        friendly_fire: p.friendly_fire,
        money: p.money,
        already_hit: p.hit_characters.contains(&c_key),
    };

    // only tight contact triggers anything; the loose volumes finding
    // each other merely created the record
    let c_tight = c.profile.tight.translated(c.pos);
    let p_tight = set
        .particle(p_key)
        .map(|prt| prt.profile.tight.translated(prt.pos))
        .unwrap_or_else(crate::volume::OctBB::empty);
    let tight_contact = node.tmin > 0.0 || c_tight.overlaps(&p_tight);
    if !tight_contact {
        return;
    }

    // money is picked up, never resolved as a hit
    if p.money > 0 {
        model.pickup_money(c_key, p.money);
        if let Some(prt) = set.particle_mut(p_key) {
            prt.end_requested = true;
        }
        summary.particles_ended += 1;
        return;
    }

    // incoming missiles can be deflected or sent back before any
    // damage is considered; only applies to particles actually closing in
    let closing = (c.pos - p.pos).dot(p.vel) > 0.0;
    let hit_dir = m::normalized_or(p.vel, c.pos - p.pos);
    if closing && p.owner != Some(c_key) {
        let treatment = match model.missile_treatment(c_key) {
            // a shielded facing turns the missile away like a deflect
            MissileTreatment::Normal if model.is_invulnerable_from(c_key, hit_dir) => {
                MissileTreatment::Deflect
            }
            t => t,
        };
        match treatment {
            MissileTreatment::Normal => {}
            MissileTreatment::Deflect => {
                let away = m::normalized_or(
                    m::Vec3::new(p.pos.x - c.pos.x, p.pos.y - c.pos.y, 0.0),
                    m::Vec3::new(1.0, 0.0, 0.0),
                );
                if let Some(prt) = set.particle_mut(p_key) {
                    let speed = prt.vel.mag();
                    prt.vel = away * speed;
                    if !prt.hit_characters.contains(&c_key) {
                        prt.hit_characters.push(c_key);
                    }
                }
                return;
            }
            MissileTreatment::Reflect => {
                // the missile turns around and changes sides
                if let Some(prt) = set.particle_mut(p_key) {
                    prt.vel = -prt.vel;
                    prt.owner = Some(c_key);
                    prt.team = c.team;
                    if !prt.hit_characters.contains(&c_key) {
                        prt.hit_characters.push(c_key);
                    }
                }
                return;
            }
        }
    }

    // damage gating
    let allowed = model.may_damage(p.owner, p.team, c_key, c.team, p.friendly_fire);
    let reaffirm_only =
        !allowed && p.kind.can_reaffirm() && model.is_affected_by(c_key, p.kind);
    if !allowed && !reaffirm_only {
        return;
    }
    if reaffirm_only {
        model.reaffirm_affliction(c_key, p.kind);
        return;
    }
    if c.invuln_timer > 0 {
        return;
    }
    if p.already_hit && !p.piercing {
        return;
    }

    if model.is_invulnerable_from(c_key, hit_dir) {
        return;
    }

    // record the hit before rolling anything so a dodged particle still
    // can't re-trigger next frame
    if let Some(prt) = set.particle_mut(p_key) {
        if !p.already_hit {
            prt.hit_characters.push(c_key);
        }
        if prt.end_on_bump {
            prt.end_requested = true;
            summary.particles_ended += 1;
        }
    }
    if let Some(chr) = set.character_mut(c_key) {
        chr.bumped = true;
        chr.bumped_by = Some(EntityRef::Particle(p_key));
    }
    summary.bumps += 1;

    if rng.gen::<f32>() < model.dodge_chance(c_key) {
        return;
    }

    // damage roll
    let (dmg_min, dmg_max) = p.damage;
    let mut amount = if dmg_max > dmg_min {
        rng.gen_range(dmg_min..=dmg_max)
    } else {
        dmg_min
    };
    if rng.gen::<f32>() < model.crit_chance(p.owner) {
        amount *= CRIT_MULTIPLIER;
    }
    if model.is_vulnerable(c_key, p.kind) {
        amount *= VULNERABILITY_MULTIPLIER;
    }
    amount += model.damage_bonus(p.owner, p.kind);

    // status, drains and knockback land even on a zero-damage hit;
    // only the damage delivery itself depends on the rolled amount
    let outcome = if amount > 0.0 {
        let outcome = model.apply_damage(c_key, p.kind, amount, p.owner);
        summary.damage_events += 1;
        outcome
    } else {
        DamageOutcome::default()
    };
    if let Some(status) = p.status {
        model.apply_status(c_key, status);
    }
    if p.life_drain > 0.0 || p.mana_drain > 0.0 {
        model.apply_drain(c_key, p.owner, p.life_drain, p.mana_drain);
    }
    if let Some(chr) = set.character_mut(c_key) {
        chr.invuln_timer = POST_HIT_INVULN_TICKS;
        // knockback scales with the particle's heft against the
        // character's mass and writes velocity directly
        let shove = p.knockback * p.kind.knockback_factor() * p.weight * chr.mass.inv();
        if shove > 0.0 && !outcome.killed {
            chr.vel += hit_dir * shove;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{Character, DamageKind, EntitySet, Particle, Team},
        volume::OctBB,
        DamageOutcome, DefaultModel,
    };
    use rand::{rngs::SmallRng, SeedableRng};

    fn record(c: CharacterKey, p: ParticleKey) -> CoNode {
        CoNode {
            pair: PairKey::char_part(c, p),
            tmin: -1.0,
            tmax: 1.0,
            axis: None,
            volume: OctBB::cylinder(2.0, 2.0),
        }
    }

    /// Model that tracks damage and money for assertions.
    #[derive(Default)]
    struct RecordingModel {
        damage_taken: Vec<(CharacterKey, f32)>,
        statuses: Vec<(CharacterKey, StatusEffect)>,
        money_collected: u16,
        deflecting: bool,
        shielded: bool,
    }

    impl CharacterModel for RecordingModel {
        fn missile_treatment(&mut self, _chr: CharacterKey) -> MissileTreatment {
            if self.deflecting {
                MissileTreatment::Deflect
            } else {
                MissileTreatment::Normal
            }
        }

        fn is_invulnerable_from(&self, _chr: CharacterKey, _dir: m::Vec3) -> bool {
            self.shielded
        }

        fn apply_status(&mut self, chr: CharacterKey, status: StatusEffect) {
            self.statuses.push((chr, status));
        }

        fn apply_damage(
            &mut self,
            target: CharacterKey,
            _kind: DamageKind,
            amount: f32,
            _attacker: Option<CharacterKey>,
        ) -> DamageOutcome {
            self.damage_taken.push((target, amount));
            DamageOutcome {
                applied: amount,
                killed: false,
            }
        }

        fn pickup_money(&mut self, _chr: CharacterKey, amount: u16) {
            self.money_collected += amount;
        }
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(0x0c70)
    }

    #[test]
    fn hostile_particle_deals_bounded_damage() {
        let mut set = EntitySet::new();
        let c = set.insert_character(
            Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0).with_team(Team(0)),
        );
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(0.5, 0.0, 1.0),
                m::Vec3::new(-1.0, 0.0, 0.0),
                0.5,
                (10.0, 20.0),
                DamageKind::Pierce,
            )
            .with_team(Team(1))
            .ends_on_bump(),
        );

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        assert_eq!(model.damage_taken.len(), 1);
        let (target, amount) = model.damage_taken[0];
        assert_eq!(target, c);
        assert!((10.0..=20.0).contains(&amount));
        assert_eq!(summary.damage_events, 1);

        let chr = set.character(c).unwrap();
        assert!(chr.bumped);
        assert_eq!(chr.bumped_by, Some(EntityRef::Particle(p)));
        assert_eq!(chr.invuln_timer, POST_HIT_INVULN_TICKS);
        // knockback pushed the character along the particle's motion
        assert!(chr.vel.x < 0.0);

        let prt = set.particle(p).unwrap();
        assert!(prt.end_requested);
        assert!(prt.hit_characters.contains(&c));
    }

    #[test]
    fn same_team_particle_is_harmless_without_friendly_fire() {
        let mut set = EntitySet::new();
        let c = set.insert_character(
            Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0).with_team(Team(2)),
        );
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(0.2, 0.0, 1.0),
                m::Vec3::new(-1.0, 0.0, 0.0),
                0.5,
                (5.0, 5.0),
                DamageKind::Slash,
            )
            .with_team(Team(2)),
        );

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        assert!(model.damage_taken.is_empty());
        assert!(!set.character(c).unwrap().bumped);
    }

    #[test]
    fn invulnerability_window_blocks_the_second_hit() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let mk_particle = |set: &mut EntitySet| {
            set.insert_particle(
                Particle::new(
                    m::Vec3::new(0.3, 0.0, 1.0),
                    m::Vec3::new(-1.0, 0.0, 0.0),
                    0.5,
                    (5.0, 5.0),
                    DamageKind::Crush,
                )
                .with_team(Team(1)),
            )
        };
        let p1 = mk_particle(&mut set);
        let p2 = mk_particle(&mut set);

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        particle_interactions(
            &mut set,
            &[record(c, p1), record(c, p2)],
            &mut model,
            &mut rng(),
            &mut summary,
        );

        // only the first record lands; the second is inside the window
        assert_eq!(model.damage_taken.len(), 1);
    }

    #[test]
    fn non_piercing_particle_hits_a_character_once() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(0.3, 0.0, 1.0),
                m::Vec3::new(-1.0, 0.0, 0.0),
                0.5,
                (5.0, 5.0),
                DamageKind::Slash,
            )
            .with_team(Team(1)),
        );

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        let nodes = [record(c, p)];
        particle_interactions(&mut set, &nodes, &mut model, &mut rng(), &mut summary);
        // clear the window, hit again next frame
        set.character_mut(c).unwrap().invuln_timer = 0;
        particle_interactions(&mut set, &nodes, &mut model, &mut rng(), &mut summary);

        assert_eq!(model.damage_taken.len(), 1);
    }

    #[test]
    fn deflection_turns_the_missile_away() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(1.0, 0.0, 1.0),
                m::Vec3::new(-4.0, 0.0, 0.0),
                0.5,
                (5.0, 5.0),
                DamageKind::Pierce,
            )
            .with_team(Team(1)),
        );

        let mut model = RecordingModel {
            deflecting: true,
            ..Default::default()
        };
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        assert!(model.damage_taken.is_empty());
        let prt = set.particle(p).unwrap();
        // speed kept, direction now away from the character
        assert!((prt.vel.mag() - 4.0).abs() < 1e-4);
        assert!(prt.vel.x > 0.0);
    }

    #[test]
    fn shielded_facing_deflects_instead_of_dropping_the_hit() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(1.0, 0.0, 1.0),
                m::Vec3::new(-1.0, 0.0, 0.0),
                0.5,
                (5.0, 5.0),
                DamageKind::Pierce,
            )
            .with_team(Team(1)),
        );

        let mut model = RecordingModel {
            shielded: true,
            ..Default::default()
        };
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        assert!(model.damage_taken.is_empty());
        let prt = set.particle(p).unwrap();
        // the blocked missile bounces off instead of flying on through
        assert!(prt.vel.x > 0.0);
        assert!((prt.vel.mag() - 1.0).abs() < 1e-4);
        assert!(prt.hit_characters.contains(&c));
    }

    #[test]
    fn knockback_and_status_land_without_damage() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let mut prt = Particle::new(
            m::Vec3::new(0.5, 0.0, 1.0),
            m::Vec3::new(-1.0, 0.0, 0.0),
            0.5,
            (0.0, 0.0),
            DamageKind::Crush,
        )
        .with_team(Team(1));
        prt.knockback = 5.0;
        prt.weight = 10.0;
        prt.status = Some(StatusEffect::Daze(30));
        let p = set.insert_particle(prt);

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        // no damage was rolled, but the shove and the status still land
        assert!(model.damage_taken.is_empty());
        assert_eq!(summary.damage_events, 0);
        assert_eq!(model.statuses, vec![(c, StatusEffect::Daze(30))]);
        let chr = set.character(c).unwrap();
        assert!(chr.vel.x < 0.0);
        assert_eq!(chr.invuln_timer, POST_HIT_INVULN_TICKS);
    }

    #[test]
    fn repeated_deflections_record_the_character_once() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(1.0, 0.0, 1.0),
                m::Vec3::new(-4.0, 0.0, 0.0),
                0.5,
                (5.0, 5.0),
                DamageKind::Pierce,
            )
            .with_team(Team(1)),
        );

        let mut model = RecordingModel {
            deflecting: true,
            ..Default::default()
        };
        let mut summary = FrameSummary::default();
        let nodes = [record(c, p)];
        for _ in 0..3 {
            // aim the missile back at the character each frame
            set.particle_mut(p).unwrap().vel = m::Vec3::new(-4.0, 0.0, 0.0);
            particle_interactions(&mut set, &nodes, &mut model, &mut rng(), &mut summary);
        }

        let prt = set.particle(p).unwrap();
        assert_eq!(prt.hit_characters.len(), 1);
    }

    #[test]
    fn money_particle_is_collected() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let mut money = Particle::new(
            m::Vec3::new(0.2, 0.0, 0.5),
            m::Vec3::zero(),
            0.3,
            (0.0, 0.0),
            DamageKind::Crush,
        );
        money.money = 25;
        let p = set.insert_particle(money);

        let mut model = RecordingModel::default();
        let mut summary = FrameSummary::default();
        particle_interactions(&mut set, &[record(c, p)], &mut model, &mut rng(), &mut summary);

        assert_eq!(model.money_collected, 25);
        assert!(set.particle(p).unwrap().end_requested);
        assert!(model.damage_taken.is_empty());
    }

    #[test]
    fn default_model_damages_across_teams() {
        let mut set = EntitySet::new();
        let c = set.insert_character(Character::new(m::Vec3::zero(), 1.0, 2.0, 10.0));
        let p = set.insert_particle(
            Particle::new(
                m::Vec3::new(0.3, 0.0, 1.0),
                m::Vec3::new(-1.0, 0.0, 0.0),
                0.5,
                (3.0, 3.0),
                DamageKind::Flame,
            )
            .with_team(Team(1)),
        );

        let mut summary = FrameSummary::default();
        particle_interactions(
            &mut set,
            &[record(c, p)],
            &mut DefaultModel,
            &mut rng(),
            &mut summary,
        );
        assert_eq!(summary.damage_events, 1);
    }
}
