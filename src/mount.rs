//! The mount pass: turn close saddle contact into ride proposals.
//!
//! Geometry and motion are decided here; whether the mount is actually
//! allowed (slots, ownership, stats) is the character model's call.

use crate::{
    entity::{Character, CharacterKey, EntitySet},
    pair::{CoNode, PairKey},
    CharacterModel,
};

/// Whether `rider` reaching for `host`'s saddle is geometrically valid
/// this frame: the rider's position must be inside the saddle volume
/// swept along the host's motion, and the rider must not be moving away
/// from it.
fn saddle_reached(rider: &Character, host: &Character, dt: f32) -> bool {
    let saddle = host
        .saddle
        .tight
        .translated(host.pos)
        .swept(host.vel * dt, 0.0, 1.0);
    if !saddle.contains_point(rider.pos) {
        return false;
    }
    let toward = saddle.center() - rider.pos;
    let rel_vel = rider.vel - host.vel;
    // moving toward (or resting against) the saddle counts; moving away
    // means the rider is leaving, not mounting
    rel_vel.dot(toward) >= 0.0
}

fn mountable(rider: &Character, rider_key: CharacterKey, host: &Character, host_key: CharacterKey) -> bool {
    rider.can_ride
        && host.is_mount
        && !rider.held
        && !host.held
        && rider.riding.is_none()
        && host.riding != Some(rider_key)
        // a fresh dismount from this very mount doesn't instantly re-mount
        && !(rider.dismount_from == Some(host_key) && rider.dismount_timer > 0)
}

/// Scan the sorted records for rider/mount contacts and propose each
/// valid one to the character model. The first accepted proposal for a
/// rider wins; record order makes that deterministic.
pub(crate) fn mount_pass(
    set: &mut EntitySet,
    nodes: &[CoNode],
    dt: f32,
    model: &mut impl CharacterModel,
) {
    let _span = crate::tracy_span!("mount", "mount_pass");

    for node in nodes {
        let PairKey::CharChar(a_key, b_key) = node.pair else {
            continue;
        };
        // try both directions; the record's canonical order decides
        // which side gets first shot when both could mount the other
        for (rider_key, host_key) in [(a_key, b_key), (b_key, a_key)] {
            let (Some(rider), Some(host)) = (set.character(rider_key), set.character(host_key))
            else {
                continue;
            };
            if !mountable(rider, rider_key, host, host_key) {
                continue;
            }
            if !saddle_reached(rider, host, dt) {
                continue;
            }
            if model.request_mount(rider_key, host_key) {
                if let Some(rider) = set.character_mut(rider_key) {
                    rider.riding = Some(host_key);
                    rider.dismount_from = None;
                    rider.dismount_timer = 0;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{math as m, DefaultModel};

    fn mount_at(z: f32) -> Character {
        Character::new(m::Vec3::new(0.0, 0.0, z), 2.0, 3.0, 200.0).as_mount(1.5, 3.0)
    }

    fn record(a: CharacterKey, b: CharacterKey) -> CoNode {
        CoNode {
            pair: PairKey::chars(a, b),
            tmin: -1.0,
            tmax: 1.0,
            axis: None,
            volume: crate::volume::OctBB::cylinder(4.0, 4.0),
        }
    }

    #[test]
    fn rider_in_saddle_gets_mounted() {
        let mut set = EntitySet::new();
        let host = set.insert_character(mount_at(0.0));
        let mut rider = Character::new(m::Vec3::new(0.0, 0.0, 3.5), 0.8, 1.8, 10.0);
        rider.can_ride = true;
        let rider = set.insert_character(rider);

        let nodes = [record(rider, host)];
        mount_pass(&mut set, &nodes, 1.0, &mut DefaultModel);

        assert_eq!(set.character(rider).unwrap().riding, Some(host));
        assert_eq!(set.character(host).unwrap().riding, None);
    }

    #[test]
    fn receding_rider_does_not_mount() {
        let mut set = EntitySet::new();
        let host = set.insert_character(mount_at(0.0));
        let mut rider = Character::new(m::Vec3::new(1.0, 0.0, 3.5), 0.8, 1.8, 10.0);
        rider.can_ride = true;
        // moving straight away from the saddle center
        rider.vel = m::Vec3::new(8.0, 0.0, 0.0);
        let rider = set.insert_character(rider);

        let nodes = [record(rider, host)];
        mount_pass(&mut set, &nodes, 1.0, &mut DefaultModel);

        assert_eq!(set.character(rider).unwrap().riding, None);
    }

    #[test]
    fn fresh_dismount_does_not_remount() {
        let mut set = EntitySet::new();
        let host = set.insert_character(mount_at(0.0));
        let mut rider = Character::new(m::Vec3::new(0.0, 0.0, 3.5), 0.8, 1.8, 10.0);
        rider.can_ride = true;
        rider.dismount_from = None;
        let rider = set.insert_character(rider);
        {
            let r = set.character_mut(rider).unwrap();
            r.dismount_from = Some(host);
            r.dismount_timer = 10;
        }

        let nodes = [record(rider, host)];
        mount_pass(&mut set, &nodes, 1.0, &mut DefaultModel);
        assert_eq!(set.character(rider).unwrap().riding, None);

        // once the grace period runs out the same contact mounts again
        set.character_mut(rider).unwrap().dismount_timer = 0;
        mount_pass(&mut set, &nodes, 1.0, &mut DefaultModel);
        assert_eq!(set.character(rider).unwrap().riding, Some(host));
    }
}
