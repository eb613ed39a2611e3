//! Encounters, threat bookkeeping and the fixed-interval combat tick.
//!
//! An encounter is the set of actors fighting in one room. Its threat table is
//! indexed `target -> attacker -> entry`; an entry's amount only grows until
//! the target dies, leaves, or the encounter resolves. Mobs pick the attacker
//! with the most threat against them. Experience from a kill is split across
//! everyone with threat against the victim, by share.
//!
//! All methods run on the world task with `&mut WorldRegistry`; nothing here
//! is shared across threads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CombatConfig;
use crate::world::content::{ItemKind, Registries};
use crate::world::errors::WorldError;
use crate::world::registry::WorldRegistry;
use crate::world::types::{Actor, ActorId, ActorKind, RoomId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncounterId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterState {
    Engaged,
    /// At least one participant is trying to get away.
    Fleeing,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreatEntry {
    pub amount: u64,
    /// Global order in which this attacker first engaged this target.
    pub engaged_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Players,
    Mobs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Active,
    Fleeing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub side: Side,
    pub status: ParticipantStatus,
    pub joined_seq: u64,
}

/// Why someone stopped being a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Keeps threat dealt so far; loses threat held against them.
    Fled,
    Died,
    /// Forgotten entirely.
    Disconnected,
}

/// How mobs break a tie between equally threatening attackers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    EarliestEngaged,
    LowestId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombatPolicy {
    pub hit_threshold: i32,
    pub flee_chance: f64,
    pub tie_break: TieBreak,
    pub unarmed_damage: (u32, u32),
    pub player_defense: i32,
}

impl Default for CombatPolicy {
    fn default() -> Self {
        Self {
            hit_threshold: 0,
            flee_chance: 0.5,
            tie_break: TieBreak::EarliestEngaged,
            unarmed_damage: (1, 3),
            player_defense: 8,
        }
    }
}

impl From<&CombatConfig> for CombatPolicy {
    fn from(cfg: &CombatConfig) -> Self {
        let (lo, hi) = (cfg.unarmed_damage_min, cfg.unarmed_damage_max);
        Self {
            hit_threshold: cfg.hit_threshold,
            flee_chance: cfg.flee_chance.clamp(0.0, 1.0),
            tie_break: cfg.tie_break,
            unarmed_damage: (lo.max(1), hi.max(lo.max(1))),
            player_defense: cfg.player_defense,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encounter {
    pub id: EncounterId,
    pub room: RoomId,
    pub state: EncounterState,
    participants: BTreeMap<ActorId, Participant>,
    threat: BTreeMap<ActorId, BTreeMap<ActorId, ThreatEntry>>,
    /// Player-chosen targets. Mobs choose by threat every tick.
    targets: BTreeMap<ActorId, ActorId>,
    /// How the last member of a side left, once one side is empty.
    emptied_by: Option<Departure>,
}

impl Encounter {
    fn new(id: EncounterId, room: RoomId) -> Self {
        Self {
            id,
            room,
            state: EncounterState::Engaged,
            participants: BTreeMap::new(),
            threat: BTreeMap::new(),
            targets: BTreeMap::new(),
            emptied_by: None,
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = (&ActorId, &Participant)> {
        self.participants.iter()
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.participants.contains_key(&actor)
    }

    /// Total threat held against `target`.
    pub fn threat_total(&self, target: ActorId) -> u64 {
        self.threat
            .get(&target)
            .map(|t| t.values().map(|e| e.amount).sum())
            .unwrap_or(0)
    }

    pub fn threat_entry(&self, target: ActorId, attacker: ActorId) -> Option<ThreatEntry> {
        self.threat.get(&target)?.get(&attacker).copied()
    }

    fn join(&mut self, actor: ActorId, side: Side, seq: &mut u64) {
        if self.participants.contains_key(&actor) {
            return;
        }
        *seq += 1;
        self.emptied_by = None;
        self.participants.insert(
            actor,
            Participant {
                side,
                status: ParticipantStatus::Active,
                joined_seq: *seq,
            },
        );
    }

    fn add_threat(&mut self, target: ActorId, attacker: ActorId, amount: u64, seq: &mut u64) {
        let entry = self
            .threat
            .entry(target)
            .or_default()
            .entry(attacker)
            .or_insert_with(|| {
                *seq += 1;
                ThreatEntry {
                    amount: 0,
                    engaged_seq: *seq,
                }
            });
        entry.amount = entry.amount.saturating_add(amount);
    }

    fn leave(&mut self, actor: ActorId, departure: Departure) {
        let side = self.participants.remove(&actor).map(|p| p.side);
        if let Some(side) = side {
            if self.emptied_by.is_none() && !self.side_present(side) {
                self.emptied_by = Some(departure);
            }
        }
        self.targets.remove(&actor);
        self.targets.retain(|_, target| *target != actor);
        self.threat.remove(&actor);
        if departure == Departure::Disconnected {
            for attackers in self.threat.values_mut() {
                attackers.remove(&actor);
            }
        }
    }

    fn ordered(&self) -> Vec<ActorId> {
        let mut ids: Vec<(u64, ActorId)> = self
            .participants
            .iter()
            .map(|(id, p)| (p.joined_seq, *id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn side_present(&self, side: Side) -> bool {
        self.participants.values().any(|p| p.side == side)
    }

    fn refresh_state(&mut self) {
        if self.state == EncounterState::Resolved {
            return;
        }
        self.state = if self
            .participants
            .values()
            .any(|p| p.status == ParticipantStatus::Fleeing)
        {
            EncounterState::Fleeing
        } else {
            EncounterState::Engaged
        };
    }

    fn is_live_opponent(&self, me: ActorId, other: ActorId, registry: &WorldRegistry) -> bool {
        let (Some(mine), Some(theirs)) = (self.participants.get(&me), self.participants.get(&other))
        else {
            return false;
        };
        mine.side != theirs.side
            && registry
                .actor(other)
                .map(|a| a.is_alive() && a.room() == self.room)
                .unwrap_or(false)
    }

    /// Mob AI: most threatening live attacker still in the fight.
    fn threat_target(&self, mob: ActorId, registry: &WorldRegistry, tie: TieBreak) -> Option<ActorId> {
        self.threat
            .get(&mob)?
            .iter()
            .filter(|(attacker, _)| self.is_live_opponent(mob, **attacker, registry))
            .max_by(|(a_id, a), (b_id, b)| {
                a.amount.cmp(&b.amount).then_with(|| match tie {
                    // max_by keeps the later of equal elements, so invert
                    TieBreak::EarliestEngaged => b.engaged_seq.cmp(&a.engaged_seq),
                    TieBreak::LowestId => b_id.cmp(a_id),
                })
            })
            .map(|(attacker, _)| *attacker)
    }

    fn pick_target(&mut self, actor: ActorId, registry: &WorldRegistry, tie: TieBreak) -> Option<ActorId> {
        let side = self.participants.get(&actor)?.side;
        if side == Side::Mobs {
            return self.threat_target(actor, registry, tie);
        }
        if let Some(chosen) = self.targets.get(&actor).copied() {
            if self.is_live_opponent(actor, chosen, registry) {
                return Some(chosen);
            }
        }
        let next = self
            .ordered()
            .into_iter()
            .find(|other| self.is_live_opponent(actor, *other, registry))?;
        self.targets.insert(actor, next);
        Some(next)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Hit {
        room: RoomId,
        attacker: ActorId,
        target: ActorId,
        damage: u32,
        remaining: i32,
    },
    Miss {
        room: RoomId,
        attacker: ActorId,
        target: ActorId,
    },
    /// Stunned; lost the tick.
    Skipped { room: RoomId, actor: ActorId },
    FleeFailed { room: RoomId, actor: ActorId },
    /// The engine moves the actor out through a random exit.
    FleeSucceeded { room: RoomId, actor: ActorId },
    Died {
        room: RoomId,
        victim: ActorId,
        killer: ActorId,
        experience: Vec<(ActorId, u64)>,
    },
    Resolved {
        encounter: EncounterId,
        room: RoomId,
        draw: bool,
    },
}

/// Derived attack and defence numbers for one swing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatProfile {
    pub attack_bonus: i32,
    pub defense: i32,
    pub damage: (u32, u32),
    pub damage_bonus: u32,
    pub mitigation: u32,
}

pub fn combat_profile(actor: &Actor, registries: &Registries, policy: &CombatPolicy) -> CombatProfile {
    match &actor.kind {
        ActorKind::Mob(mob) => CombatProfile {
            attack_bonus: mob.attack_bonus,
            defense: mob.defense,
            damage: mob.damage,
            damage_bonus: 0,
            mitigation: mob.mitigation,
        },
        ActorKind::Player(player) => {
            let level_bonus = actor.level / 2;
            let weapon = player
                .equipment
                .weapon
                .as_deref()
                .and_then(|id| registries.item(id))
                .and_then(|def| match def.kind {
                    ItemKind::Weapon {
                        damage_min,
                        damage_max,
                        attack_bonus,
                    } => Some(((damage_min, damage_max.max(damage_min)), attack_bonus)),
                    _ => None,
                });
            let mitigation = player
                .equipment
                .armor
                .as_deref()
                .and_then(|id| registries.item(id))
                .map(|def| match def.kind {
                    ItemKind::Armor { mitigation } => mitigation,
                    _ => 0,
                })
                .unwrap_or(0);
            let (damage, weapon_bonus) = weapon.unwrap_or((policy.unarmed_damage, 0));
            CombatProfile {
                attack_bonus: weapon_bonus + level_bonus as i32,
                defense: policy.player_defense + level_bonus as i32,
                damage,
                damage_bonus: actor.level / 3,
                mitigation,
            }
        }
    }
}

/// Split `total` experience by threat share using the largest-remainder
/// method. Leftover points go to the largest remainders, then the larger
/// share, then the lower actor id.
pub fn split_experience(total: u64, shares: &[(ActorId, u64)]) -> Vec<(ActorId, u64)> {
    if shares.is_empty() {
        return Vec::new();
    }
    let weight_sum: u128 = shares.iter().map(|(_, w)| *w as u128).sum();
    let weights: Vec<(ActorId, u128)> = if weight_sum == 0 {
        shares.iter().map(|(id, _)| (*id, 1)).collect()
    } else {
        shares.iter().map(|(id, w)| (*id, *w as u128)).collect()
    };
    let sum: u128 = weights.iter().map(|(_, w)| *w).sum();

    let mut awarded: Vec<(ActorId, u64, u128, u128)> = weights
        .iter()
        .map(|(id, w)| {
            let scaled = total as u128 * w;
            (*id, (scaled / sum) as u64, scaled % sum, *w)
        })
        .collect();
    let given: u64 = awarded.iter().map(|(_, base, _, _)| *base).sum();
    let mut leftover = total - given;

    let mut order: Vec<usize> = (0..awarded.len()).collect();
    order.sort_by(|&a, &b| {
        let (ida, _, ra, wa) = awarded[a];
        let (idb, _, rb, wb) = awarded[b];
        rb.cmp(&ra).then(wb.cmp(&wa)).then(ida.cmp(&idb))
    });
    for idx in order {
        if leftover == 0 {
            break;
        }
        awarded[idx].1 += 1;
        leftover -= 1;
    }
    awarded.into_iter().map(|(id, xp, _, _)| (id, xp)).collect()
}

#[derive(Debug, Default)]
pub struct CombatEngine {
    policy: CombatPolicy,
    encounters: BTreeMap<EncounterId, Encounter>,
    next_id: u64,
    next_seq: u64,
}

impl CombatEngine {
    pub fn new(policy: CombatPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &CombatPolicy {
        &self.policy
    }

    pub fn encounter(&self, id: EncounterId) -> Option<&Encounter> {
        self.encounters.get(&id)
    }

    pub fn encounters(&self) -> impl Iterator<Item = &Encounter> {
        self.encounters.values()
    }

    pub fn encounter_of(&self, actor: ActorId) -> Option<EncounterId> {
        self.encounters
            .values()
            .find(|e| e.contains(actor))
            .map(|e| e.id)
    }

    pub fn in_combat(&self, actor: ActorId) -> bool {
        self.encounter_of(actor).is_some()
    }

    /// Start, join or merge an encounter so that `attacker` fights `target`.
    pub fn engage(
        &mut self,
        registry: &WorldRegistry,
        attacker: ActorId,
        target: ActorId,
    ) -> Result<EncounterId, WorldError> {
        let a = registry
            .actor(attacker)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", attacker)))?;
        let t = registry
            .actor(target)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", target)))?;
        if attacker == target {
            return Err(WorldError::NotEligible("You can't attack yourself.".to_string()));
        }
        if a.is_player() == t.is_player() {
            return Err(WorldError::NotEligible(format!(
                "You can't attack {}.",
                t.name
            )));
        }
        if !t.is_alive() {
            return Err(WorldError::NotEligible(format!("{} is already dead.", t.name)));
        }
        if a.room() != t.room() {
            return Err(WorldError::NotFound(t.name.clone()));
        }
        let room = a.room().to_string();
        let side_of = |actor: &Actor| if actor.is_player() { Side::Players } else { Side::Mobs };
        let (a_side, t_side) = (side_of(a), side_of(t));

        let id = match (self.encounter_of(attacker), self.encounter_of(target)) {
            (Some(x), Some(y)) if x == y => x,
            (Some(x), Some(y)) => {
                self.merge(x, y);
                x
            }
            (Some(x), None) | (None, Some(x)) => x,
            (None, None) => {
                self.next_id += 1;
                let id = EncounterId(self.next_id);
                self.encounters.insert(id, Encounter::new(id, room.clone()));
                debug!("Encounter {:?} started in {}", id, room);
                id
            }
        };

        let seq = &mut self.next_seq;
        let enc = self
            .encounters
            .get_mut(&id)
            .ok_or_else(|| WorldError::Internal(format!("encounter {:?} vanished", id)))?;
        enc.join(attacker, a_side, seq);
        enc.join(target, t_side, seq);
        enc.add_threat(target, attacker, 0, seq);
        if a_side == Side::Players {
            enc.targets.insert(attacker, target);
        }
        Ok(id)
    }

    fn merge(&mut self, into: EncounterId, from: EncounterId) {
        let Some(other) = self.encounters.remove(&from) else {
            return;
        };
        let Some(enc) = self.encounters.get_mut(&into) else {
            return;
        };
        debug!("Merging encounter {:?} into {:?}", from, into);
        for (id, p) in other.participants {
            enc.participants.entry(id).or_insert(p);
        }
        for (target, attackers) in other.threat {
            let table = enc.threat.entry(target).or_default();
            for (attacker, entry) in attackers {
                table
                    .entry(attacker)
                    .and_modify(|e| {
                        e.amount = e.amount.max(entry.amount);
                        e.engaged_seq = e.engaged_seq.min(entry.engaged_seq);
                    })
                    .or_insert(entry);
            }
        }
        for (who, target) in other.targets {
            enc.targets.entry(who).or_insert(target);
        }
        enc.refresh_state();
    }

    /// Mark a participant as trying to flee. Resolved on the next tick.
    pub fn request_flee(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let id = self
            .encounter_of(actor)
            .ok_or_else(|| WorldError::NotEligible("You aren't fighting anyone.".to_string()))?;
        if let Some(enc) = self.encounters.get_mut(&id) {
            if let Some(p) = enc.participants.get_mut(&actor) {
                p.status = ParticipantStatus::Fleeing;
            }
            enc.refresh_state();
        }
        Ok(())
    }

    /// Take an actor out of its encounter (death handled elsewhere,
    /// disconnect, relocation). May resolve the encounter.
    pub fn remove_participant(&mut self, actor: ActorId, departure: Departure) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        if let Some(id) = self.encounter_of(actor) {
            if let Some(enc) = self.encounters.get_mut(&id) {
                enc.leave(actor, departure);
            }
            self.settle(id, &mut events);
        }
        events
    }

    /// Immediate damage outside the tick (offensive spells). Engages first.
    pub fn strike(
        &mut self,
        registry: &mut WorldRegistry,
        attacker: ActorId,
        target: ActorId,
        damage: u32,
    ) -> Result<Vec<CombatEvent>, WorldError> {
        let id = self.engage(registry, attacker, target)?;
        let mut events = Vec::new();
        let seq = &mut self.next_seq;
        if let Some(enc) = self.encounters.get_mut(&id) {
            land_damage(enc, registry, attacker, target, damage, seq, &mut events);
        }
        self.settle(id, &mut events);
        Ok(events)
    }

    /// One pass over every encounter.
    pub fn tick<R: Rng>(
        &mut self,
        registry: &mut WorldRegistry,
        registries: &Registries,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        let ids: Vec<EncounterId> = self.encounters.keys().copied().collect();
        for id in ids {
            self.tick_encounter(id, registry, registries, &mut *rng, now, &mut events);
            self.settle(id, &mut events);
        }
        events
    }

    fn tick_encounter<R: Rng>(
        &mut self,
        id: EncounterId,
        registry: &mut WorldRegistry,
        registries: &Registries,
        rng: &mut R,
        now: DateTime<Utc>,
        events: &mut Vec<CombatEvent>,
    ) {
        let policy = &self.policy;
        let seq = &mut self.next_seq;
        let Some(enc) = self.encounters.get_mut(&id) else {
            return;
        };
        let room = enc.room.clone();

        // anyone who vanished or wandered off is treated as having fled
        let stale: Vec<ActorId> = enc
            .participants
            .keys()
            .copied()
            .filter(|a| {
                registry
                    .actor(*a)
                    .map(|actor| actor.room() != room)
                    .unwrap_or(true)
            })
            .collect();
        for actor in stale {
            trace!("Dropping stale participant {} from {:?}", actor, id);
            let departure = if registry.actor(actor).is_some() {
                Departure::Fled
            } else {
                Departure::Disconnected
            };
            enc.leave(actor, departure);
        }

        for actor_id in enc.ordered() {
            let Some(part) = enc.participants.get(&actor_id).copied() else {
                continue; // died earlier this tick
            };
            let Some(actor) = registry.actor(actor_id) else {
                continue;
            };
            if !actor.is_alive() {
                continue;
            }
            if part.status == ParticipantStatus::Fleeing {
                if rng.gen_bool(policy.flee_chance) {
                    enc.leave(actor_id, Departure::Fled);
                    events.push(CombatEvent::FleeSucceeded {
                        room: room.clone(),
                        actor: actor_id,
                    });
                } else {
                    if let Some(p) = enc.participants.get_mut(&actor_id) {
                        p.status = ParticipantStatus::Active;
                    }
                    events.push(CombatEvent::FleeFailed {
                        room: room.clone(),
                        actor: actor_id,
                    });
                }
                continue;
            }
            if actor.status.is_stunned(now) {
                events.push(CombatEvent::Skipped {
                    room: room.clone(),
                    actor: actor_id,
                });
                continue;
            }
            let Some(target_id) = enc.pick_target(actor_id, registry, policy.tie_break) else {
                continue;
            };
            let (Some(attacker), Some(target)) = (registry.actor(actor_id), registry.actor(target_id))
            else {
                continue;
            };
            let atk = combat_profile(attacker, registries, policy);
            let def = combat_profile(target, registries, policy);

            let roll: i32 = rng.gen_range(1..=20);
            if roll + atk.attack_bonus - def.defense < policy.hit_threshold {
                events.push(CombatEvent::Miss {
                    room: room.clone(),
                    attacker: actor_id,
                    target: target_id,
                });
                continue;
            }
            let base = rng.gen_range(atk.damage.0..=atk.damage.1.max(atk.damage.0));
            let damage = (base + atk.damage_bonus).saturating_sub(def.mitigation).max(1);
            land_damage(enc, registry, actor_id, target_id, damage, seq, events);
        }
        enc.refresh_state();
    }

    /// Resolve the encounter once either side is empty.
    fn settle(&mut self, id: EncounterId, events: &mut Vec<CombatEvent>) {
        let Some(enc) = self.encounters.get_mut(&id) else {
            return;
        };
        if enc.side_present(Side::Players) && enc.side_present(Side::Mobs) {
            enc.refresh_state();
            return;
        }
        enc.state = EncounterState::Resolved;
        // a side emptied by fleeing or disconnecting is a draw
        let draw = enc.emptied_by != Some(Departure::Died);
        debug!(
            "Encounter {:?} in {} resolved ({})",
            id,
            enc.room,
            if draw { "draw" } else { "decided" }
        );
        events.push(CombatEvent::Resolved {
            encounter: id,
            room: enc.room.clone(),
            draw,
        });
        self.encounters.remove(&id);
    }
}

fn land_damage(
    enc: &mut Encounter,
    registry: &mut WorldRegistry,
    attacker: ActorId,
    target: ActorId,
    damage: u32,
    seq: &mut u64,
    events: &mut Vec<CombatEvent>,
) {
    let Some(victim) = registry.actor_mut(target) else {
        return;
    };
    victim.pools.health = victim.pools.health.saturating_sub(damage.min(i32::MAX as u32) as i32);
    let remaining = victim.pools.health;
    let xp_total = victim.mob().map(|m| m.xp_reward).unwrap_or(0);
    enc.add_threat(target, attacker, damage as u64, seq);
    events.push(CombatEvent::Hit {
        room: enc.room.clone(),
        attacker,
        target,
        damage,
        remaining,
    });
    if remaining > 0 {
        return;
    }

    let shares: Vec<(ActorId, u64)> = enc
        .threat
        .get(&target)
        .map(|t| {
            t.iter()
                .filter(|(id, e)| {
                    e.amount > 0 && registry.actor(**id).map(|a| a.is_player()).unwrap_or(false)
                })
                .map(|(id, e)| (*id, e.amount))
                .collect()
        })
        .unwrap_or_default();
    let experience = split_experience(xp_total, &shares);
    enc.leave(target, Departure::Died);
    events.push(CombatEvent::Died {
        room: enc.room.clone(),
        victim: target,
        killer: attacker,
        experience,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::city::{canonical_city, START_ROOM_ID};
    use crate::world::content::MobTemplate;
    use crate::world::types::{PlayerSnapshot, Room};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn arena() -> (WorldRegistry, Registries) {
        let mut reg = WorldRegistry::with_rooms(canonical_city());
        reg.insert_room(Room::new("f1:0", "Landing", "", 1));
        (reg, Registries::builtin())
    }

    fn player(reg: &mut WorldRegistry, name: &str) -> ActorId {
        let id = reg
            .spawn_player(PlayerSnapshot::new_player(name, START_ROOM_ID, Utc::now()), START_ROOM_ID)
            .unwrap();
        reg.relocate(id, "f1:0").unwrap();
        id
    }

    fn dummy(hp: i32, xp: u64) -> MobTemplate {
        MobTemplate {
            id: "dummy".into(),
            name: "training dummy".into(),
            level: 1,
            max_health: hp,
            attack_bonus: 0,
            defense: 0,
            damage_min: 1,
            damage_max: 1,
            mitigation: 0,
            xp_reward: xp,
            respawn_secs: 5,
            loot: vec![],
            min_floor: 1,
        }
    }

    fn always_hit() -> CombatPolicy {
        CombatPolicy {
            hit_threshold: -1000,
            ..CombatPolicy::default()
        }
    }

    #[test]
    fn seventy_thirty_threat_splits_xp_seventy_thirty() {
        let (mut reg, _) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        let mob = reg.spawn_mob(&dummy(100, 100), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());

        combat.strike(&mut reg, a, mob, 70).unwrap();
        let events = combat.strike(&mut reg, b, mob, 30).unwrap();
        let died = events
            .iter()
            .find_map(|e| match e {
                CombatEvent::Died { experience, .. } => Some(experience.clone()),
                _ => None,
            })
            .expect("mob died");
        assert_eq!(died, vec![(a, 70), (b, 30)]);
        assert!(events.iter().any(|e| matches!(e, CombatEvent::Resolved { draw: false, .. })));
        assert!(!combat.in_combat(a));
    }

    #[test]
    fn largest_remainder_is_deterministic() {
        let shares = [(ActorId(1), 1), (ActorId(2), 1), (ActorId(3), 1)];
        let split = split_experience(100, &shares);
        assert_eq!(split.iter().map(|(_, x)| x).sum::<u64>(), 100);
        assert_eq!(split, vec![(ActorId(1), 34), (ActorId(2), 33), (ActorId(3), 33)]);
        assert_eq!(split_experience(10, &[]), vec![]);
        assert_eq!(split_experience(7, &[(ActorId(4), 0)]), vec![(ActorId(4), 7)]);
    }

    #[test]
    fn mob_targets_highest_threat() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());
        combat.strike(&mut reg, a, mob, 2).unwrap();
        combat.strike(&mut reg, b, mob, 9).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let events = combat.tick(&mut reg, &contents, &mut rng, Utc::now());
        let mob_hit = events.iter().find_map(|e| match e {
            CombatEvent::Hit { attacker, target, .. } if *attacker == mob => Some(*target),
            _ => None,
        });
        assert_eq!(mob_hit, Some(b));
    }

    #[test]
    fn ties_go_to_earliest_engagement() {
        let (mut reg, _) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());
        combat.strike(&mut reg, b, mob, 5).unwrap();
        combat.strike(&mut reg, a, mob, 5).unwrap();
        let id = combat.encounter_of(mob).unwrap();
        let enc = combat.encounter(id).unwrap();
        assert_eq!(enc.threat_target(mob, &reg, TieBreak::EarliestEngaged), Some(b));
        assert_eq!(enc.threat_target(mob, &reg, TieBreak::LowestId), Some(a));
    }

    #[test]
    fn threat_never_decreases_across_ticks() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let mob = reg.spawn_mob(&dummy(10_000, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(CombatPolicy::default());
        combat.engage(&reg, a, mob).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let mut last = 0;
        for _ in 0..20 {
            combat.tick(&mut reg, &contents, &mut rng, Utc::now());
            reg.actor_mut(a).unwrap().pools.health = 30;
            let id = combat.encounter_of(mob).unwrap();
            let total = combat.encounter(id).unwrap().threat_total(mob);
            assert!(total >= last);
            last = total;
        }
    }

    #[test]
    fn stunned_mob_skips_its_action() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());
        combat.strike(&mut reg, a, mob, 1).unwrap();
        let now = Utc::now();
        reg.actor_mut(mob).unwrap().status.stunned_until = Some(now + chrono::Duration::seconds(5));
        let mut rng = StdRng::seed_from_u64(1);
        let events = combat.tick(&mut reg, &contents, &mut rng, now);
        assert!(events.contains(&CombatEvent::Skipped { room: "f1:0".into(), actor: mob }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CombatEvent::Hit { attacker, .. } if *attacker == mob)));
    }

    #[test]
    fn successful_flee_resolves_as_draw() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(CombatPolicy {
            flee_chance: 1.0,
            ..always_hit()
        });
        combat.engage(&reg, a, mob).unwrap();
        combat.request_flee(a).unwrap();
        let id = combat.encounter_of(a).unwrap();
        assert_eq!(combat.encounter(id).unwrap().state, EncounterState::Fleeing);

        let mut rng = StdRng::seed_from_u64(5);
        let events = combat.tick(&mut reg, &contents, &mut rng, Utc::now());
        assert!(events.contains(&CombatEvent::FleeSucceeded { room: "f1:0".into(), actor: a }));
        assert!(events.iter().any(|e| matches!(e, CombatEvent::Resolved { draw: true, .. })));
        assert!(!combat.in_combat(mob));
    }

    #[test]
    fn failed_flee_consumes_the_tick() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(CombatPolicy {
            flee_chance: 0.0,
            ..always_hit()
        });
        combat.engage(&reg, a, mob).unwrap();
        combat.request_flee(a).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let events = combat.tick(&mut reg, &contents, &mut rng, Utc::now());
        assert!(events.contains(&CombatEvent::FleeFailed { room: "f1:0".into(), actor: a }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, CombatEvent::Hit { attacker, .. } if *attacker == a)));
        assert!(combat.in_combat(a));
    }

    #[test]
    fn disconnect_drops_threat_and_resolves_empty_encounter() {
        let (mut reg, _) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        let mob = reg.spawn_mob(&dummy(500, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());
        combat.strike(&mut reg, a, mob, 4).unwrap();
        combat.strike(&mut reg, b, mob, 4).unwrap();

        assert!(combat.remove_participant(a, Departure::Disconnected).is_empty());
        let id = combat.encounter_of(mob).unwrap();
        assert!(combat.encounter(id).unwrap().threat_entry(mob, a).is_none());
        assert_eq!(combat.encounter(id).unwrap().threat_total(mob), 4);

        let events = combat.remove_participant(b, Departure::Disconnected);
        assert!(matches!(events.as_slice(), [CombatEvent::Resolved { draw: true, .. }]));
    }

    #[test]
    fn earlier_kill_does_not_decide_a_fight_that_ends_by_leaving() {
        let (mut reg, _) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        let rat = reg.spawn_mob(&dummy(50, 10), "f1:0").unwrap();
        let bat = reg.spawn_mob(&dummy(50, 10), "f1:0").unwrap();
        let mut combat = CombatEngine::new(always_hit());
        combat.engage(&reg, a, rat).unwrap();
        combat.engage(&reg, b, bat).unwrap();
        combat.engage(&reg, a, bat).unwrap();
        assert_eq!(combat.encounters().count(), 1);

        let events = combat.strike(&mut reg, a, rat, 100).unwrap();
        assert!(events.iter().any(|e| matches!(e, CombatEvent::Died { victim, .. } if *victim == rat)));
        assert!(combat.in_combat(bat));

        assert!(combat.remove_participant(a, Departure::Disconnected).is_empty());
        let events = combat.remove_participant(b, Departure::Disconnected);
        assert!(matches!(events.as_slice(), [CombatEvent::Resolved { draw: true, .. }]));
    }

    #[test]
    fn pvp_is_refused_and_encounters_merge() {
        let (mut reg, _) = arena();
        let a = player(&mut reg, "Ada");
        let b = player(&mut reg, "Bob");
        assert!(matches!(combat_engine().engage(&reg, a, b), Err(WorldError::NotEligible(_))));

        let rat = reg.spawn_mob(&dummy(50, 10), "f1:0").unwrap();
        let bat = reg.spawn_mob(&dummy(50, 10), "f1:0").unwrap();
        let mut combat = combat_engine();
        let first = combat.engage(&reg, a, rat).unwrap();
        let second = combat.engage(&reg, b, bat).unwrap();
        assert_ne!(first, second);
        let merged = combat.engage(&reg, a, bat).unwrap();
        assert_eq!(combat.encounters().count(), 1);
        for id in [a, b, rat, bat] {
            assert_eq!(combat.encounter_of(id), Some(merged));
        }
    }

    fn combat_engine() -> CombatEngine {
        CombatEngine::new(always_hit())
    }

    #[test]
    fn unarmed_and_armed_profiles() {
        let (mut reg, contents) = arena();
        let a = player(&mut reg, "Ada");
        let policy = CombatPolicy::default();
        let bare = combat_profile(reg.actor(a).unwrap(), &contents, &policy);
        assert_eq!(bare.damage, policy.unarmed_damage);
        reg.actor_mut(a).unwrap().player_mut().unwrap().equipment.weapon = Some("iron_sword".into());
        let armed = combat_profile(reg.actor(a).unwrap(), &contents, &policy);
        assert_eq!(armed.damage, (3, 7));
        assert_eq!(armed.attack_bonus, 2);
    }
}
