//! Spell cooldowns and mana accounting.
//!
//! Expiry timestamps live on the actor itself, so the check-and-commit in
//! [`try_consume`] runs under the same `&mut Actor` borrow that the world task
//! holds. Two casts queued back to back are applied one after the other and the
//! second one sees the first one's deduction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::world::errors::WorldError;
use crate::world::types::Actor;

/// Per-actor ability expiry table. Expired entries are pruned lazily.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownTable {
    expiries: BTreeMap<String, DateTime<Utc>>,
}

impl CooldownTable {
    /// Time left before `ability` can be used again, or `None` if ready.
    pub fn remaining(&self, ability: &str, now: DateTime<Utc>) -> Option<Duration> {
        let expiry = self.expiries.get(ability)?;
        if *expiry <= now {
            return None;
        }
        (*expiry - now).to_std().ok()
    }

    pub fn start(&mut self, ability: &str, now: DateTime<Utc>, cooldown: Duration) {
        let span = chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
        self.expiries.insert(ability.to_string(), now + span);
    }

    /// Drop entries whose expiry has passed. Returns how many were removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.expiries.len();
        self.expiries.retain(|_, expiry| *expiry > now);
        before - self.expiries.len()
    }

    pub fn len(&self) -> usize {
        self.expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expiries.is_empty()
    }
}

/// Check cooldown and mana, then commit both. Nothing changes on failure.
pub fn try_consume(
    actor: &mut Actor,
    ability: &str,
    ability_name: &str,
    mana_cost: i32,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Result<(), WorldError> {
    actor.cooldowns.prune(now);
    if let Some(remaining) = actor.cooldowns.remaining(ability, now) {
        return Err(WorldError::OnCooldown {
            ability: ability_name.to_string(),
            remaining,
        });
    }
    if actor.pools.mana < mana_cost {
        return Err(WorldError::InsufficientResource {
            resource: "mana",
            needed: mana_cost,
            available: actor.pools.mana,
        });
    }
    actor.pools.mana -= mana_cost;
    if !cooldown.is_zero() {
        actor.cooldowns.start(ability, now, cooldown);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::types::{ActorId, ActorKind, PlayerData, Pools, StatusFlags};

    fn caster(mana: i32) -> Actor {
        Actor {
            id: ActorId(1),
            name: "Ada".to_string(),
            room: "city:plaza".to_string(),
            pools: Pools {
                health: 30,
                max_health: 30,
                mana,
                max_mana: 20,
            },
            level: 1,
            status: StatusFlags::default(),
            cooldowns: CooldownTable::default(),
            kind: ActorKind::Player(PlayerData::new("ada", "city:plaza")),
        }
    }

    #[test]
    fn second_use_inside_window_is_on_cooldown() {
        let now = Utc::now();
        let mut actor = caster(20);
        try_consume(&mut actor, "spark", "Spark", 5, Duration::from_secs(4), now).unwrap();
        assert_eq!(actor.pools.mana, 15);

        let first = match try_consume(&mut actor, "spark", "Spark", 5, Duration::from_secs(4), now + chrono::Duration::milliseconds(500)) {
            Err(WorldError::OnCooldown { remaining, .. }) => remaining,
            other => panic!("expected cooldown, got {:?}", other),
        };
        let second = match try_consume(&mut actor, "spark", "Spark", 5, Duration::from_secs(4), now + chrono::Duration::milliseconds(1500)) {
            Err(WorldError::OnCooldown { remaining, .. }) => remaining,
            other => panic!("expected cooldown, got {:?}", other),
        };
        assert!(second < first);
        assert_eq!(actor.pools.mana, 15, "rejected casts must not spend mana");
    }

    #[test]
    fn insufficient_mana_leaves_cooldown_unset() {
        let now = Utc::now();
        let mut actor = caster(3);
        let err = try_consume(&mut actor, "spark", "Spark", 5, Duration::from_secs(4), now).unwrap_err();
        assert!(matches!(err, WorldError::InsufficientResource { needed: 5, available: 3, .. }));
        assert!(actor.cooldowns.remaining("spark", now).is_none());
        assert_eq!(actor.pools.mana, 3);
    }

    #[test]
    fn burst_of_casts_cannot_double_spend() {
        let now = Utc::now();
        let mut actor = caster(10);
        let results: Vec<_> = (0..4)
            .map(|_| try_consume(&mut actor, "nova", "Nova", 8, Duration::ZERO, now))
            .collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(actor.pools.mana, 2);
    }

    #[test]
    fn expired_entries_are_pruned() {
        let now = Utc::now();
        let mut table = CooldownTable::default();
        table.start("a", now, Duration::from_secs(1));
        table.start("b", now, Duration::from_secs(10));
        assert_eq!(table.prune(now + chrono::Duration::seconds(2)), 1);
        assert_eq!(table.len(), 1);
    }
}
