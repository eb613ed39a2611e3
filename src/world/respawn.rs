//! Mob respawn timers.
//!
//! Each defeated mob instance gets exactly one timer keyed by its (now dead)
//! actor id. Fire time is `median * (1 ± jitter)` with the jitter fraction
//! capped at 1.0, so a respawn never takes longer than twice the median.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;

use crate::world::types::{ActorId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RespawnTimer {
    /// Id of the defeated instance this timer replaces.
    pub key: ActorId,
    pub template: String,
    pub origin: RoomId,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct RespawnScheduler {
    jitter: f64,
    queue: BinaryHeap<Reverse<(DateTime<Utc>, ActorId)>>,
    timers: BTreeMap<ActorId, RespawnTimer>,
}

impl RespawnScheduler {
    pub fn new(jitter: f64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Earliest and latest possible fire offsets for a median delay.
    pub fn window(&self, median: Duration) -> (Duration, Duration) {
        (
            median.mul_f64(1.0 - self.jitter),
            median.mul_f64(1.0 + self.jitter),
        )
    }

    /// Schedule a respawn. Returns `None` if `key` already has a timer.
    pub fn schedule<R: Rng>(
        &mut self,
        key: ActorId,
        template: &str,
        origin: &str,
        median: Duration,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<DateTime<Utc>> {
        if self.timers.contains_key(&key) {
            return None;
        }
        let factor = if self.jitter > 0.0 {
            1.0 + rng.gen_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        let delay = median.mul_f64(factor.max(0.0));
        let fire_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        debug!(
            "Respawn of {} ({}) in {} scheduled for {}",
            template,
            key,
            origin,
            fire_at.format("%H:%M:%S%.3f")
        );
        self.queue.push(Reverse((fire_at, key)));
        self.timers.insert(
            key,
            RespawnTimer {
                key,
                template: template.to_string(),
                origin: origin.to_string(),
                fire_at,
            },
        );
        Some(fire_at)
    }

    /// Remove and return every timer whose fire time has passed, earliest first.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<RespawnTimer> {
        let mut fired = Vec::new();
        while let Some(Reverse((at, key))) = self.queue.peek().copied() {
            if at > now {
                break;
            }
            self.queue.pop();
            if let Some(timer) = self.timers.remove(&key) {
                fired.push(timer);
            }
        }
        fired
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|Reverse((at, _))| *at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fire_times_stay_inside_window() {
        let mut sched = RespawnScheduler::new(0.5);
        let mut rng = StdRng::seed_from_u64(9);
        let now = Utc::now();
        let median = Duration::from_secs(10);
        for i in 0..200 {
            let at = sched
                .schedule(ActorId(i), "giant_rat", "f1:0", median, now, &mut rng)
                .unwrap();
            let offset = (at - now).to_std().unwrap();
            assert!(offset >= Duration::from_secs(5) && offset <= Duration::from_secs(15));
        }
        assert_eq!(sched.pending(), 200);
    }

    #[test]
    fn jitter_is_capped_at_double_median() {
        let sched = RespawnScheduler::new(3.0);
        assert_eq!(sched.jitter(), 1.0);
        let (lo, hi) = sched.window(Duration::from_secs(5));
        assert_eq!(lo, Duration::ZERO);
        assert_eq!(hi, Duration::from_secs(10));
    }

    #[test]
    fn one_timer_per_defeated_instance() {
        let mut sched = RespawnScheduler::new(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();
        assert!(sched
            .schedule(ActorId(4), "kobold", "f2:1", Duration::from_secs(1), now, &mut rng)
            .is_some());
        assert!(sched
            .schedule(ActorId(4), "kobold", "f2:1", Duration::from_secs(1), now, &mut rng)
            .is_none());

        assert!(sched.due(now).is_empty());
        let fired = sched.due(now + chrono::Duration::seconds(2));
        assert_eq!(fired.len(), 1);
        assert!(sched.due(now + chrono::Duration::seconds(3)).is_empty());
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn due_returns_earliest_first() {
        let mut sched = RespawnScheduler::new(0.0);
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();
        sched.schedule(ActorId(1), "a", "r", Duration::from_secs(5), now, &mut rng);
        sched.schedule(ActorId(2), "b", "r", Duration::from_secs(2), now, &mut rng);
        assert_eq!(sched.next_fire(), Some(now + chrono::Duration::seconds(2)));
        let fired = sched.due(now + chrono::Duration::seconds(10));
        let keys: Vec<ActorId> = fired.iter().map(|t| t.key).collect();
        assert_eq!(keys, vec![ActorId(2), ActorId(1)]);
    }
}
