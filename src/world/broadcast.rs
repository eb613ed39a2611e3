//! Message routing between sessions.
//!
//! Every line for a session goes through that session's unbounded outbound
//! queue. The world task is the only producer, so lines accepted for one room
//! reach every occupant in the same order. Chat text is filtered, then rate
//! limited, then delivered to everyone who is not ignoring the sender.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, trace};
use tokio::sync::mpsc;

use crate::logutil::escape_log;
use crate::metrics;
use crate::world::errors::WorldError;
use crate::world::filters::ChatFilter;
use crate::world::registry::WorldRegistry;
use crate::world::types::{Actor, ActorId};

const HASHER: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// One item on a session's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Line(String),
    /// Send the reason, then close the connection.
    Close(String),
}

pub type SessionSink = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatLimits {
    pub window: Duration,
    pub max_messages: usize,
    pub block_repeats: bool,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            window: Duration::seconds(10),
            max_messages: 5,
            block_repeats: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitReason {
    Flood { limit: usize, window_secs: i64 },
    Repeat,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitReason::Flood { limit, window_secs } => write!(
                f,
                "You are talking too fast (limit {} messages per {}s). Slow down.",
                limit, window_secs
            ),
            RateLimitReason::Repeat => write!(f, "You just said that."),
        }
    }
}

#[derive(Debug, Default)]
struct ChatWindow {
    sent: VecDeque<DateTime<Utc>>,
    last_hash: Option<u32>,
}

/// Sliding-window flood and repeat detection per actor.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: ChatLimits,
    windows: HashMap<ActorId, ChatWindow>,
}

impl RateLimiter {
    pub fn new(limits: ChatLimits) -> Self {
        Self {
            limits,
            windows: HashMap::new(),
        }
    }

    /// Record a message if allowed. Rejected messages do not count.
    pub fn check(&mut self, actor: ActorId, text: &str, now: DateTime<Utc>) -> Result<(), RateLimitReason> {
        let limits = self.limits;
        let window = self.windows.entry(actor).or_default();
        while let Some(front) = window.sent.front() {
            if now.signed_duration_since(*front) >= limits.window {
                window.sent.pop_front();
            } else {
                break;
            }
        }
        if window.sent.len() >= limits.max_messages {
            return Err(RateLimitReason::Flood {
                limit: limits.max_messages,
                window_secs: limits.window.num_seconds(),
            });
        }
        let hash = HASHER.checksum(text.trim().to_lowercase().as_bytes());
        if limits.block_repeats && window.last_hash == Some(hash) {
            return Err(RateLimitReason::Repeat);
        }
        window.sent.push_back(now);
        window.last_hash = Some(hash);
        Ok(())
    }

    pub fn forget(&mut self, actor: ActorId) {
        self.windows.remove(&actor);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// Accepted. `recipients` excludes the sender and anyone ignoring them.
    Delivered { recipients: usize },
    /// Rejected by the limiter; the sender was warned.
    Suppressed(RateLimitReason),
}

pub struct BroadcastRouter {
    sinks: HashMap<ActorId, SessionSink>,
    limiter: RateLimiter,
    filter: Arc<dyn ChatFilter>,
}

impl BroadcastRouter {
    pub fn new(limits: ChatLimits, filter: Arc<dyn ChatFilter>) -> Self {
        Self {
            sinks: HashMap::new(),
            limiter: RateLimiter::new(limits),
            filter,
        }
    }

    /// Bind an actor to a session queue, replacing any previous one.
    pub fn attach(&mut self, actor: ActorId, sink: SessionSink) -> Option<SessionSink> {
        self.sinks.insert(actor, sink)
    }

    pub fn detach(&mut self, actor: ActorId) -> Option<SessionSink> {
        self.limiter.forget(actor);
        self.sinks.remove(&actor)
    }

    pub fn is_attached(&self, actor: ActorId) -> bool {
        self.sinks.contains_key(&actor)
    }

    pub fn sink(&self, actor: ActorId) -> Option<&SessionSink> {
        self.sinks.get(&actor)
    }

    pub fn to_actor(&self, actor: ActorId, line: impl Into<String>) {
        if let Some(sink) = self.sinks.get(&actor) {
            if sink.send(Outbound::Line(line.into())).is_err() {
                trace!("Outbound queue for {} is closed", actor);
            }
        }
    }

    pub fn close(&self, actor: ActorId, reason: impl Into<String>) {
        if let Some(sink) = self.sinks.get(&actor) {
            let _ = sink.send(Outbound::Close(reason.into()));
        }
    }

    /// Deliver to every occupant of `room` except those in `exclude`.
    pub fn to_room(&self, registry: &WorldRegistry, room: &str, line: &str, exclude: &[ActorId]) -> usize {
        let mut delivered = 0;
        for id in registry.occupants_of(room) {
            if exclude.contains(&id) {
                continue;
            }
            if self.sinks.contains_key(&id) {
                self.to_actor(id, line);
                delivered += 1;
            }
        }
        delivered
    }

    fn ignores(registry: &WorldRegistry, listener: ActorId, speaker: &str) -> bool {
        registry
            .actor(listener)
            .and_then(Actor::player)
            .map(|p| p.is_ignoring(speaker))
            .unwrap_or(false)
    }

    /// Filter and rate-limit chat text. On rejection the sender is warned.
    fn admit(&mut self, sender: ActorId, text: &str, now: DateTime<Utc>) -> Result<String, RateLimitReason> {
        let (filtered, matched) = self.filter.filter(text.trim());
        if matched {
            debug!("Chat filter masked text from {}", sender);
        }
        match self.limiter.check(sender, &filtered, now) {
            Ok(()) => Ok(filtered),
            Err(reason) => {
                metrics::inc_chat_suppressed();
                debug!("Suppressed chat from {}: {:?}", sender, reason);
                self.to_actor(sender, reason.to_string());
                Err(reason)
            }
        }
    }

    fn speaker(registry: &WorldRegistry, sender: ActorId) -> Result<(String, String), WorldError> {
        let actor = registry
            .actor(sender)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", sender)))?;
        Ok((actor.name.clone(), actor.room().to_string()))
    }

    /// Deliver `line` to listeners in `listeners` who are not ignoring `name`.
    fn fan_out(&self, registry: &WorldRegistry, listeners: Vec<ActorId>, sender: ActorId, name: &str, line: &str) -> usize {
        let mut delivered = 0;
        for id in listeners {
            if id == sender || !self.sinks.contains_key(&id) {
                continue;
            }
            if Self::ignores(registry, id, name) {
                trace!("{} ignores {}; not delivering", id, name);
                continue;
            }
            self.to_actor(id, line);
            delivered += 1;
        }
        delivered
    }

    pub fn say(&mut self, registry: &WorldRegistry, sender: ActorId, text: &str, now: DateTime<Utc>) -> Result<ChatOutcome, WorldError> {
        let (name, room) = Self::speaker(registry, sender)?;
        let text = match self.admit(sender, text, now) {
            Ok(text) => text,
            Err(reason) => return Ok(ChatOutcome::Suppressed(reason)),
        };
        debug!("{} says in {}: {}", name, room, escape_log(&text));
        self.to_actor(sender, format!("You say, \"{}\"", text));
        let line = format!("{} says, \"{}\"", name, text);
        let recipients = self.fan_out(registry, registry.occupants_of(&room), sender, &name, &line);
        Ok(ChatOutcome::Delivered { recipients })
    }

    pub fn emote(&mut self, registry: &WorldRegistry, sender: ActorId, text: &str, now: DateTime<Utc>) -> Result<ChatOutcome, WorldError> {
        let (name, room) = Self::speaker(registry, sender)?;
        let text = match self.admit(sender, text, now) {
            Ok(text) => text,
            Err(reason) => return Ok(ChatOutcome::Suppressed(reason)),
        };
        let line = format!("{} {}", name, text);
        self.to_actor(sender, line.clone());
        let recipients = self.fan_out(registry, registry.occupants_of(&room), sender, &name, &line);
        Ok(ChatOutcome::Delivered { recipients })
    }

    /// Everyone on the sender's floor.
    pub fn shout(&mut self, registry: &WorldRegistry, sender: ActorId, text: &str, now: DateTime<Utc>) -> Result<ChatOutcome, WorldError> {
        let (name, room) = Self::speaker(registry, sender)?;
        let floor = registry
            .room(&room)
            .map(|r| r.floor)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", room)))?;
        let text = match self.admit(sender, text, now) {
            Ok(text) => text,
            Err(reason) => return Ok(ChatOutcome::Suppressed(reason)),
        };
        debug!("{} shouts on floor {}: {}", name, floor, escape_log(&text));
        self.to_actor(sender, format!("You shout, \"{}\"", text));
        let line = format!("{} shouts, \"{}\"", name, text);
        let recipients = self.fan_out(registry, registry.players_on_floor(floor), sender, &name, &line);
        Ok(ChatOutcome::Delivered { recipients })
    }

    /// Private message. The sender sees the same confirmation whether or not
    /// the recipient is ignoring them.
    pub fn tell(
        &mut self,
        registry: &WorldRegistry,
        sender: ActorId,
        target_name: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatOutcome, WorldError> {
        let (name, _) = Self::speaker(registry, sender)?;
        let target = registry
            .player_id(target_name)
            .filter(|id| self.sinks.contains_key(id))
            .ok_or_else(|| WorldError::NotFound(format!("anyone called {} online", target_name.trim())))?;
        if target == sender {
            return Err(WorldError::NotEligible("Talking to yourself again?".to_string()));
        }
        let text = match self.admit(sender, text, now) {
            Ok(text) => text,
            Err(reason) => return Ok(ChatOutcome::Suppressed(reason)),
        };
        let target_display = registry
            .actor(target)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| target_name.to_string());
        self.to_actor(sender, format!("You tell {}, \"{}\"", target_display, text));
        let recipients = self.fan_out(
            registry,
            vec![target],
            sender,
            &name,
            &format!("{} tells you, \"{}\"", name, text),
        );
        Ok(ChatOutcome::Delivered { recipients })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::city::{canonical_city, START_ROOM_ID};
    use crate::world::filters::WordListFilter;
    use crate::world::types::PlayerSnapshot;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(names: &[&str]) -> (WorldRegistry, BroadcastRouter, Vec<(ActorId, UnboundedReceiver<Outbound>)>) {
        let mut reg = WorldRegistry::with_rooms(canonical_city());
        let mut router = BroadcastRouter::new(ChatLimits::default(), Arc::new(WordListFilter::new(["darn"])));
        let mut out = Vec::new();
        for name in names {
            let id = reg
                .spawn_player(PlayerSnapshot::new_player(name, START_ROOM_ID, Utc::now()), START_ROOM_ID)
                .unwrap();
            let (tx, rx) = mpsc::unbounded_channel();
            router.attach(id, tx);
            out.push((id, rx));
        }
        (reg, router, out)
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Outbound::Line(l)) = rx.try_recv() {
            lines.push(l);
        }
        lines
    }

    #[test]
    fn say_reaches_room_in_order() {
        let (reg, mut router, mut s) = setup(&["Ada", "Bob"]);
        let ada = s[0].0;
        let now = Utc::now();
        router.say(&reg, ada, "one", now).unwrap();
        router.say(&reg, ada, "two", now).unwrap();
        assert_eq!(drain(&mut s[1].1), vec!["Ada says, \"one\"", "Ada says, \"two\""]);
        assert_eq!(drain(&mut s[0].1), vec!["You say, \"one\"", "You say, \"two\""]);
    }

    #[test]
    fn filter_runs_before_delivery() {
        let (reg, mut router, mut s) = setup(&["Ada", "Bob"]);
        router.say(&reg, s[0].0, "well darn", Utc::now()).unwrap();
        assert_eq!(drain(&mut s[1].1), vec!["Ada says, \"well ****\""]);
    }

    #[test]
    fn sixth_message_in_window_is_suppressed() {
        let (reg, mut router, mut s) = setup(&["Ada", "Bob"]);
        let ada = s[0].0;
        let now = Utc::now();
        let outcomes: Vec<ChatOutcome> = (0..6)
            .map(|i| router.say(&reg, ada, &format!("msg {}", i), now).unwrap())
            .collect();
        assert!(matches!(outcomes[5], ChatOutcome::Suppressed(RateLimitReason::Flood { .. })));
        assert_eq!(drain(&mut s[1].1).len(), 5);

        let later = now + Duration::seconds(11);
        assert!(matches!(
            router.say(&reg, ada, "fresh", later).unwrap(),
            ChatOutcome::Delivered { .. }
        ));
    }

    #[test]
    fn identical_message_twice_is_blocked() {
        let (reg, mut router, mut s) = setup(&["Ada", "Bob"]);
        let ada = s[0].0;
        let now = Utc::now();
        router.say(&reg, ada, "hello", now).unwrap();
        let second = router.say(&reg, ada, "hello", now).unwrap();
        assert_eq!(second, ChatOutcome::Suppressed(RateLimitReason::Repeat));
        let ada_lines = drain(&mut s[0].1);
        assert_eq!(ada_lines.last().map(String::as_str), Some("You just said that."));
    }

    #[test]
    fn ignored_tell_still_looks_delivered() {
        let (mut reg, mut router, mut s) = setup(&["Ada", "Bob"]);
        let (ada, bob) = (s[0].0, s[1].0);
        reg.actor_mut(ada).unwrap().player_mut().unwrap().ignored.insert("bob".into());

        router.tell(&reg, bob, "ada", "psst", Utc::now()).unwrap();
        assert_eq!(drain(&mut s[1].1), vec!["You tell Ada, \"psst\""]);
        assert!(drain(&mut s[0].1).is_empty());

        router.say(&reg, bob, "hello all", Utc::now()).unwrap();
        assert!(drain(&mut s[0].1).is_empty());
    }

    #[test]
    fn shout_is_floor_scoped() {
        let (mut reg, mut router, mut s) = setup(&["Ada", "Bob", "Cyd"]);
        reg.insert_room(crate::world::types::Room::new("f1:0", "Landing", "", 1));
        let cyd = s[2].0;
        reg.relocate(cyd, "f1:0").unwrap();
        reg.relocate(s[1].0, "city:market").unwrap();
        router.shout(&reg, s[0].0, "anyone?", Utc::now()).unwrap();
        assert_eq!(drain(&mut s[1].1), vec!["Ada shouts, \"anyone?\""]);
        assert!(drain(&mut s[2].1).is_empty());
    }

    #[test]
    fn tell_to_offline_player_is_not_found() {
        let (reg, mut router, s) = setup(&["Ada"]);
        assert!(matches!(
            router.tell(&reg, s[0].0, "nobody", "hi", Utc::now()),
            Err(WorldError::NotFound(_))
        ));
    }
}
