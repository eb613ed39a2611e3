//! The single-writer world task.
//!
//! Connection tasks, tick clocks and the persistence worker only ever send
//! [`WorldEvent`]s into one unbounded intake queue. [`World::run`] drains that
//! queue in arrival order and is the only code that touches the registry,
//! encounters, respawn timers or chat state. Each event is applied behind a
//! panic guard so one faulty event is logged and skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::logutil::escape_log;
use crate::metrics;
use crate::world::broadcast::{BroadcastRouter, ChatLimits, Outbound, SessionSink};
use crate::world::city::START_ROOM_ID;
use crate::world::clock::Clock;
use crate::world::combat::{CombatEngine, CombatEvent, CombatPolicy};
use crate::world::content::Registries;
use crate::world::errors::WorldError;
use crate::world::filters::ChatFilter;
use crate::world::generator::{Floor, FloorGenerator};
use crate::world::persistence::{PersistenceCoordinator, PersistenceHandle};
use crate::world::registry::{snapshot_actor, MoveOutcome, WorldRegistry};
use crate::world::respawn::RespawnScheduler;
use crate::world::types::{ActorId, Direction, PlayerSnapshot, RoomId, TowerState, TOWER_STATE_VERSION};

/// Identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

#[derive(Debug)]
pub enum WorldEvent {
    /// An authenticated session wants to play `name`.
    Connected {
        session: SessionId,
        name: String,
        sink: SessionSink,
    },
    /// Reply from the persistence worker to a login load.
    PlayerLoaded {
        session: SessionId,
        name: String,
        result: Result<Option<PlayerSnapshot>, String>,
    },
    Command {
        session: SessionId,
        line: String,
    },
    Disconnected {
        session: SessionId,
    },
    CombatTick,
    RespawnTick,
    AutosaveTick,
    FloorGenerated {
        floor: u32,
        result: Result<Floor, WorldError>,
    },
    PersistenceFailed {
        snapshot: PlayerSnapshot,
    },
    /// Save everything, then signal `done` once the store has flushed.
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

impl WorldEvent {
    pub fn label(&self) -> &'static str {
        match self {
            WorldEvent::Connected { .. } => "connected",
            WorldEvent::PlayerLoaded { .. } => "player-loaded",
            WorldEvent::Command { .. } => "command",
            WorldEvent::Disconnected { .. } => "disconnected",
            WorldEvent::CombatTick => "combat-tick",
            WorldEvent::RespawnTick => "respawn-tick",
            WorldEvent::AutosaveTick => "autosave-tick",
            WorldEvent::FloorGenerated { .. } => "floor-generated",
            WorldEvent::PersistenceFailed { .. } => "persistence-failed",
            WorldEvent::Shutdown { .. } => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub server_name: String,
    pub motd: String,
    pub start_room: String,
    pub tower_seed: u64,
    pub combat: CombatPolicy,
    pub chat: ChatLimits,
    pub respawn_jitter: f64,
    /// Used for templates that do not set their own delay.
    pub default_respawn: Duration,
    /// Fixed seed for reproducible combat; random when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            server_name: "TowerMUD".to_string(),
            motd: String::new(),
            start_room: START_ROOM_ID.to_string(),
            tower_seed: 1,
            combat: CombatPolicy::default(),
            chat: ChatLimits::default(),
            respawn_jitter: 0.5,
            default_respawn: Duration::from_secs(60),
            rng_seed: None,
        }
    }
}

/// What the world knows about one connection.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) name: String,
    /// `None` while the player's snapshot is still loading.
    pub(crate) actor: Option<ActorId>,
    pub(crate) sink: SessionSink,
}

/// Collaborators handed to [`World::new`].
pub struct WorldDeps {
    pub registries: Arc<Registries>,
    pub generator: Arc<dyn FloorGenerator>,
    pub filter: Arc<dyn ChatFilter>,
    pub clock: Arc<dyn Clock>,
    pub persistence: PersistenceHandle,
    /// Sender side of the world's own intake queue.
    pub intake: mpsc::UnboundedSender<WorldEvent>,
}

pub struct World {
    pub(crate) settings: WorldSettings,
    pub(crate) registry: WorldRegistry,
    pub(crate) registries: Arc<Registries>,
    pub(crate) combat: CombatEngine,
    pub(crate) respawn: RespawnScheduler,
    pub(crate) router: BroadcastRouter,
    pub(crate) persistence: PersistenceCoordinator,
    pub(crate) generator: Arc<dyn FloorGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: StdRng,
    pub(crate) intake: mpsc::UnboundedSender<WorldEvent>,
    pub(crate) sessions: HashMap<SessionId, SessionState>,
    pub(crate) actor_sessions: HashMap<ActorId, SessionId>,
    /// Players waiting at a stairwell for the floor above to be generated.
    pub(crate) pending_climbs: BTreeMap<u32, Vec<PendingClimb>>,
    pub(crate) generating: BTreeSet<u32>,
}

/// A climb parked until its floor exists. Only replayed from `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingClimb {
    pub actor: ActorId,
    pub from: RoomId,
    pub direction: Direction,
}

/// Experience needed to reach `level + 1`.
pub fn next_level_xp(level: u32) -> u64 {
    100 * (level as u64).pow(2)
}

impl World {
    pub fn new(settings: WorldSettings, registry: WorldRegistry, deps: WorldDeps) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            combat: CombatEngine::new(settings.combat.clone()),
            respawn: RespawnScheduler::new(settings.respawn_jitter),
            router: BroadcastRouter::new(settings.chat, deps.filter),
            persistence: PersistenceCoordinator::new(deps.persistence),
            registries: deps.registries,
            generator: deps.generator,
            clock: deps.clock,
            intake: deps.intake,
            rng,
            registry,
            settings,
            sessions: HashMap::new(),
            actor_sessions: HashMap::new(),
            pending_climbs: BTreeMap::new(),
            generating: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &WorldRegistry {
        &self.registry
    }

    pub fn combat(&self) -> &CombatEngine {
        &self.combat
    }

    pub fn respawn(&self) -> &RespawnScheduler {
        &self.respawn
    }

    pub fn persistence(&self) -> &PersistenceCoordinator {
        &self.persistence
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn session_actor(&self, session: SessionId) -> Option<ActorId> {
        self.sessions.get(&session).and_then(|s| s.actor)
    }

    pub fn online_count(&self) -> usize {
        self.actor_sessions.len()
    }

    /// Rebuild generated floors from a saved tower (or pre-generate
    /// `initial_floors` for a fresh one). Runs before the event loop starts.
    pub fn restore(&mut self, tower: Option<TowerState>, initial_floors: u32) -> Result<u32, WorldError> {
        let (seed, highest) = match &tower {
            Some(state) => (state.seed, state.highest_floor.max(initial_floors)),
            None => (self.settings.tower_seed, initial_floors),
        };
        self.settings.tower_seed = seed;
        for number in 1..=highest {
            let floor = self.generator.generate(seed, number)?;
            self.registry.install_floor(floor, &self.registries);
        }
        if let Some(state) = tower {
            let restored = self.registry.restore_ground_items(&state.ground_items);
            debug!("Restored ground items in {} rooms", restored);
        }
        info!("World ready: seed {}, {} floor(s) above the city", seed, highest);
        Ok(highest)
    }

    pub fn tower_state(&self) -> TowerState {
        TowerState {
            seed: self.settings.tower_seed,
            highest_floor: self.registry.highest_floor(),
            ground_items: self.registry.ground_items(),
            saved_at: self.clock.now(),
            schema_version: TOWER_STATE_VERSION,
        }
    }

    /// Drain the intake queue until shutdown or until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorldEvent>) {
        info!("World task started");
        while let Some(event) = rx.recv().await {
            let label = event.label();
            match panic::catch_unwind(AssertUnwindSafe(|| self.handle_event(event))) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(_) => {
                    metrics::inc_event_panics();
                    error!("World event '{}' panicked; skipped", label);
                }
            }
        }
        info!("World task stopped");
    }

    pub fn handle_event(&mut self, event: WorldEvent) -> Flow {
        match event {
            WorldEvent::Connected {
                session,
                name,
                sink,
            } => self.on_connected(session, name, sink),
            WorldEvent::PlayerLoaded {
                session,
                name,
                result,
            } => self.on_player_loaded(session, name, result),
            WorldEvent::Command { session, line } => self.on_command(session, &line),
            WorldEvent::Disconnected { session } => self.on_disconnected(session),
            WorldEvent::CombatTick => self.on_combat_tick(),
            WorldEvent::RespawnTick => self.on_respawn_tick(),
            WorldEvent::AutosaveTick => self.on_autosave(),
            WorldEvent::FloorGenerated { floor, result } => self.on_floor_generated(floor, result),
            WorldEvent::PersistenceFailed { snapshot } => {
                warn!("Will retry save of {} on next autosave", snapshot.name);
                self.persistence.record_failure(snapshot);
            }
            WorldEvent::Shutdown { done } => {
                self.on_shutdown(done);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn on_connected(&mut self, session: SessionId, name: String, sink: SessionSink) {
        if let Some(actor) = self.registry.player_id(&name) {
            self.take_over(actor, session, sink);
            return;
        }
        // a second login racing the first one's load replaces it
        let racing: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.actor.is_none() && s.name.eq_ignore_ascii_case(&name))
            .map(|(id, _)| *id)
            .collect();
        for old in racing {
            if let Some(state) = self.sessions.remove(&old) {
                let _ = state
                    .sink
                    .send(Outbound::Close("Another connection logged in as you.".to_string()));
            }
        }

        let _ = sink.send(Outbound::Line("Loading your character...".to_string()));
        self.sessions.insert(
            session,
            SessionState {
                name: name.clone(),
                actor: None,
                sink,
            },
        );
        if let Some(snapshot) = self.persistence.take_retry(&name) {
            debug!("Using unsaved snapshot for {}", name);
            self.enter_world(session, snapshot);
            return;
        }
        if let Err(e) = self.persistence.handle().load_for_session(session, &name) {
            error!("Cannot load {}: {}", name, e);
            if let Some(state) = self.sessions.remove(&session) {
                let _ = state
                    .sink
                    .send(Outbound::Close("The world is not accepting logins right now.".to_string()));
            }
        }
    }

    fn take_over(&mut self, actor: ActorId, session: SessionId, sink: SessionSink) {
        let name = self
            .registry
            .actor(actor)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        info!("{} reconnected; taking over the existing character", name);
        if let Some(old) = self.actor_sessions.insert(actor, session) {
            self.sessions.remove(&old);
        }
        if let Some(old_sink) = self.router.attach(actor, sink.clone()) {
            let _ = old_sink.send(Outbound::Close(
                "Your character was claimed by a new connection.".to_string(),
            ));
        }
        self.sessions.insert(
            session,
            SessionState {
                name,
                actor: Some(actor),
                sink,
            },
        );
        self.router.to_actor(actor, "You take back control of your character.");
        self.show_room(actor);
    }

    fn on_player_loaded(
        &mut self,
        session: SessionId,
        name: String,
        result: Result<Option<PlayerSnapshot>, String>,
    ) {
        match self.sessions.get(&session) {
            Some(state) if state.actor.is_none() => {}
            _ => {
                debug!("Dropping stale load of {} for session {}", name, session);
                return;
            }
        }
        let now = self.clock.now();
        // a save that failed after this load was queued is newer than the store
        let unsaved = self.persistence.take_retry(&name);
        let snapshot = match (result, unsaved) {
            (Ok(Some(stored)), Some(unsaved)) if unsaved.saved_at >= stored.saved_at => {
                debug!("Using unsaved snapshot for {}", name);
                unsaved
            }
            (Ok(Some(stored)), _) => stored,
            (_, Some(unsaved)) => {
                debug!("Using unsaved snapshot for {}", name);
                unsaved
            }
            (Ok(None), None) => {
                info!("New character {}", name);
                PlayerSnapshot::new_player(&name, &self.settings.start_room, now)
            }
            (Err(e), None) => {
                error!("Load of {} failed: {}", name, e);
                if let Some(state) = self.sessions.remove(&session) {
                    let _ = state
                        .sink
                        .send(Outbound::Close("Your character could not be loaded.".to_string()));
                }
                return;
            }
        };
        self.enter_world(session, snapshot);
    }

    fn enter_world(&mut self, session: SessionId, mut snapshot: PlayerSnapshot) {
        if let Some(existing) = self.registry.player_id(&snapshot.name) {
            if let Some(state) = self.sessions.remove(&session) {
                self.take_over(existing, session, state.sink);
            }
            return;
        }
        if snapshot.pools.health <= 0 {
            snapshot.pools.restore();
        }
        let actor = match self
            .registry
            .spawn_player(snapshot, &self.settings.start_room)
        {
            Ok(actor) => actor,
            Err(e) => {
                error!("Could not place player: {}", e);
                if let Some(state) = self.sessions.remove(&session) {
                    let _ = state
                        .sink
                        .send(Outbound::Close("The world could not place you.".to_string()));
                }
                return;
            }
        };
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        state.actor = Some(actor);
        self.router.attach(actor, state.sink.clone());
        self.actor_sessions.insert(actor, session);
        metrics::inc_sessions_active();

        let name = self.actor_name(actor);
        info!("{} entered the world (session {})", name, session);
        self.router
            .to_actor(actor, format!("Welcome to {}, {}!", self.settings.server_name, name));
        if !self.settings.motd.is_empty() {
            self.router.to_actor(actor, self.settings.motd.clone());
        }
        if let Some(room) = self.registry.actor(actor).map(|a| a.room().to_string()) {
            self.note_city(actor, &room);
            self.router
                .to_room(&self.registry, &room, &format!("{} arrives.", name), &[actor]);
        }
        self.show_room(actor);
    }

    fn on_command(&mut self, session: SessionId, line: &str) {
        let Some(state) = self.sessions.get(&session) else {
            debug!("Command from unknown session {} ignored", session);
            return;
        };
        let Some(actor) = state.actor else {
            let _ = state
                .sink
                .send(Outbound::Line("Still loading, one moment...".to_string()));
            return;
        };
        if self.registry.actor(actor).is_none() {
            return;
        }
        match self.apply_command(actor, line) {
            Ok(()) => metrics::inc_commands_applied(),
            Err(e) => {
                metrics::inc_commands_rejected();
                if e.is_user_facing() {
                    debug!("Rejected '{}' from {}: {}", escape_log(line), actor, e);
                } else {
                    error!("Command '{}' from {} failed: {}", escape_log(line), actor, e);
                }
                self.router.to_actor(actor, e.user_message());
            }
        }
    }

    fn on_disconnected(&mut self, session: SessionId) {
        let Some(state) = self.sessions.remove(&session) else {
            return;
        };
        let Some(actor) = state.actor else {
            debug!("Session {} closed during login", session);
            return;
        };
        if self.actor_sessions.get(&actor) != Some(&session) {
            // already taken over by a newer session
            return;
        }
        self.actor_sessions.remove(&actor);
        self.router.detach(actor);
        metrics::dec_sessions_active();

        let events = self
            .combat
            .remove_participant(actor, crate::world::combat::Departure::Disconnected);
        self.apply_combat_events(events);
        for waiting in self.pending_climbs.values_mut() {
            waiting.retain(|climb| climb.actor != actor);
        }

        let now = self.clock.now();
        let Some(removed) = self.registry.remove_actor(actor) else {
            return;
        };
        if let Some(snapshot) = snapshot_actor(&removed, now) {
            self.persistence.save_player(snapshot);
        }
        info!("{} left the world", removed.name);
        self.router.to_room(
            &self.registry,
            removed.room(),
            &format!("{} fades from the world.", removed.name),
            &[],
        );
    }

    fn on_combat_tick(&mut self) {
        metrics::inc_combat_ticks();
        let now = self.clock.now();
        let events = self
            .combat
            .tick(&mut self.registry, &self.registries, &mut self.rng, now);
        self.apply_combat_events(events);
        self.regenerate();
    }

    /// Out-of-combat players slowly recover; sleepers faster.
    fn regenerate(&mut self) {
        let resting: Vec<ActorId> = self
            .registry
            .players()
            .filter(|a| a.is_alive() && !self.combat.in_combat(a.id))
            .map(|a| a.id)
            .collect();
        for id in resting {
            if let Some(actor) = self.registry.actor_mut(id) {
                let step = if actor.status.sleeping { 3 } else { 1 };
                let pools = &mut actor.pools;
                pools.health = (pools.health + step).min(pools.max_health);
                pools.mana = (pools.mana + step).min(pools.max_mana);
            }
        }
    }

    fn on_respawn_tick(&mut self) {
        let now = self.clock.now();
        for timer in self.respawn.due(now) {
            let Some(template) = self.registries.mob_template(&timer.template) else {
                warn!("Respawn of unknown template {} dropped", timer.template);
                continue;
            };
            match self.registry.spawn_mob(template, &timer.origin) {
                Ok(id) => {
                    metrics::inc_respawns();
                    debug!("Respawned {} as {} in {}", timer.template, id, timer.origin);
                    let line = format!("{} appears.", capitalise(&template.name));
                    self.router.to_room(&self.registry, &timer.origin, &line, &[]);
                }
                Err(e) => warn!("Respawn of {} in {} failed: {}", timer.template, timer.origin, e),
            }
        }
    }

    fn on_autosave(&mut self) {
        let now = self.clock.now();
        let online: Vec<PlayerSnapshot> = self
            .registry
            .players()
            .filter_map(|a| snapshot_actor(a, now))
            .collect();
        let tower = self.tower_state();
        let queued = self.persistence.autosave(online, tower);
        metrics::inc_autosaves();
        let m = metrics::snapshot();
        info!(
            "Autosave queued {} player(s); sessions={} commands={} rejected={} kills={} respawns={} saves_ok={} saves_failed={}",
            queued,
            m.sessions_active,
            m.commands_applied,
            m.commands_rejected,
            m.kills,
            m.respawns,
            m.saves_ok,
            m.saves_failed
        );
    }

    fn on_shutdown(&mut self, done: oneshot::Sender<()>) {
        info!("Shutting down: saving {} online player(s)", self.online_count());
        let ids: Vec<ActorId> = self.actor_sessions.keys().copied().collect();
        for id in ids {
            self.router.close(id, "The server is shutting down. Your progress has been saved.");
        }
        self.on_autosave();
        self.persistence.flush_into(done);
    }

    /// Request generation of `floor` off the world task.
    pub(crate) fn request_floor(&mut self, floor: u32) {
        if !self.generating.insert(floor) {
            return;
        }
        info!("Generating floor {}", floor);
        let generator = Arc::clone(&self.generator);
        let seed = self.settings.tower_seed;
        let intake = self.intake.clone();
        tokio::task::spawn_blocking(move || {
            let result = generator.generate(seed, floor);
            let _ = intake.send(WorldEvent::FloorGenerated { floor, result });
        });
    }

    fn on_floor_generated(&mut self, number: u32, result: Result<Floor, WorldError>) {
        self.generating.remove(&number);
        let waiting = self.pending_climbs.remove(&number).unwrap_or_default();
        match result {
            Ok(floor) => {
                if self.registry.room(&floor.entry).is_none() {
                    let spawned = self.registry.install_floor(floor, &self.registries);
                    info!("Floor {} ready ({} mobs)", number, spawned.len());
                }
                for climb in waiting {
                    let here = self.registry.actor(climb.actor).map(|a| a.room().to_string());
                    if here.as_deref() != Some(climb.from.as_str()) {
                        debug!("Dropping climb of {}: no longer at {}", climb.actor, climb.from);
                        continue;
                    }
                    if self.combat.in_combat(climb.actor) {
                        continue;
                    }
                    if let Err(e) = self.move_actor(climb.actor, &climb.from, climb.direction) {
                        self.router.to_actor(climb.actor, e.user_message());
                    }
                }
            }
            Err(e) => {
                warn!("Generation of floor {} failed: {}", number, e);
                let message = WorldError::GenerationFailed(e.to_string()).user_message();
                for climb in waiting {
                    self.router.to_actor(climb.actor, message.clone());
                }
            }
        }
    }

    /// Move through an exit and tell everyone involved.
    pub(crate) fn move_actor(&mut self, actor: ActorId, from: &str, direction: Direction) -> Result<(), WorldError> {
        let outcome = self.registry.move_actor(actor, from, direction)?;
        self.after_move(outcome);
        Ok(())
    }

    pub(crate) fn after_move(&mut self, outcome: MoveOutcome) {
        let name = self.actor_name(outcome.actor);
        if let Some(stall) = &outcome.closed_stall {
            self.router.to_actor(
                outcome.actor,
                format!(
                    "You pack up your stall ({} item(s) back in your pack).",
                    stall.offers.len()
                ),
            );
        }
        let (leave, arrive) = match outcome.direction {
            Some(dir) => (
                format!("{} leaves {}.", name, dir),
                format!("{} arrives from {}.", name, arrival_side(dir)),
            ),
            None => (
                format!("{} vanishes.", name),
                format!("{} appears.", name),
            ),
        };
        self.router
            .to_room(&self.registry, &outcome.from, &leave, &[outcome.actor]);
        self.router
            .to_room(&self.registry, &outcome.to, &arrive, &[outcome.actor]);
        self.note_city(outcome.actor, &outcome.to);
        self.show_room(outcome.actor);
    }

    /// Remember the last city room a player stood in.
    fn note_city(&mut self, actor: ActorId, room_id: &str) {
        let is_city = self.registry.room(room_id).map(|r| r.is_city()).unwrap_or(false);
        if !is_city {
            return;
        }
        if let Some(player) = self.registry.actor_mut(actor).and_then(|a| a.player_mut()) {
            player.last_city = room_id.to_string();
        }
    }

    pub(crate) fn actor_name(&self, actor: ActorId) -> String {
        self.registry
            .actor(actor)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "someone".to_string())
    }

    pub(crate) fn apply_combat_events(&mut self, events: Vec<CombatEvent>) {
        for event in events {
            self.apply_combat_event(event);
        }
    }

    fn apply_combat_event(&mut self, event: CombatEvent) {
        match event {
            CombatEvent::Hit {
                room,
                attacker,
                target,
                damage,
                remaining,
            } => {
                let (a, t) = (self.actor_name(attacker), self.actor_name(target));
                self.router
                    .to_actor(attacker, format!("You hit {} for {} damage.", t, damage));
                if let Some(max) = self.registry.actor(target).map(|x| x.pools.max_health) {
                    self.router.to_actor(
                        target,
                        format!(
                            "{} hits you for {} damage. (HP {}/{})",
                            capitalise(&a),
                            damage,
                            remaining.max(0),
                            max
                        ),
                    );
                }
                self.router.to_room(
                    &self.registry,
                    &room,
                    &format!("{} hits {}.", capitalise(&a), t),
                    &[attacker, target],
                );
            }
            CombatEvent::Miss {
                room,
                attacker,
                target,
            } => {
                let (a, t) = (self.actor_name(attacker), self.actor_name(target));
                self.router.to_actor(attacker, format!("You miss {}.", t));
                self.router
                    .to_actor(target, format!("{} misses you.", capitalise(&a)));
                self.router.to_room(
                    &self.registry,
                    &room,
                    &format!("{} misses {}.", capitalise(&a), t),
                    &[attacker, target],
                );
            }
            CombatEvent::Skipped { room, actor } => {
                let line = format!("{} is stunned and cannot act.", capitalise(&self.actor_name(actor)));
                self.router.to_room(&self.registry, &room, &line, &[]);
            }
            CombatEvent::FleeFailed { room, actor } => {
                self.router
                    .to_actor(actor, "You try to flee but can't get away!");
                let line = format!("{} tries to flee but fails.", self.actor_name(actor));
                self.router.to_room(&self.registry, &room, &line, &[actor]);
            }
            CombatEvent::FleeSucceeded { room, actor } => self.escape(actor, &room),
            CombatEvent::Died {
                room,
                victim,
                killer,
                experience,
            } => self.on_death(&room, victim, killer, experience),
            CombatEvent::Resolved { room, draw, .. } => {
                let line = if draw {
                    "The fight breaks off without a victor."
                } else {
                    "The fight is over."
                };
                self.router.to_room(&self.registry, &room, line, &[]);
            }
        }
    }

    /// Flee through a random usable exit.
    fn escape(&mut self, actor: ActorId, room: &str) {
        let mut exits: Vec<Direction> = self
            .registry
            .room(room)
            .map(|r| r.exits.keys().copied().collect())
            .unwrap_or_default();
        exits.shuffle(&mut self.rng);
        for dir in exits {
            match self.registry.move_actor(actor, room, dir) {
                Ok(outcome) => {
                    self.router.to_actor(actor, "You flee head over heels!");
                    self.after_move(outcome);
                    return;
                }
                Err(_) => continue,
            }
        }
        self.router
            .to_actor(actor, "You break away from the fight, but there is nowhere to run.");
    }

    fn on_death(&mut self, room: &str, victim: ActorId, killer: ActorId, experience: Vec<(ActorId, u64)>) {
        let victim_name = self.actor_name(victim);
        self.router.to_room(
            &self.registry,
            room,
            &format!("{} dies!", capitalise(&victim_name)),
            &[victim],
        );
        for (id, xp) in experience {
            self.award_experience(id, xp);
        }
        metrics::inc_kills();

        let is_player = self
            .registry
            .actor(victim)
            .map(|a| a.is_player())
            .unwrap_or(false);
        if is_player {
            self.respawn_player(victim);
            return;
        }

        let Some(dead) = self.registry.remove_actor(victim) else {
            return;
        };
        let Some(mob) = dead.mob() else {
            return;
        };
        let gold = mob.xp_reward / 5;
        if gold > 0 {
            if let Some(player) = self.registry.actor_mut(killer).and_then(|a| a.player_mut()) {
                player.gold = player.gold.saturating_add(gold.min(u32::MAX as u64) as u32);
                self.router
                    .to_actor(killer, format!("You find {} gold on the corpse.", gold));
            }
        }
        for item in &mob.loot {
            if self.rng.gen_bool(0.5) {
                if self.registry.place_item(room, item).is_ok() {
                    let line = format!(
                        "{} drops to the ground.",
                        capitalise(self.registries.item_name(item))
                    );
                    self.router.to_room(&self.registry, room, &line, &[]);
                }
            }
        }
        let median = if mob.respawn_secs > 0 {
            Duration::from_secs(mob.respawn_secs)
        } else {
            self.settings.default_respawn
        };
        let now = self.clock.now();
        self.respawn
            .schedule(victim, &mob.template, &mob.home_room, median, now, &mut self.rng);
    }

    fn award_experience(&mut self, id: ActorId, xp: u64) {
        if xp == 0 {
            return;
        }
        let Some(actor) = self.registry.actor_mut(id) else {
            return;
        };
        let Some(player) = actor.player_mut() else {
            return;
        };
        player.experience = player.experience.saturating_add(xp);
        let total = player.experience;
        let mut lines = vec![format!("You gain {} experience.", xp)];
        while total >= next_level_xp(actor.level) {
            actor.level += 1;
            actor.pools.max_health += 5;
            actor.pools.max_mana += 3;
            actor.pools.restore();
            lines.push(format!("You reach level {}!", actor.level));
        }
        for line in lines {
            self.router.to_actor(id, line);
        }
    }

    /// A dead player wakes up in the last city they visited.
    fn respawn_player(&mut self, victim: ActorId) {
        let Some(actor) = self.registry.actor_mut(victim) else {
            return;
        };
        actor.pools.restore();
        actor.status = Default::default();
        let target = actor
            .player()
            .map(|p| p.last_city.clone())
            .unwrap_or_else(|| self.settings.start_room.clone());
        let target = if self.registry.room(&target).is_some() {
            target
        } else {
            self.settings.start_room.clone()
        };
        self.router
            .to_actor(victim, "You have died! Darkness takes you...");
        match self.registry.relocate(victim, &target) {
            Ok(outcome) => {
                self.router
                    .to_actor(victim, "You awaken in the city, bruised but alive.");
                self.after_move(outcome);
            }
            Err(e) => error!("Could not return {} to the city: {}", victim, e),
        }
    }
}

fn arrival_side(dir: Direction) -> &'static str {
    match dir {
        Direction::Up => "below",
        Direction::Down => "above",
        other => other.opposite().as_str(),
    }
}

pub(crate) fn capitalise(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Spawn the tick clocks that feed the intake queue.
pub fn spawn_clocks(
    intake: mpsc::UnboundedSender<WorldEvent>,
    combat_tick: Duration,
    respawn_check: Duration,
    autosave: Duration,
) -> Vec<JoinHandle<()>> {
    let clock = |period: Duration, make: fn() -> WorldEvent, tx: mpsc::UnboundedSender<WorldEvent>| {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(make()).is_err() {
                    break;
                }
            }
        })
    };
    vec![
        clock(combat_tick, || WorldEvent::CombatTick, intake.clone()),
        clock(respawn_check, || WorldEvent::RespawnTick, intake.clone()),
        clock(autosave, || WorldEvent::AutosaveTick, intake),
    ]
}
