//! Test utilities & fixtures.
//! A [`Harness`] owns a `World` wired to a throwaway sled store, a manual clock
//! and its own intake queue, so tests drive events by hand and in order.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use towermud::config::Argon2Config;
use towermud::world::broadcast::Outbound;
use towermud::world::city::canonical_city;
use towermud::world::clock::ManualClock;
use towermud::world::content::{MobTemplate, Registries};
use towermud::world::filters::WordListFilter;
use towermud::world::generator::{Floor, FloorGenerator, TowerGenerator};
use towermud::world::persistence::{build_argon2, start_persistence_worker, PersistenceHandle};
use towermud::world::storage::{PersistenceStore, SledStore};
use towermud::world::types::{ActorId, PlayerSnapshot, Room, TowerState};
use towermud::world::{SessionId, World, WorldDeps, WorldError, WorldEvent, WorldRegistry, WorldSettings};

pub const ARENA: &str = "f1:arena";

/// Argon2 parameters small enough for tests.
pub fn cheap_argon2() -> argon2::Argon2<'static> {
    build_argon2(Some(&Argon2Config {
        memory_kib: Some(1024),
        time_cost: Some(1),
        parallelism: Some(1),
    }))
}

/// A mob that always hits for one and respawns after about five seconds.
pub fn training_dummy() -> MobTemplate {
    MobTemplate {
        id: "training_dummy".to_string(),
        name: "training dummy".to_string(),
        level: 1,
        max_health: 10,
        attack_bonus: 0,
        defense: 0,
        damage_min: 1,
        damage_max: 1,
        mitigation: 0,
        xp_reward: 20,
        respawn_secs: 5,
        loot: Vec::new(),
        min_floor: 1,
    }
}

pub fn registries() -> Registries {
    let mut reg = Registries::builtin();
    reg.insert_mob(training_dummy());
    reg
}

/// City plus an unsafe arena on floor 1 that links back to the plaza.
pub fn arena_registry(dummies: usize, registries: &Registries) -> WorldRegistry {
    let mut registry = WorldRegistry::with_rooms(canonical_city());
    registry.insert_room(
        Room::new(ARENA, "Training Arena", "Sawdust and splinters.", 1)
            .with_exit(towermud::world::types::Direction::Down, "city:plaza"),
    );
    let template = registries
        .mob_template("training_dummy")
        .expect("dummy template")
        .clone();
    for _ in 0..dummies {
        registry.spawn_mob(&template, ARENA).expect("spawn dummy");
    }
    registry
}

/// Always refuses to build a floor.
pub struct CollapsingGenerator;

impl FloorGenerator for CollapsingGenerator {
    fn generate(&self, _seed: u64, floor: u32) -> Result<Floor, WorldError> {
        Err(WorldError::GenerationFailed(format!("floor {} collapsed", floor)))
    }
}

pub fn empty_tower(registries: &Arc<Registries>) -> Arc<dyn FloorGenerator> {
    Arc::new(TowerGenerator::new(Arc::clone(registries), 10).with_spawn_chance(0.0))
}

/// Sled store whose player saves can be made to fail on demand.
pub struct FlakyStore {
    inner: SledStore,
    failing_saves: Arc<AtomicUsize>,
}

impl PersistenceStore for FlakyStore {
    fn save_actor(&self, snapshot: &PlayerSnapshot) -> Result<(), WorldError> {
        let failing = self
            .failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WorldError::PersistenceWriteFailed(format!(
                "disk full saving {}",
                snapshot.name
            )));
        }
        self.inner.save_actor(snapshot)
    }

    fn load_actor(&self, name: &str) -> Result<PlayerSnapshot, WorldError> {
        self.inner.load_actor(name)
    }

    fn save_world(&self, state: &TowerState) -> Result<(), WorldError> {
        self.inner.save_world(state)
    }

    fn load_world(&self) -> Result<Option<TowerState>, WorldError> {
        self.inner.load_world()
    }

    fn account_hash(&self, name: &str) -> Result<Option<String>, WorldError> {
        self.inner.account_hash(name)
    }

    fn put_account_hash(&self, name: &str, hash: &str) -> Result<(), WorldError> {
        self.inner.put_account_hash(name, hash)
    }

    fn flush(&self) -> Result<(), WorldError> {
        self.inner.flush()
    }
}

/// One logged-in player as seen by a test.
pub struct Player {
    pub session: SessionId,
    pub actor: ActorId,
    pub out: UnboundedReceiver<Outbound>,
}

impl Player {
    /// Everything queued for this player so far, close reasons included.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(message) = self.out.try_recv() {
            match message {
                Outbound::Line(text) | Outbound::Close(text) => lines.push(text),
            }
        }
        lines
    }

    pub fn saw(&mut self, needle: &str) -> bool {
        self.drain().iter().any(|l| l.contains(needle))
    }
}

pub struct Harness {
    pub world: World,
    pub rx: UnboundedReceiver<WorldEvent>,
    pub clock: ManualClock,
    pub persistence: PersistenceHandle,
    failing_saves: Arc<AtomicUsize>,
    _dir: TempDir,
}

pub struct HarnessOptions {
    pub settings: WorldSettings,
    pub registry: WorldRegistry,
    pub registries: Arc<Registries>,
    pub generator: Option<Arc<dyn FloorGenerator>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            settings: test_settings(),
            registry: WorldRegistry::with_rooms(canonical_city()),
            registries: Arc::new(registries()),
            generator: None,
        }
    }
}

/// Deterministic rolls and hits that always land.
pub fn test_settings() -> WorldSettings {
    let mut settings = WorldSettings {
        rng_seed: Some(7),
        ..WorldSettings::default()
    };
    settings.combat.hit_threshold = -1000;
    settings
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HarnessOptions::default())
    }

    pub fn with(opts: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let failing_saves = Arc::new(AtomicUsize::new(0));
        let store = FlakyStore {
            inner: SledStore::open(dir.path().join("world")).expect("store"),
            failing_saves: Arc::clone(&failing_saves),
        };
        let (intake, rx) = mpsc::unbounded_channel();
        let persistence =
            start_persistence_worker(store, cheap_argon2(), intake.clone()).expect("worker");
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 11, 12, 0, 0).unwrap());
        let generator = opts
            .generator
            .unwrap_or_else(|| empty_tower(&opts.registries));
        let deps = WorldDeps {
            registries: opts.registries,
            generator,
            filter: Arc::new(WordListFilter::new(["darn"])),
            clock: Arc::new(clock.clone()),
            persistence: persistence.clone(),
            intake,
        };
        let world = World::new(opts.settings, opts.registry, deps);
        Self {
            world,
            rx,
            clock,
            persistence,
            failing_saves,
            _dir: dir,
        }
    }

    /// Make the next `n` player saves fail.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    /// Apply every event the worker has produced until nothing new arrives.
    pub async fn settle(&mut self) {
        loop {
            self.persistence.flush().await.expect("flush");
            let mut applied = 0;
            while let Ok(event) = self.rx.try_recv() {
                self.world.handle_event(event);
                applied += 1;
            }
            if applied == 0 {
                break;
            }
        }
    }

    /// Wait for the next event from a background task and apply it.
    pub async fn pump_one(&mut self) -> &'static str {
        let event = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a world event")
            .expect("intake closed");
        let label = event.label();
        self.world.handle_event(event);
        label
    }

    pub async fn login(&mut self, name: &str) -> Player {
        let (sink, out) = mpsc::unbounded_channel();
        let session = SessionId::new();
        self.world.handle_event(WorldEvent::Connected {
            session,
            name: name.to_string(),
            sink,
        });
        self.settle().await;
        let actor = self
            .world
            .session_actor(session)
            .expect("player entered the world");
        Player {
            session,
            actor,
            out,
        }
    }

    pub fn send(&mut self, player: &Player, line: &str) {
        self.world.handle_event(WorldEvent::Command {
            session: player.session,
            line: line.to_string(),
        });
    }

    pub async fn disconnect(&mut self, player: &Player) {
        self.world.handle_event(WorldEvent::Disconnected {
            session: player.session,
        });
        self.settle().await;
    }

    pub fn room_of(&self, actor: ActorId) -> String {
        self.world
            .registry()
            .actor(actor)
            .map(|a| a.room().to_string())
            .expect("actor in world")
    }
}
