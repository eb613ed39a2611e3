//! Startup and shutdown wiring: store, persistence worker, world task, tick
//! clocks and transports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::net::{self, SessionContext};
use crate::world::city::canonical_city;
use crate::world::clock::SystemClock;
use crate::world::combat::CombatPolicy;
use crate::world::content::Registries;
use crate::world::engine::{spawn_clocks, World, WorldDeps, WorldEvent, WorldSettings};
use crate::world::filters::WordListFilter;
use crate::world::generator::TowerGenerator;
use crate::world::persistence::{build_argon2, start_persistence_worker};
use crate::world::registry::WorldRegistry;
use crate::world::storage::{SledStore, SledStoreBuilder};

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TowerServer {
    config: Config,
    registries: Arc<Registries>,
}

impl TowerServer {
    pub async fn new(config: Config) -> Result<Self> {
        let seeds = config.seeds_dir();
        let registries = if seeds.is_dir() {
            Registries::load_dir(&seeds)?
        } else {
            info!("No seed directory at {}; using built-in content", seeds.display());
            Registries::builtin()
        };
        Ok(Self {
            config,
            registries: Arc::new(registries),
        })
    }

    pub fn settings(&self) -> WorldSettings {
        let cfg = &self.config;
        WorldSettings {
            server_name: cfg.server.name.clone(),
            motd: cfg.server.motd.clone(),
            start_room: cfg.world.start_room.clone(),
            tower_seed: cfg.world.tower_seed,
            combat: CombatPolicy::from(&cfg.combat),
            chat: cfg.chat.limits(),
            respawn_jitter: cfg.respawn.jitter,
            default_respawn: Duration::from_secs(cfg.respawn.default_median_secs.max(1)),
            rng_seed: cfg.world.rng_seed,
        }
    }

    /// Run until Ctrl-C, then save everyone and flush.
    pub async fn run(self) -> Result<()> {
        let cfg = &self.config;
        let store = SledStoreBuilder::new(cfg.db_path()).open()?;
        info!("Opened world store at {}", cfg.db_path().display());

        let (intake, rx) = mpsc::unbounded_channel::<WorldEvent>();
        let argon2 = build_argon2(cfg.security.argon2.as_ref());
        let persistence = start_persistence_worker(store, argon2, intake.clone())?;
        let tower = persistence.load_world().await?;

        let filter = Arc::new(
            WordListFilter::new(&cfg.chat.banned_words).with_banned_names(&cfg.chat.banned_names),
        );
        let generator = Arc::new(
            TowerGenerator::new(Arc::clone(&self.registries), cfg.world.max_floor)
                .with_spawn_chance(cfg.world.spawn_chance),
        );
        let deps = WorldDeps {
            registries: Arc::clone(&self.registries),
            generator,
            filter: filter.clone(),
            clock: Arc::new(SystemClock),
            persistence: persistence.clone(),
            intake: intake.clone(),
        };
        let mut world = World::new(
            self.settings(),
            WorldRegistry::with_rooms(canonical_city()),
            deps,
        );
        world.restore(tower, cfg.world.pregenerate_floors)?;
        let world_task = tokio::spawn(world.run(rx));

        let clocks = spawn_clocks(
            intake.clone(),
            cfg.combat.tick(),
            Duration::from_millis(cfg.respawn.check_interval_ms.max(50)),
            Duration::from_secs(cfg.persistence.autosave_secs.max(5)),
        );

        let ctx = Arc::new(SessionContext {
            intake: intake.clone(),
            persistence: persistence.clone(),
            names: filter,
            server_name: cfg.server.name.clone(),
            max_login_attempts: cfg.security.max_login_attempts,
            login_timeout: Duration::from_secs(cfg.server.login_timeout_secs.max(5)),
            max_line_length: cfg.server.max_line_length,
        });
        let listeners = net::listen(ctx, &cfg.server.line_bind, &cfg.server.websocket_bind).await?;
        info!("{} is open", cfg.server.name);

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| anyhow!("Failed to listen for Ctrl-C: {}", e))?;
        info!("Shutdown requested");
        for handle in listeners.iter().chain(clocks.iter()) {
            handle.abort();
        }

        let (done, flushed) = oneshot::channel();
        if intake.send(WorldEvent::Shutdown { done }).is_err() {
            warn!("World task already stopped; nothing to flush");
        } else {
            match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, flushed).await {
                Ok(Ok(())) => info!("All saves flushed"),
                Ok(Err(_)) => warn!("Persistence worker went away before the final flush"),
                Err(_) => warn!("Timed out waiting for the final flush"),
            }
        }
        let _ = world_task.await;
        Ok(())
    }

    /// Print a summary of the stored world.
    pub async fn show_status(&self) -> Result<()> {
        let cfg = &self.config;
        let store = SledStore::open(cfg.db_path())?;
        let players = store.list_players()?;
        let tower = crate::world::storage::PersistenceStore::load_world(&store)?;
        println!("{} status", cfg.server.name);
        println!("  Store: {}", cfg.db_path().display());
        println!("  Accounts: {}", store.account_count());
        println!("  Saved players: {}", players.len());
        match tower {
            Some(state) => println!(
                "  Tower: seed {}, {} floor(s) generated, last saved {}",
                state.seed,
                state.highest_floor,
                state.saved_at.format("%Y-%m-%d %H:%M:%SZ")
            ),
            None => println!("  Tower: not yet saved"),
        }
        println!(
            "  Content: {} spell(s), {} mob template(s), {} item(s)",
            self.registries.spell_count(),
            self.registries.mob_count(),
            self.registries.item_count()
        );
        Ok(())
    }
}
