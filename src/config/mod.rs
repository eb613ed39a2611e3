//! # Configuration
//!
//! TOML configuration for the server, loaded once at startup.
//!
//! ## Sections
//!
//! - [`ServerConfig`] - name, listen addresses, line limits, MOTD
//! - [`WorldConfig`] - data directory, tower seed, start room
//! - [`CombatConfig`] - tick period and combat policy
//! - [`RespawnConfig`] - respawn check interval and jitter
//! - [`ChatConfig`] - rate limits and word lists
//! - [`PersistenceConfig`] - autosave interval and database path
//! - [`LoggingConfig`] - log level and files
//! - [`SecurityConfig`] - password hashing parameters
//!
//! Every section has defaults, so a file only needs the keys it changes:
//!
//! ```toml
//! [server]
//! name = "The Spire"
//! line_bind = "0.0.0.0:4000"
//! websocket_bind = "0.0.0.0:4001"
//!
//! [combat]
//! tick_ms = 3500
//! flee_chance = 0.5
//! tie_break = "earliest_engaged"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::world::combat::TieBreak;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    /// Plain line transport (telnet-style clients).
    pub line_bind: String,
    /// Websocket transport. Empty disables it.
    pub websocket_bind: String,
    /// Longer inbound lines are cut.
    pub max_line_length: usize,
    pub motd: String,
    /// Seconds a connection may sit at the login prompt.
    pub login_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "TowerMUD".to_string(),
            line_bind: "0.0.0.0:4000".to_string(),
            websocket_bind: "0.0.0.0:4001".to_string(),
            max_line_length: 512,
            motd: "Climb the tower. Mind the stairs.".to_string(),
            login_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub data_dir: String,
    /// Fixed seed makes every server build the same tower.
    pub tower_seed: u64,
    pub start_room: String,
    /// Floors generated at startup before anyone climbs.
    pub pregenerate_floors: u32,
    /// Floors above this are never generated.
    pub max_floor: u32,
    /// Chance that a generated room gets a mob.
    pub spawn_chance: f64,
    /// Seed for combat rolls; unset means random.
    pub rng_seed: Option<u64>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            tower_seed: 20240611,
            start_room: crate::world::city::START_ROOM_ID.to_string(),
            pregenerate_floors: 1,
            max_floor: 100,
            spawn_chance: 0.6,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub tick_ms: u64,
    /// A d20 roll plus attack bonus minus defense must reach this to hit.
    pub hit_threshold: i32,
    pub flee_chance: f64,
    pub tie_break: TieBreak,
    pub unarmed_damage_min: u32,
    pub unarmed_damage_max: u32,
    /// Base player defense before level bonus.
    pub player_defense: i32,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            tick_ms: 3500,
            hit_threshold: 0,
            flee_chance: 0.5,
            tie_break: TieBreak::EarliestEngaged,
            unarmed_damage_min: 1,
            unarmed_damage_max: 3,
            player_defense: 8,
        }
    }
}

impl CombatConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(100))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RespawnConfig {
    pub check_interval_ms: u64,
    /// Median delay for templates that do not set one.
    pub default_median_secs: u64,
    /// Fraction of the median; fires land in `[median*(1-j), median*(1+j)]`.
    pub jitter: f64,
}

impl Default for RespawnConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            default_median_secs: 60,
            jitter: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub window_secs: i64,
    pub max_messages: usize,
    pub block_repeats: bool,
    pub banned_words: Vec<String>,
    pub banned_names: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            window_secs: 10,
            max_messages: 5,
            block_repeats: true,
            banned_words: Vec::new(),
            banned_names: Vec::new(),
        }
    }
}

impl ChatConfig {
    pub fn limits(&self) -> crate::world::broadcast::ChatLimits {
        crate::world::broadcast::ChatLimits {
            window: chrono::Duration::seconds(self.window_secs.max(1)),
            max_messages: self.max_messages.max(1),
            block_repeats: self.block_repeats,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub autosave_secs: u64,
    /// Defaults to `<data_dir>/towermud.db`.
    pub db_path: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            autosave_secs: 300,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("towermud.log".to_string()),
            security_file: Some("towermud-security.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Argon2Config {
    #[serde(default)]
    pub memory_kib: Option<u32>,
    #[serde(default)]
    pub time_cost: Option<u32>,
    #[serde(default)]
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub argon2: Option<Argon2Config>,
    /// Wrong passwords allowed before the connection is dropped.
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
}

fn default_max_login_attempts() -> u32 {
    3
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            argon2: None,
            max_login_attempts: default_max_login_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    #[serde(default)]
    pub respawn: RespawnConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.respawn.jitter) {
            return Err(anyhow!(
                "respawn.jitter must be between 0.0 and 1.0 (got {})",
                self.respawn.jitter
            ));
        }
        if !(0.0..=1.0).contains(&self.combat.flee_chance) {
            return Err(anyhow!(
                "combat.flee_chance must be between 0.0 and 1.0 (got {})",
                self.combat.flee_chance
            ));
        }
        if self.combat.unarmed_damage_min > self.combat.unarmed_damage_max {
            return Err(anyhow!("combat.unarmed_damage_min exceeds unarmed_damage_max"));
        }
        if self.server.line_bind.trim().is_empty() {
            return Err(anyhow!("server.line_bind must be set"));
        }
        if self.server.max_line_length < 16 {
            return Err(anyhow!("server.max_line_length must be at least 16"));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.persistence.db_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.world.data_dir).join("towermud.db"),
        }
    }

    pub fn seeds_dir(&self) -> PathBuf {
        PathBuf::from(&self.world.data_dir).join("seeds")
    }
}
