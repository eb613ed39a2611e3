use std::path::{Path, PathBuf};

use log::debug;
use sled::IVec;

use crate::world::errors::WorldError;
use crate::world::types::{PlayerSnapshot, TowerState, PLAYER_SNAPSHOT_VERSION, TOWER_STATE_VERSION};

const TREE_PLAYERS: &str = "towermud_players";
const TREE_WORLD: &str = "towermud_world";
const TREE_ACCOUNTS: &str = "towermud_accounts";

const TOWER_KEY: &[u8] = b"tower:state";

/// Durable storage used by the persistence worker. Every call may block.
pub trait PersistenceStore: Send + 'static {
    fn save_actor(&self, snapshot: &PlayerSnapshot) -> Result<(), WorldError>;
    /// `NotFound` when the player has never been saved.
    fn load_actor(&self, name: &str) -> Result<PlayerSnapshot, WorldError>;
    fn save_world(&self, state: &TowerState) -> Result<(), WorldError>;
    fn load_world(&self) -> Result<Option<TowerState>, WorldError>;
    /// PHC-format password hash for an account, if one exists.
    fn account_hash(&self, name: &str) -> Result<Option<String>, WorldError>;
    fn put_account_hash(&self, name: &str, hash: &str) -> Result<(), WorldError>;
    fn flush(&self) -> Result<(), WorldError>;
}

/// Builder so tests can open throwaway stores in temp dirs.
pub struct SledStoreBuilder {
    path: PathBuf,
}

impl SledStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn open(self) -> Result<SledStore, WorldError> {
        SledStore::open(self.path)
    }
}

/// Sled-backed store: one tree each for players, tower state and accounts.
pub struct SledStore {
    _db: sled::Db,
    players: sled::Tree,
    world: sled::Tree,
    accounts: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WorldError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let players = db.open_tree(TREE_PLAYERS)?;
        let world = db.open_tree(TREE_WORLD)?;
        let accounts = db.open_tree(TREE_ACCOUNTS)?;
        debug!("Opened sled store at {}", path_ref.display());
        Ok(Self {
            _db: db,
            players,
            world,
            accounts,
        })
    }

    fn player_key(name: &str) -> Vec<u8> {
        format!("players:{}", name.to_ascii_lowercase()).into_bytes()
    }

    fn account_key(name: &str) -> Vec<u8> {
        format!("accounts:{}", name.to_ascii_lowercase()).into_bytes()
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, WorldError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, WorldError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    /// Every stored player name, lowercased.
    pub fn list_players(&self) -> Result<Vec<String>, WorldError> {
        let mut names = Vec::new();
        for entry in self.players.scan_prefix(b"players:") {
            let (key, _) = entry?;
            let text = String::from_utf8_lossy(&key);
            if let Some(name) = text.strip_prefix("players:") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

impl PersistenceStore for SledStore {
    fn save_actor(&self, snapshot: &PlayerSnapshot) -> Result<(), WorldError> {
        let mut record = snapshot.clone();
        record.schema_version = PLAYER_SNAPSHOT_VERSION;
        let bytes = Self::serialize(&record)?;
        self.players.insert(Self::player_key(&record.name), bytes)?;
        self.players.flush()?;
        Ok(())
    }

    fn load_actor(&self, name: &str) -> Result<PlayerSnapshot, WorldError> {
        let Some(bytes) = self.players.get(Self::player_key(name))? else {
            return Err(WorldError::NotFound(format!("player: {}", name)));
        };
        let record: PlayerSnapshot = Self::deserialize(bytes)?;
        if record.schema_version != PLAYER_SNAPSHOT_VERSION {
            return Err(WorldError::SchemaMismatch {
                entity: "player",
                expected: PLAYER_SNAPSHOT_VERSION,
                found: record.schema_version,
            });
        }
        Ok(record)
    }

    fn save_world(&self, state: &TowerState) -> Result<(), WorldError> {
        let mut record = state.clone();
        record.schema_version = TOWER_STATE_VERSION;
        self.world.insert(TOWER_KEY, Self::serialize(&record)?)?;
        self.world.flush()?;
        Ok(())
    }

    fn load_world(&self) -> Result<Option<TowerState>, WorldError> {
        let Some(bytes) = self.world.get(TOWER_KEY)? else {
            return Ok(None);
        };
        let record: TowerState = Self::deserialize(bytes)?;
        if record.schema_version != TOWER_STATE_VERSION {
            return Err(WorldError::SchemaMismatch {
                entity: "tower",
                expected: TOWER_STATE_VERSION,
                found: record.schema_version,
            });
        }
        Ok(Some(record))
    }

    fn account_hash(&self, name: &str) -> Result<Option<String>, WorldError> {
        Ok(self
            .accounts
            .get(Self::account_key(name))?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn put_account_hash(&self, name: &str, hash: &str) -> Result<(), WorldError> {
        self.accounts
            .insert(Self::account_key(name), hash.as_bytes())?;
        self.accounts.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), WorldError> {
        self.players.flush()?;
        self.world.flush()?;
        self.accounts.flush()?;
        Ok(())
    }
}
