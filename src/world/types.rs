use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::world::cooldown::CooldownTable;

pub const PLAYER_SNAPSHOT_VERSION: u8 = 1;
pub const TOWER_STATE_VERSION: u8 = 1;

/// Floor number of the city. Stalls may only open here.
pub const CITY_FLOOR: u32 = 0;

/// Identity of a live actor. Mobs get a fresh id on every respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type RoomId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
}

impl Direction {
    pub const ALL: [Direction; 10] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
        Direction::Northeast,
        Direction::Northwest,
        Direction::Southeast,
        Direction::Southwest,
    ];

    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "n" | "north" => Some(Direction::North),
            "s" | "south" => Some(Direction::South),
            "e" | "east" => Some(Direction::East),
            "w" | "west" => Some(Direction::West),
            "u" | "up" | "climb" => Some(Direction::Up),
            "d" | "down" | "descend" => Some(Direction::Down),
            "ne" | "northeast" => Some(Direction::Northeast),
            "nw" | "northwest" => Some(Direction::Northwest),
            "se" | "southeast" => Some(Direction::Southeast),
            "sw" | "southwest" => Some(Direction::Southwest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Northeast => "northeast",
            Direction::Northwest => "northwest",
            Direction::Southeast => "southeast",
            Direction::Southwest => "southwest",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Northeast => Direction::Southwest,
            Direction::Northwest => Direction::Southeast,
            Direction::Southeast => Direction::Northwest,
            Direction::Southwest => Direction::Northeast,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exit {
    pub to: RoomId,
    /// Item id required to pass. `None` means the exit is open.
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomFlag {
    /// Floor-0 city room: stalls allowed, death respawn point.
    City,
    /// No fighting here.
    Safe,
    /// Holds the way up to the next floor.
    Stairwell,
    Dark,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StallOffer {
    pub item: String,
    pub price: u32,
}

/// A player-operated sell offer. Lives in the room while its owner stays there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stall {
    pub owner: ActorId,
    pub owner_name: String,
    pub offers: Vec<StallOffer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub floor: u32,
    pub exits: BTreeMap<Direction, Exit>,
    pub flags: Vec<RoomFlag>,
    pub items: Vec<String>,
    pub(crate) occupants: BTreeSet<ActorId>,
    pub(crate) stalls: BTreeMap<ActorId, Stall>,
}

impl Room {
    pub fn new(id: &str, name: &str, description: &str, floor: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            floor,
            exits: BTreeMap::new(),
            flags: Vec::new(),
            items: Vec::new(),
            occupants: BTreeSet::new(),
            stalls: BTreeMap::new(),
        }
    }

    pub fn with_exit(mut self, direction: Direction, destination: &str) -> Self {
        self.exits.insert(
            direction,
            Exit {
                to: destination.to_string(),
                key: None,
            },
        );
        self
    }

    pub fn with_locked_exit(mut self, direction: Direction, destination: &str, key: &str) -> Self {
        self.exits.insert(
            direction,
            Exit {
                to: destination.to_string(),
                key: Some(key.to_string()),
            },
        );
        self
    }

    pub fn with_flag(mut self, flag: RoomFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn with_item(mut self, item: &str) -> Self {
        self.items.push(item.to_string());
        self
    }

    pub fn has_flag(&self, flag: RoomFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_city(&self) -> bool {
        self.floor == CITY_FLOOR && self.has_flag(RoomFlag::City)
    }

    pub fn occupants(&self) -> &BTreeSet<ActorId> {
        &self.occupants
    }

    pub fn stalls(&self) -> impl Iterator<Item = &Stall> {
        self.stalls.values()
    }

    pub fn stall_of(&self, owner: ActorId) -> Option<&Stall> {
        self.stalls.get(&owner)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pools {
    pub health: i32,
    pub max_health: i32,
    pub mana: i32,
    pub max_mana: i32,
}

impl Pools {
    pub fn full(max_health: i32, max_mana: i32) -> Self {
        Self {
            health: max_health,
            max_health,
            mana: max_mana,
            max_mana,
        }
    }

    pub fn restore(&mut self) {
        self.health = self.max_health;
        self.mana = self.max_mana;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusFlags {
    pub sleeping: bool,
    pub stunned_until: Option<DateTime<Utc>>,
}

impl StatusFlags {
    pub fn is_stunned(&self, now: DateTime<Utc>) -> bool {
        matches!(self.stunned_until, Some(until) if until > now)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Equipment {
    pub weapon: Option<String>,
    pub armor: Option<String>,
}

/// State carried only by players; this is what gets persisted alongside pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerData {
    pub account: String,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub equipment: Equipment,
    #[serde(default)]
    pub gold: u32,
    #[serde(default)]
    pub experience: u64,
    pub last_city: RoomId,
    #[serde(default)]
    pub quests: BTreeMap<String, u32>,
    #[serde(default)]
    pub crafting: BTreeMap<String, u32>,
    #[serde(default)]
    pub skills: BTreeMap<String, u32>,
    /// Lowercased names whose chat is hidden from this player.
    #[serde(default)]
    pub ignored: BTreeSet<String>,
}

impl PlayerData {
    pub fn new(account: &str, last_city: &str) -> Self {
        Self {
            account: account.to_ascii_lowercase(),
            inventory: Vec::new(),
            equipment: Equipment::default(),
            gold: 0,
            experience: 0,
            last_city: last_city.to_string(),
            quests: BTreeMap::new(),
            crafting: BTreeMap::new(),
            skills: BTreeMap::new(),
            ignored: BTreeSet::new(),
        }
    }

    pub fn is_ignoring(&self, name: &str) -> bool {
        self.ignored.contains(&name.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobData {
    pub template: String,
    pub home_room: RoomId,
    pub attack_bonus: i32,
    pub defense: i32,
    pub damage: (u32, u32),
    pub mitigation: u32,
    pub xp_reward: u64,
    pub respawn_secs: u64,
    pub loot: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActorKind {
    Player(PlayerData),
    Mob(MobData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub(crate) room: RoomId,
    pub pools: Pools,
    pub level: u32,
    pub status: StatusFlags,
    pub cooldowns: CooldownTable,
    pub kind: ActorKind,
}

impl Actor {
    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn is_alive(&self) -> bool {
        self.pools.health > 0
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, ActorKind::Player(_))
    }

    pub fn player(&self) -> Option<&PlayerData> {
        match &self.kind {
            ActorKind::Player(p) => Some(p),
            ActorKind::Mob(_) => None,
        }
    }

    pub fn player_mut(&mut self) -> Option<&mut PlayerData> {
        match &mut self.kind {
            ActorKind::Player(p) => Some(p),
            ActorKind::Mob(_) => None,
        }
    }

    pub fn mob(&self) -> Option<&MobData> {
        match &self.kind {
            ActorKind::Mob(m) => Some(m),
            ActorKind::Player(_) => None,
        }
    }

    /// Case-insensitive prefix match used for targeting by name.
    pub fn answers_to(&self, query: &str) -> bool {
        let query = query.trim().to_ascii_lowercase();
        if query.is_empty() {
            return false;
        }
        let name = self.name.to_ascii_lowercase();
        name == query
            || name.starts_with(&query)
            || name.split_whitespace().any(|word| word.starts_with(&query))
    }
}

/// Persisted form of a player. Written on autosave and disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub name: String,
    pub room: RoomId,
    pub pools: Pools,
    pub level: u32,
    pub cooldowns: CooldownTable,
    pub data: PlayerData,
    pub saved_at: DateTime<Utc>,
    pub schema_version: u8,
}

impl PlayerSnapshot {
    /// Starting state for a brand-new character.
    pub fn new_player(name: &str, start_room: &str, now: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            room: start_room.to_string(),
            pools: Pools::full(30, 20),
            level: 1,
            cooldowns: CooldownTable::default(),
            data: PlayerData::new(name, start_room),
            saved_at: now,
            schema_version: PLAYER_SNAPSHOT_VERSION,
        }
    }
}

/// Persisted form of the tower: enough to regenerate floors deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TowerState {
    pub seed: u64,
    pub highest_floor: u32,
    #[serde(default)]
    pub ground_items: BTreeMap<RoomId, Vec<String>>,
    pub saved_at: DateTime<Utc>,
    pub schema_version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_aliases_parse() {
        assert_eq!(Direction::parse("N"), Some(Direction::North));
        assert_eq!(Direction::parse("climb"), Some(Direction::Up));
        assert_eq!(Direction::parse("sw"), Some(Direction::Southwest));
        assert_eq!(Direction::parse("sideways"), None);
        for dir in Direction::ALL {
            assert_eq!(dir.opposite().opposite(), dir);
        }
    }

    #[test]
    fn answers_to_matches_word_prefixes() {
        let actor = Actor {
            id: ActorId(7),
            name: "Giant Rat".to_string(),
            room: "f1:0".to_string(),
            pools: Pools::full(10, 0),
            level: 1,
            status: StatusFlags::default(),
            cooldowns: CooldownTable::default(),
            kind: ActorKind::Mob(MobData {
                template: "giant_rat".to_string(),
                home_room: "f1:0".to_string(),
                attack_bonus: 0,
                defense: 0,
                damage: (1, 2),
                mitigation: 0,
                xp_reward: 10,
                respawn_secs: 5,
                loot: Vec::new(),
            }),
        };
        assert!(actor.answers_to("rat"));
        assert!(actor.answers_to("gi"));
        assert!(!actor.answers_to("bat"));
        assert!(!actor.answers_to("  "));
    }

    #[test]
    fn stun_expires() {
        let now = Utc::now();
        let status = StatusFlags {
            sleeping: false,
            stunned_until: Some(now + chrono::Duration::seconds(2)),
        };
        assert!(status.is_stunned(now));
        assert!(!status.is_stunned(now + chrono::Duration::seconds(3)));
    }
}
