//! Procedural tower floors.
//!
//! A floor is a chain of rooms from its entry (`f<N>:0`, whose `down` exit leads
//! to the stairwell below) to its stairwell (`f<N>:stairs`, whose `up` exit
//! leads to the entry of floor N+1). The same `(seed, floor)` pair always yields
//! the same floor, so only the seed and the highest generated floor need to be
//! persisted.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use crate::world::city::CITY_STAIRS_ID;
use crate::world::content::Registries;
use crate::world::errors::WorldError;
use crate::world::types::{Direction, Room, RoomFlag, RoomId, CITY_FLOOR};

#[derive(Debug, Clone, PartialEq)]
pub struct Floor {
    pub number: u32,
    pub rooms: Vec<Room>,
    pub entry: RoomId,
    /// `(mob template id, room id)` pairs to populate once installed.
    pub spawns: Vec<(String, RoomId)>,
}

pub trait FloorGenerator: Send + Sync {
    /// May be slow; callers keep it off the world task.
    fn generate(&self, seed: u64, floor: u32) -> Result<Floor, WorldError>;
}

pub fn floor_room_id(floor: u32, index: usize) -> RoomId {
    format!("f{}:{}", floor, index)
}

pub fn stairwell_id(floor: u32) -> RoomId {
    if floor == CITY_FLOOR {
        CITY_STAIRS_ID.to_string()
    } else {
        format!("f{}:stairs", floor)
    }
}

/// Floor number encoded in a room id (`city:*` is floor 0).
pub fn floor_of(room_id: &str) -> Option<u32> {
    if room_id.starts_with("city:") {
        return Some(CITY_FLOOR);
    }
    let rest = room_id.strip_prefix('f')?;
    let (num, _) = rest.split_once(':')?;
    num.parse().ok()
}

const ROOM_NAMES: &[&str] = &[
    "Dusty Landing",
    "Collapsed Gallery",
    "Echoing Hall",
    "Moss-Choked Passage",
    "Broken Armory",
    "Guttering Shrine",
    "Narrow Bridge",
    "Bone-Strewn Den",
    "Whispering Vault",
    "Cracked Observatory",
];

const ROOM_DETAILS: &[&str] = &[
    "Wind howls through gaps in the tower wall.",
    "Water drips steadily from somewhere above.",
    "Faded murals depict climbers who never returned.",
    "Claw marks score the flagstones.",
    "A cold draft carries the smell of old smoke.",
    "Rubble has been pushed aside to clear a path.",
];

const LINK_DIRECTIONS: [Direction; 4] = [
    Direction::North,
    Direction::East,
    Direction::South,
    Direction::West,
];

pub struct TowerGenerator {
    registries: Arc<Registries>,
    max_floor: u32,
    spawn_chance: f64,
}

impl TowerGenerator {
    pub fn new(registries: Arc<Registries>, max_floor: u32) -> Self {
        Self {
            registries,
            max_floor,
            spawn_chance: 0.6,
        }
    }

    pub fn with_spawn_chance(mut self, chance: f64) -> Self {
        self.spawn_chance = chance.clamp(0.0, 1.0);
        self
    }

    fn rng_for(seed: u64, floor: u32) -> StdRng {
        StdRng::seed_from_u64(seed ^ (floor as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl FloorGenerator for TowerGenerator {
    fn generate(&self, seed: u64, floor: u32) -> Result<Floor, WorldError> {
        if floor == CITY_FLOOR {
            return Err(WorldError::GenerationFailed(
                "floor 0 is the city and is never generated".to_string(),
            ));
        }
        if floor > self.max_floor {
            return Err(WorldError::GenerationFailed(format!(
                "floor {} is above the tower limit of {}",
                floor, self.max_floor
            )));
        }

        let mut rng = Self::rng_for(seed, floor);
        let length = 3 + floor.min(7) as usize + rng.gen_range(0..=2);

        let ids: Vec<RoomId> = (0..length)
            .map(|i| {
                if i + 1 == length {
                    stairwell_id(floor)
                } else {
                    floor_room_id(floor, i)
                }
            })
            .collect();

        let mut rooms: Vec<Room> = ids
            .iter()
            .map(|id| {
                let name = ROOM_NAMES.choose(&mut rng).copied().unwrap_or("Tower Room");
                let detail = ROOM_DETAILS.choose(&mut rng).copied().unwrap_or("");
                Room::new(
                    id,
                    name,
                    &format!("Floor {} of the spire. {}", floor, detail),
                    floor,
                )
            })
            .collect();

        let mut previous: Option<Direction> = None;
        for i in 0..length - 1 {
            let choices: Vec<Direction> = LINK_DIRECTIONS
                .iter()
                .copied()
                .filter(|d| Some(d.opposite()) != previous)
                .collect();
            let dir = *choices.choose(&mut rng).unwrap_or(&Direction::East);
            let next_id = ids[i + 1].clone();
            let this_id = ids[i].clone();
            rooms[i] = rooms[i].clone().with_exit(dir, &next_id);
            rooms[i + 1] = rooms[i + 1].clone().with_exit(dir.opposite(), &this_id);
            previous = Some(dir);
        }

        rooms[0] = rooms[0]
            .clone()
            .with_exit(Direction::Down, &stairwell_id(floor - 1));
        let last = length - 1;
        rooms[last] = rooms[last]
            .clone()
            .with_flag(RoomFlag::Stairwell)
            .with_exit(Direction::Up, &floor_room_id(floor + 1, 0));
        rooms[last].name = "Spiral Stairwell".to_string();

        let templates = self.registries.mobs_for_floor(floor);
        let mut spawns = Vec::new();
        if !templates.is_empty() {
            for room in rooms.iter().skip(1) {
                if rng.gen_bool(self.spawn_chance) {
                    if let Some(t) = templates.choose(&mut rng) {
                        spawns.push((t.id.clone(), room.id.clone()));
                    }
                }
            }
        }

        Ok(Floor {
            number: floor,
            entry: ids[0].clone(),
            rooms,
            spawns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> TowerGenerator {
        TowerGenerator::new(Arc::new(Registries::builtin()), 20)
    }

    #[test]
    fn same_seed_same_floor() {
        let g = generator();
        assert_eq!(g.generate(42, 3).unwrap(), g.generate(42, 3).unwrap());
    }

    #[test]
    fn floor_is_connected_from_entry_to_stairs() {
        let floor = generator().generate(7, 2).unwrap();
        assert_eq!(floor.entry, "f2:0");
        let entry = &floor.rooms[0];
        assert_eq!(entry.exits[&Direction::Down].to, "f1:stairs");
        let stairs = floor.rooms.last().unwrap();
        assert_eq!(stairs.id, "f2:stairs");
        assert!(stairs.has_flag(RoomFlag::Stairwell));
        assert_eq!(stairs.exits[&Direction::Up].to, "f3:0");

        // every link is mirrored
        for room in &floor.rooms {
            for (dir, exit) in &room.exits {
                if let Some(other) = floor.rooms.iter().find(|r| r.id == exit.to) {
                    assert_eq!(other.exits[&dir.opposite()].to, room.id);
                }
            }
        }
    }

    #[test]
    fn first_floor_descends_to_city() {
        let floor = generator().generate(1, 1).unwrap();
        assert_eq!(floor.rooms[0].exits[&Direction::Down].to, CITY_STAIRS_ID);
    }

    #[test]
    fn limits_are_enforced() {
        let g = generator();
        assert!(matches!(g.generate(1, 0), Err(WorldError::GenerationFailed(_))));
        assert!(matches!(g.generate(1, 21), Err(WorldError::GenerationFailed(_))));
    }

    #[test]
    fn spawn_chance_zero_means_empty_floor() {
        let g = generator().with_spawn_chance(0.0);
        assert!(g.generate(9, 4).unwrap().spawns.is_empty());
    }

    #[test]
    fn floor_of_parses_ids() {
        assert_eq!(floor_of("city:plaza"), Some(0));
        assert_eq!(floor_of("f12:stairs"), Some(12));
        assert_eq!(floor_of("f3:0"), Some(3));
        assert_eq!(floor_of("elsewhere"), None);
    }
}
