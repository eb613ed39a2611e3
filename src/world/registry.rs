//! Authoritative room and actor state.
//!
//! Actors and rooms refer to each other by id only. Every operation that moves
//! an actor updates the source room's occupant set, the destination room's
//! occupant set and the actor's room pointer inside one `&mut self` call, so
//! between two processed events the two views always agree (see
//! [`WorldRegistry::check_integrity`]).

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::world::content::{ItemKind, MobTemplate, Registries};
use crate::world::cooldown::CooldownTable;
use crate::world::errors::WorldError;
use crate::world::generator::{floor_of, Floor};
use crate::world::types::{
    Actor, ActorId, ActorKind, Direction, MobData, PlayerSnapshot, Pools, Room, RoomId, Stall,
    StallOffer, StatusFlags, CITY_FLOOR, PLAYER_SNAPSHOT_VERSION,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub actor: ActorId,
    pub from: RoomId,
    pub to: RoomId,
    pub direction: Option<Direction>,
    /// Stall that was force-closed because its owner left the room.
    pub closed_stall: Option<Stall>,
}

/// Result of a successful stall purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub seller: ActorId,
    pub item: String,
    pub price: u32,
}

/// Persisted form of a player actor. `None` for mobs.
pub fn snapshot_actor(actor: &Actor, now: chrono::DateTime<chrono::Utc>) -> Option<PlayerSnapshot> {
    let data = actor.player()?.clone();
    Some(PlayerSnapshot {
        name: actor.name.clone(),
        room: actor.room.clone(),
        pools: actor.pools,
        level: actor.level,
        cooldowns: actor.cooldowns.clone(),
        data,
        saved_at: now,
        schema_version: PLAYER_SNAPSHOT_VERSION,
    })
}

#[derive(Debug, Default)]
pub struct WorldRegistry {
    rooms: HashMap<RoomId, Room>,
    actors: HashMap<ActorId, Actor>,
    players_by_name: HashMap<String, ActorId>,
    next_actor_id: u64,
    highest_floor: u32,
}

impl WorldRegistry {
    pub fn new() -> Self {
        Self {
            next_actor_id: 1,
            ..Self::default()
        }
    }

    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let mut registry = Self::new();
        for room in rooms {
            registry.insert_room(room);
        }
        registry
    }

    /// Add a room if its id is new. Returns false if it already existed.
    pub fn insert_room(&mut self, room: Room) -> bool {
        if self.rooms.contains_key(&room.id) {
            return false;
        }
        if room.floor > self.highest_floor {
            self.highest_floor = room.floor;
        }
        self.rooms.insert(room.id.clone(), room);
        true
    }

    /// Install a generated floor and spawn its mobs. Returns the spawned ids.
    pub fn install_floor(&mut self, floor: Floor, registries: &Registries) -> Vec<ActorId> {
        let number = floor.number;
        for room in floor.rooms {
            self.insert_room(room);
        }
        if number > self.highest_floor {
            self.highest_floor = number;
        }
        let mut spawned = Vec::new();
        for (template_id, room_id) in floor.spawns {
            match registries.mob_template(&template_id) {
                Some(template) => match self.spawn_mob(template, &room_id) {
                    Ok(id) => spawned.push(id),
                    Err(e) => warn!("Failed to spawn {} in {}: {}", template_id, room_id, e),
                },
                None => warn!("Unknown mob template {} on floor {}", template_id, number),
            }
        }
        debug!("Installed floor {} ({} mobs)", number, spawned.len());
        spawned
    }

    pub fn highest_floor(&self) -> u32 {
        self.highest_floor
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn players(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values().filter(|a| a.is_player())
    }

    pub fn player_id(&self, name: &str) -> Option<ActorId> {
        self.players_by_name
            .get(&name.trim().to_ascii_lowercase())
            .copied()
    }

    fn allocate_id(&mut self) -> ActorId {
        if self.next_actor_id == 0 {
            self.next_actor_id = 1;
        }
        let id = ActorId(self.next_actor_id);
        self.next_actor_id += 1;
        id
    }

    /// Place a player into the world from their snapshot. Falls back to
    /// `fallback_room` when the saved room no longer exists.
    pub fn spawn_player(
        &mut self,
        snapshot: PlayerSnapshot,
        fallback_room: &str,
    ) -> Result<ActorId, WorldError> {
        let key = snapshot.name.to_ascii_lowercase();
        if self.players_by_name.contains_key(&key) {
            return Err(WorldError::Internal(format!(
                "player {} is already in the world",
                snapshot.name
            )));
        }
        let room_id = if self.rooms.contains_key(&snapshot.room) {
            snapshot.room.clone()
        } else if self.rooms.contains_key(fallback_room) {
            debug!(
                "Saved room {} for {} missing; using {}",
                snapshot.room, snapshot.name, fallback_room
            );
            fallback_room.to_string()
        } else {
            return Err(WorldError::NotFound(format!("room {}", fallback_room)));
        };

        let id = self.allocate_id();
        let actor = Actor {
            id,
            name: snapshot.name,
            room: room_id.clone(),
            pools: snapshot.pools,
            level: snapshot.level.max(1),
            status: StatusFlags::default(),
            cooldowns: snapshot.cooldowns,
            kind: ActorKind::Player(snapshot.data),
        };
        self.players_by_name.insert(key, id);
        self.actors.insert(id, actor);
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.occupants.insert(id);
        }
        Ok(id)
    }

    /// Create a fresh mob instance from a template.
    pub fn spawn_mob(&mut self, template: &MobTemplate, room_id: &str) -> Result<ActorId, WorldError> {
        if !self.rooms.contains_key(room_id) {
            return Err(WorldError::NotFound(format!("room {}", room_id)));
        }
        let id = self.allocate_id();
        let actor = Actor {
            id,
            name: template.name.clone(),
            room: room_id.to_string(),
            pools: Pools::full(template.max_health, 0),
            level: template.level,
            status: StatusFlags::default(),
            cooldowns: CooldownTable::default(),
            kind: ActorKind::Mob(MobData {
                template: template.id.clone(),
                home_room: room_id.to_string(),
                attack_bonus: template.attack_bonus,
                defense: template.defense,
                damage: (template.damage_min, template.damage_max.max(template.damage_min)),
                mitigation: template.mitigation,
                xp_reward: template.xp_reward,
                respawn_secs: template.respawn_secs,
                loot: template.loot.clone(),
            }),
        };
        self.actors.insert(id, actor);
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.occupants.insert(id);
        }
        Ok(id)
    }

    /// Remove an actor entirely (disconnect or death of a mob). Any open stall
    /// is closed first and its goods returned to the owner.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<Actor> {
        let room_id = self.actors.get(&id)?.room.clone();
        let stall = self
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.stalls.remove(&id));
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.occupants.remove(&id);
        }
        let mut actor = self.actors.remove(&id)?;
        if let (Some(stall), Some(player)) = (stall, actor.player_mut()) {
            player
                .inventory
                .extend(stall.offers.into_iter().map(|offer| offer.item));
        }
        if actor.is_player() {
            self.players_by_name.remove(&actor.name.to_ascii_lowercase());
        }
        Some(actor)
    }

    /// Move through an exit. `from` must be the actor's current room.
    pub fn move_actor(
        &mut self,
        id: ActorId,
        from: &str,
        direction: Direction,
    ) -> Result<MoveOutcome, WorldError> {
        let actor = self
            .actors
            .get(&id)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", id)))?;
        if actor.room != from {
            return Err(WorldError::Internal(format!(
                "{} is in {}, not {}",
                actor.name, actor.room, from
            )));
        }
        let room = self
            .rooms
            .get(from)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", from)))?;
        let exit = room
            .exits
            .get(&direction)
            .ok_or_else(|| WorldError::NoSuchExit(direction.to_string()))?;

        if let Some(key) = &exit.key {
            let has_key = actor
                .player()
                .map(|p| p.inventory.iter().any(|i| i == key))
                .unwrap_or(false);
            if !has_key {
                return Err(WorldError::Blocked(format!(
                    "The way {} is locked.",
                    direction
                )));
            }
        }

        let to = exit.to.clone();
        if !self.rooms.contains_key(&to) {
            return match floor_of(&to) {
                Some(floor) if floor > self.highest_floor => {
                    Err(WorldError::FloorNotGenerated { floor })
                }
                _ => Err(WorldError::NoSuchExit(direction.to_string())),
            };
        }

        let closed_stall = self.transfer(id, from, &to);
        Ok(MoveOutcome {
            actor: id,
            from: from.to_string(),
            to,
            direction: Some(direction),
            closed_stall,
        })
    }

    /// Move without an exit (death respawn, admin moves).
    pub fn relocate(&mut self, id: ActorId, to: &str) -> Result<MoveOutcome, WorldError> {
        let from = self
            .actors
            .get(&id)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", id)))?
            .room
            .clone();
        if !self.rooms.contains_key(to) {
            return Err(WorldError::NotFound(format!("room {}", to)));
        }
        let closed_stall = if from == to {
            None
        } else {
            self.transfer(id, &from, to)
        };
        Ok(MoveOutcome {
            actor: id,
            from,
            to: to.to_string(),
            direction: None,
            closed_stall,
        })
    }

    /// The one place occupant sets and room pointers change together.
    fn transfer(&mut self, id: ActorId, from: &str, to: &str) -> Option<Stall> {
        let stall = self.rooms.get_mut(from).and_then(|room| {
            room.occupants.remove(&id);
            room.stalls.remove(&id)
        });
        if let Some(room) = self.rooms.get_mut(to) {
            room.occupants.insert(id);
        }
        if let Some(actor) = self.actors.get_mut(&id) {
            actor.room = to.to_string();
            if let (Some(stall), Some(player)) = (stall.as_ref(), actor.player_mut()) {
                player
                    .inventory
                    .extend(stall.offers.iter().map(|offer| offer.item.clone()));
            }
        }
        stall
    }

    pub fn place_item(&mut self, room_id: &str, item: &str) -> Result<(), WorldError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", room_id)))?;
        room.items.push(item.to_string());
        Ok(())
    }

    /// Remove the first ground item matching `query`.
    pub fn take_item(
        &mut self,
        room_id: &str,
        query: &str,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", room_id)))?;
        let found = registries
            .match_item(&room.items, query)
            .cloned()
            .ok_or_else(|| WorldError::NotFound(query.to_string()))?;
        if let Some(pos) = room.items.iter().position(|i| *i == found) {
            room.items.remove(pos);
        }
        Ok(found)
    }

    /// Ground to inventory.
    pub fn pick_up(
        &mut self,
        id: ActorId,
        query: &str,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let room_id = self.player_room(id)?;
        let item = self.take_item(&room_id, query, registries)?;
        if let Some(player) = self.actors.get_mut(&id).and_then(|a| a.player_mut()) {
            player.inventory.push(item.clone());
        }
        Ok(item)
    }

    /// Inventory to ground.
    pub fn drop_item(
        &mut self,
        id: ActorId,
        query: &str,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let room_id = self.player_room(id)?;
        let item = self.remove_from_inventory(id, query, registries)?;
        self.place_item(&room_id, &item)?;
        Ok(item)
    }

    fn player_room(&self, id: ActorId) -> Result<RoomId, WorldError> {
        match self.actors.get(&id) {
            Some(actor) if actor.is_player() => Ok(actor.room.clone()),
            Some(_) => Err(WorldError::NotEligible("Only players can do that.".to_string())),
            None => Err(WorldError::NotFound(format!("actor {}", id))),
        }
    }

    fn remove_from_inventory(
        &mut self,
        id: ActorId,
        query: &str,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let player = self
            .actors
            .get_mut(&id)
            .and_then(|a| a.player_mut())
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", id)))?;
        let found = registries
            .match_item(&player.inventory, query)
            .cloned()
            .ok_or_else(|| WorldError::NotEligible(format!("You aren't carrying {}.", query)))?;
        if let Some(pos) = player.inventory.iter().position(|i| *i == found) {
            player.inventory.remove(pos);
        }
        Ok(found)
    }

    /// Move an inventory item into the matching equipment slot. Whatever was
    /// in that slot goes back to the inventory.
    pub fn equip(
        &mut self,
        id: ActorId,
        query: &str,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let item = self.remove_from_inventory(id, query, registries)?;
        let kind = registries.item(&item).map(|d| d.kind.clone());
        let player = self
            .actors
            .get_mut(&id)
            .and_then(|a| a.player_mut())
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", id)))?;
        let slot = match kind {
            Some(ItemKind::Weapon { .. }) => &mut player.equipment.weapon,
            Some(ItemKind::Armor { .. }) => &mut player.equipment.armor,
            _ => {
                player.inventory.push(item);
                return Err(WorldError::NotEligible("You can't equip that.".to_string()));
            }
        };
        if let Some(previous) = slot.replace(item.clone()) {
            player.inventory.push(previous);
        }
        Ok(item)
    }

    /// Empty both equipment slots into the inventory.
    pub fn unequip_all(&mut self, id: ActorId) -> Result<Vec<String>, WorldError> {
        let player = self
            .actors
            .get_mut(&id)
            .and_then(|a| a.player_mut())
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", id)))?;
        let removed: Vec<String> = [player.equipment.weapon.take(), player.equipment.armor.take()]
            .into_iter()
            .flatten()
            .collect();
        player.inventory.extend(removed.iter().cloned());
        Ok(removed)
    }

    /// Open a stall in the actor's room. Only city rooms allow stalls.
    pub fn open_stall(&mut self, id: ActorId) -> Result<(), WorldError> {
        let (room_id, name) = match self.actors.get(&id) {
            Some(a) if a.is_player() => (a.room.clone(), a.name.clone()),
            _ => return Err(WorldError::NotEligible("Only players can open stalls.".to_string())),
        };
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", room_id)))?;
        if room.floor != CITY_FLOOR || !room.is_city() {
            return Err(WorldError::WrongLocation(
                "Stalls may only be opened in the city.".to_string(),
            ));
        }
        if room.stalls.contains_key(&id) {
            return Err(WorldError::NotEligible("Your stall is already open.".to_string()));
        }
        room.stalls.insert(
            id,
            Stall {
                owner: id,
                owner_name: name,
                offers: Vec::new(),
            },
        );
        Ok(())
    }

    /// Close the actor's stall and return unsold goods to their inventory.
    pub fn close_stall(&mut self, id: ActorId) -> Result<Stall, WorldError> {
        let room_id = self.player_room(id)?;
        let stall = self
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.stalls.remove(&id))
            .ok_or_else(|| WorldError::NotEligible("You don't have a stall open.".to_string()))?;
        if let Some(player) = self.actors.get_mut(&id).and_then(|a| a.player_mut()) {
            player
                .inventory
                .extend(stall.offers.iter().map(|offer| offer.item.clone()));
        }
        Ok(stall)
    }

    /// List an inventory item on the actor's open stall.
    pub fn add_stall_offer(
        &mut self,
        id: ActorId,
        query: &str,
        price: u32,
        registries: &Registries,
    ) -> Result<String, WorldError> {
        let room_id = self.player_room(id)?;
        let has_stall = self
            .rooms
            .get(&room_id)
            .map(|room| room.stalls.contains_key(&id))
            .unwrap_or(false);
        if !has_stall {
            return Err(WorldError::NotEligible("Open a stall first.".to_string()));
        }
        let item = self.remove_from_inventory(id, query, registries)?;
        if let Some(stall) = self
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.stalls.get_mut(&id))
        {
            stall.offers.push(StallOffer {
                item: item.clone(),
                price,
            });
        }
        Ok(item)
    }

    /// Buy `item_query` from the stall of `seller_query` in the buyer's room.
    /// Gold and goods change hands in one step.
    pub fn buy(
        &mut self,
        buyer: ActorId,
        seller_query: &str,
        item_query: &str,
        registries: &Registries,
    ) -> Result<Purchase, WorldError> {
        let room_id = self.player_room(buyer)?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| WorldError::NotFound(format!("room {}", room_id)))?;
        let seller_q = seller_query.trim().to_ascii_lowercase();
        let stall = room
            .stalls
            .values()
            .find(|s| s.owner_name.to_ascii_lowercase().starts_with(&seller_q))
            .ok_or_else(|| WorldError::NotFound(format!("a stall run by {}", seller_query)))?;
        let seller = stall.owner;
        if seller == buyer {
            return Err(WorldError::NotEligible("You can't buy from yourself.".to_string()));
        }
        let offered: Vec<String> = stall.offers.iter().map(|o| o.item.clone()).collect();
        let item = registries
            .match_item(&offered, item_query)
            .cloned()
            .ok_or_else(|| WorldError::NotFound(item_query.to_string()))?;
        let price = stall
            .offers
            .iter()
            .find(|o| o.item == item)
            .map(|o| o.price)
            .unwrap_or(0);

        let gold = self
            .actors
            .get(&buyer)
            .and_then(|a| a.player())
            .map(|p| p.gold)
            .unwrap_or(0);
        if gold < price {
            return Err(WorldError::InsufficientResource {
                resource: "gold",
                needed: price.min(i32::MAX as u32) as i32,
                available: gold.min(i32::MAX as u32) as i32,
            });
        }

        if let Some(stall) = self
            .rooms
            .get_mut(&room_id)
            .and_then(|room| room.stalls.get_mut(&seller))
        {
            if let Some(pos) = stall.offers.iter().position(|o| o.item == item) {
                stall.offers.remove(pos);
            }
        }
        if let Some(p) = self.actors.get_mut(&buyer).and_then(|a| a.player_mut()) {
            p.gold -= price;
            p.inventory.push(item.clone());
        }
        if let Some(p) = self.actors.get_mut(&seller).and_then(|a| a.player_mut()) {
            p.gold = p.gold.saturating_add(price);
        }
        Ok(Purchase {
            seller,
            item,
            price,
        })
    }

    /// Find someone in `room_id` answering to `query`, other than `exclude`.
    pub fn find_in_room(&self, room_id: &str, query: &str, exclude: ActorId) -> Option<ActorId> {
        let room = self.rooms.get(room_id)?;
        room.occupants
            .iter()
            .copied()
            .filter(|id| *id != exclude)
            .find(|id| {
                self.actors
                    .get(id)
                    .map(|a| a.answers_to(query))
                    .unwrap_or(false)
            })
    }

    /// Occupants of the room, in id order.
    pub fn occupants_of(&self, room_id: &str) -> Vec<ActorId> {
        self.rooms
            .get(room_id)
            .map(|r| r.occupants.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Players anywhere on `floor`.
    pub fn players_on_floor(&self, floor: u32) -> Vec<ActorId> {
        let mut ids: Vec<ActorId> = self
            .players()
            .filter(|a| {
                self.rooms
                    .get(&a.room)
                    .map(|r| r.floor == floor)
                    .unwrap_or(false)
            })
            .map(|a| a.id)
            .collect();
        ids.sort();
        ids
    }

    /// Build the persisted form of a player from committed state.
    pub fn snapshot_player(
        &self,
        id: ActorId,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<PlayerSnapshot> {
        snapshot_actor(self.actors.get(&id)?, now)
    }

    /// Ground items of every room, for the tower snapshot.
    pub fn ground_items(&self) -> BTreeMap<RoomId, Vec<String>> {
        self.rooms
            .values()
            .map(|r| (r.id.clone(), r.items.clone()))
            .collect()
    }

    /// Replace ground items of rooms that exist. Unknown room ids are skipped.
    pub fn restore_ground_items(&mut self, items: &BTreeMap<RoomId, Vec<String>>) -> usize {
        let mut restored = 0;
        for (room_id, list) in items {
            if let Some(room) = self.rooms.get_mut(room_id) {
                room.items = list.clone();
                restored += 1;
            }
        }
        restored
    }

    /// Verify that occupant sets and room pointers agree in both directions.
    pub fn check_integrity(&self) -> Result<(), String> {
        for (id, actor) in &self.actors {
            let room = self
                .rooms
                .get(&actor.room)
                .ok_or_else(|| format!("{} points at missing room {}", id, actor.room))?;
            if !room.occupants.contains(id) {
                return Err(format!("{} missing from occupants of {}", id, room.id));
            }
        }
        for room in self.rooms.values() {
            for id in &room.occupants {
                match self.actors.get(id) {
                    Some(actor) if actor.room == room.id => {}
                    Some(actor) => {
                        return Err(format!(
                            "{} listed in {} but points at {}",
                            id, room.id, actor.room
                        ))
                    }
                    None => return Err(format!("unknown {} listed in {}", id, room.id)),
                }
            }
            for owner in room.stalls.keys() {
                if !room.occupants.contains(owner) {
                    return Err(format!("stall of absent {} left open in {}", owner, room.id));
                }
            }
        }
        Ok(())
    }
}
