//! Intent handlers. Each runs on the world task after parsing and validation
//! and either commits its whole effect or returns an error with no change.

use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::world::combat::combat_profile;
use crate::world::commands::{help_text, parse_command, validate, Intent, StallOp, ValidationContext};
use crate::world::content::SpellEffect;
use crate::world::cooldown::try_consume;
use crate::world::engine::{capitalise, next_level_xp, PendingClimb, World};
use crate::world::errors::WorldError;
use crate::world::types::{ActorId, Direction, RoomFlag};

impl World {
    /// Parse, validate and apply one command line from `actor`.
    pub fn apply_command(&mut self, actor: ActorId, line: &str) -> Result<(), WorldError> {
        let intent = parse_command(line)?;
        let ctx = ValidationContext {
            now: self.clock.now(),
            in_combat: self.combat.in_combat(actor),
        };
        {
            let a = self
                .registry
                .actor(actor)
                .ok_or_else(|| WorldError::NotFound(format!("actor {}", actor)))?;
            validate(a, &intent, ctx)?;
        }
        debug!("{} -> {}", actor, intent.verb());
        self.dispatch(actor, intent)
    }

    fn dispatch(&mut self, actor: ActorId, intent: Intent) -> Result<(), WorldError> {
        match intent {
            Intent::Move(dir) => self.handle_move(actor, dir),
            Intent::Look(target) => self.handle_look(actor, target.as_deref()),
            Intent::Who => self.handle_who(actor),
            Intent::Score => self.handle_score(actor),
            Intent::Inventory => self.handle_inventory(actor),
            Intent::Take(query) => self.handle_take(actor, &query),
            Intent::Drop(query) => self.handle_drop(actor, &query),
            Intent::Equip(query) => self.handle_equip(actor, &query),
            Intent::Unequip => self.handle_unequip(actor),
            Intent::Attack(query) => self.handle_attack(actor, &query),
            Intent::Cast { spell, target } => self.handle_cast(actor, &spell, target.as_deref()),
            Intent::Flee => {
                self.combat.request_flee(actor)?;
                self.router.to_actor(actor, "You look for a way out...");
                Ok(())
            }
            Intent::Say(text) => {
                let now = self.clock.now();
                self.router.say(&self.registry, actor, &text, now).map(|_| ())
            }
            Intent::Emote(text) => {
                let now = self.clock.now();
                self.router.emote(&self.registry, actor, &text, now).map(|_| ())
            }
            Intent::Shout(text) => {
                let now = self.clock.now();
                self.router.shout(&self.registry, actor, &text, now).map(|_| ())
            }
            Intent::Tell { target, text } => {
                let now = self.clock.now();
                self.router
                    .tell(&self.registry, actor, &target, &text, now)
                    .map(|_| ())
            }
            Intent::Ignore(name) => self.handle_ignore(actor, name.as_deref()),
            Intent::Unignore(name) => self.handle_unignore(actor, &name),
            Intent::Stall(op) => self.handle_stall(actor, op),
            Intent::Stalls => self.handle_stalls(actor),
            Intent::Buy { seller, item } => self.handle_buy(actor, &seller, &item),
            Intent::Sleep => self.set_sleeping(actor, true),
            Intent::Wake => self.set_sleeping(actor, false),
            Intent::Save => self.handle_save(actor),
            Intent::Quit => {
                info!("{} quit", self.actor_name(actor));
                self.router.close(actor, "Farewell. Your progress has been saved.");
                Ok(())
            }
            Intent::Help(topic) => {
                self.router.to_actor(actor, help_text(topic.as_deref()));
                Ok(())
            }
        }
    }

    fn room_of(&self, actor: ActorId) -> Result<String, WorldError> {
        self.registry
            .actor(actor)
            .map(|a| a.room().to_string())
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", actor)))
    }

    fn handle_move(&mut self, actor: ActorId, dir: Direction) -> Result<(), WorldError> {
        let from = self.room_of(actor)?;
        match self.move_actor(actor, &from, dir) {
            Err(WorldError::FloorNotGenerated { floor }) => {
                let waiting = self.pending_climbs.entry(floor).or_default();
                waiting.retain(|climb| climb.actor != actor);
                waiting.push(PendingClimb {
                    actor,
                    from,
                    direction: dir,
                });
                self.router.to_actor(
                    actor,
                    "The stairs climb into swirling fog. You wait while the floor above takes shape...",
                );
                self.request_floor(floor);
                Ok(())
            }
            other => other,
        }
    }

    /// Describe the actor's current room.
    pub(crate) fn show_room(&self, actor: ActorId) {
        let Some(room) = self
            .registry
            .actor(actor)
            .and_then(|a| self.registry.room(a.room()))
        else {
            return;
        };
        let mut lines = vec![room.name.clone(), room.description.clone()];
        let exits: Vec<&str> = room.exits.keys().map(|d| d.as_str()).collect();
        if exits.is_empty() {
            lines.push("Exits: none".to_string());
        } else {
            lines.push(format!("Exits: {}", exits.join(", ")));
        }
        if !room.items.is_empty() {
            let items: Vec<&str> = room
                .items
                .iter()
                .map(|i| self.registries.item_name(i))
                .collect();
            lines.push(format!("On the ground: {}", items.join(", ")));
        }
        for id in room.occupants() {
            if *id == actor {
                continue;
            }
            if let Some(other) = self.registry.actor(*id) {
                let state = if self.combat.in_combat(*id) {
                    " (fighting)"
                } else if other.status.sleeping {
                    " (asleep)"
                } else {
                    ""
                };
                lines.push(format!("{} is here{}.", capitalise(&other.name), state));
            }
        }
        let stalls = room.stalls().count();
        if stalls > 0 {
            lines.push(format!("{} stall(s) are open here. Type STALLS.", stalls));
        }
        self.router.to_actor(actor, lines.join("\n"));
    }

    fn handle_look(&mut self, actor: ActorId, target: Option<&str>) -> Result<(), WorldError> {
        let Some(query) = target else {
            self.show_room(actor);
            return Ok(());
        };
        let room = self.room_of(actor)?;
        if let Some(dir) = Direction::parse(query) {
            let exit = self
                .registry
                .room(&room)
                .and_then(|r| r.exits.get(&dir))
                .ok_or_else(|| WorldError::NoSuchExit(dir.to_string()))?;
            let text = match self.registry.room(&exit.to) {
                Some(next) => format!("To the {} you see {}.", dir, next.name),
                None => format!("The way {} fades into fog.", dir),
            };
            self.router.to_actor(actor, text);
            return Ok(());
        }
        let other = self
            .registry
            .find_in_room(&room, query, actor)
            .and_then(|id| self.registry.actor(id))
            .ok_or_else(|| WorldError::NotFound(query.to_string()))?;
        let percent = other.pools.health * 100 / other.pools.max_health.max(1);
        let condition = if percent >= 100 {
            "in perfect health"
        } else if percent >= 60 {
            "lightly wounded"
        } else if percent >= 25 {
            "badly wounded"
        } else {
            "near death"
        };
        self.router.to_actor(
            actor,
            format!("{} (level {}) is {}.", capitalise(&other.name), other.level, condition),
        );
        Ok(())
    }

    fn handle_who(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let mut names: Vec<String> = self
            .registry
            .players()
            .map(|p| format!("  {} (level {})", p.name, p.level))
            .collect();
        names.sort();
        let mut lines = vec![format!("{} player(s) online:", names.len())];
        lines.extend(names);
        self.router.to_actor(actor, lines.join("\n"));
        Ok(())
    }

    fn handle_score(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let a = self
            .registry
            .actor(actor)
            .ok_or_else(|| WorldError::NotFound(format!("actor {}", actor)))?;
        let profile = combat_profile(a, &self.registries, self.combat.policy());
        let mut lines = vec![
            format!("{}, level {}", a.name, a.level),
            format!(
                "HP {}/{}  Mana {}/{}",
                a.pools.health, a.pools.max_health, a.pools.mana, a.pools.max_mana
            ),
            format!(
                "Attack +{}  Defense {}  Damage {}-{}",
                profile.attack_bonus, profile.defense, profile.damage.0, profile.damage.1
            ),
        ];
        if let Some(p) = a.player() {
            lines.push(format!(
                "Experience {}/{}  Gold {}",
                p.experience,
                next_level_xp(a.level),
                p.gold
            ));
        }
        self.router.to_actor(actor, lines.join("\n"));
        Ok(())
    }

    fn handle_inventory(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let player = self
            .registry
            .actor(actor)
            .and_then(|a| a.player())
            .ok_or_else(|| WorldError::NotEligible("You carry nothing.".to_string()))?;
        let name = |id: &Option<String>| {
            id.as_deref()
                .map(|i| self.registries.item_name(i).to_string())
                .unwrap_or_else(|| "nothing".to_string())
        };
        let mut lines = vec![
            format!("Wielding: {}", name(&player.equipment.weapon)),
            format!("Wearing: {}", name(&player.equipment.armor)),
        ];
        if player.inventory.is_empty() {
            lines.push("You are carrying nothing else.".to_string());
        } else {
            lines.push("You are carrying:".to_string());
            lines.extend(
                player
                    .inventory
                    .iter()
                    .map(|i| format!("  {}", self.registries.item_name(i))),
            );
        }
        lines.push(format!("Gold: {}", player.gold));
        self.router.to_actor(actor, lines.join("\n"));
        Ok(())
    }

    fn handle_take(&mut self, actor: ActorId, query: &str) -> Result<(), WorldError> {
        let item = self.registry.pick_up(actor, query, &self.registries)?;
        let item_name = self.registries.item_name(&item).to_string();
        let room = self.room_of(actor)?;
        self.router.to_actor(actor, format!("You take {}.", item_name));
        let line = format!("{} takes {}.", self.actor_name(actor), item_name);
        self.router.to_room(&self.registry, &room, &line, &[actor]);
        Ok(())
    }

    fn handle_drop(&mut self, actor: ActorId, query: &str) -> Result<(), WorldError> {
        let item = self.registry.drop_item(actor, query, &self.registries)?;
        let item_name = self.registries.item_name(&item).to_string();
        let room = self.room_of(actor)?;
        self.router.to_actor(actor, format!("You drop {}.", item_name));
        let line = format!("{} drops {}.", self.actor_name(actor), item_name);
        self.router.to_room(&self.registry, &room, &line, &[actor]);
        Ok(())
    }

    fn handle_equip(&mut self, actor: ActorId, query: &str) -> Result<(), WorldError> {
        let item = self.registry.equip(actor, query, &self.registries)?;
        self.router.to_actor(
            actor,
            format!("You ready {}.", self.registries.item_name(&item)),
        );
        Ok(())
    }

    fn handle_unequip(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let removed = self.registry.unequip_all(actor)?;
        if removed.is_empty() {
            return Err(WorldError::NotEligible("You have nothing equipped.".to_string()));
        }
        let names: Vec<&str> = removed.iter().map(|i| self.registries.item_name(i)).collect();
        self.router
            .to_actor(actor, format!("You put away {}.", names.join(" and ")));
        Ok(())
    }

    fn ensure_fighting_allowed(&self, room: &str) -> Result<(), WorldError> {
        let safe = self
            .registry
            .room(room)
            .map(|r| r.has_flag(RoomFlag::Safe))
            .unwrap_or(false);
        if safe {
            return Err(WorldError::WrongLocation(
                "You can't fight here; this place is protected.".to_string(),
            ));
        }
        Ok(())
    }

    fn handle_attack(&mut self, actor: ActorId, query: &str) -> Result<(), WorldError> {
        let room = self.room_of(actor)?;
        let target = self
            .registry
            .find_in_room(&room, query, actor)
            .ok_or_else(|| WorldError::NotFound(query.to_string()))?;
        self.ensure_fighting_allowed(&room)?;
        self.combat.engage(&self.registry, actor, target)?;
        let (a, t) = (self.actor_name(actor), self.actor_name(target));
        self.router.to_actor(actor, format!("You attack {}!", t));
        self.router.to_actor(target, format!("{} attacks you!", capitalise(&a)));
        self.router.to_room(
            &self.registry,
            &room,
            &format!("{} attacks {}!", capitalise(&a), t),
            &[actor, target],
        );
        Ok(())
    }

    fn handle_cast(&mut self, actor: ActorId, query: &str, target: Option<&str>) -> Result<(), WorldError> {
        let spell = self
            .registries
            .find_spell(query)
            .cloned()
            .ok_or_else(|| WorldError::NotFound(format!("a spell called {}", query)))?;
        let room = self.room_of(actor)?;
        let now = self.clock.now();

        // target resolves before mana and cooldown are charged
        let target_id = if spell.needs_target() {
            let query = match target {
                Some(q) => q,
                None => {
                    return Err(WorldError::InvalidCommand(format!(
                        "Cast {} at whom?",
                        spell.name
                    )))
                }
            };
            let id = self
                .registry
                .find_in_room(&room, query, actor)
                .ok_or_else(|| WorldError::NotFound(query.to_string()))?;
            self.ensure_fighting_allowed(&room)?;
            let (is_player, alive) = self
                .registry
                .actor(id)
                .map(|t| (t.is_player(), t.is_alive()))
                .unwrap_or((true, false));
            if is_player || !alive {
                return Err(WorldError::NotEligible(format!(
                    "You can't cast {} on {}.",
                    spell.name,
                    self.actor_name(id)
                )));
            }
            Some(id)
        } else {
            None
        };

        {
            let caster = self
                .registry
                .actor_mut(actor)
                .ok_or_else(|| WorldError::NotFound(format!("actor {}", actor)))?;
            try_consume(
                caster,
                &spell.id,
                &spell.name,
                spell.mana_cost,
                Duration::from_secs(spell.cooldown_secs),
                now,
            )?;
        }
        let caster_name = capitalise(&self.actor_name(actor));

        match (&spell.effect, target_id) {
            (SpellEffect::Heal { amount }, _) => {
                if let Some(a) = self.registry.actor_mut(actor) {
                    a.pools.health = (a.pools.health + amount).min(a.pools.max_health);
                }
                self.router
                    .to_actor(actor, format!("You cast {}. You feel better.", spell.name));
                let line = format!("{} casts {}.", caster_name, spell.name);
                self.router.to_room(&self.registry, &room, &line, &[actor]);
            }
            (SpellEffect::Damage { min, max }, Some(target)) => {
                let damage = self.rng.gen_range(*min..=(*max).max(*min));
                self.router.to_actor(actor, format!("You cast {}!", spell.name));
                let events = self.combat.strike(&mut self.registry, actor, target, damage)?;
                self.apply_combat_events(events);
            }
            (SpellEffect::Stun { secs, damage }, Some(target)) => {
                let until = now + chrono::Duration::seconds(*secs as i64);
                if let Some(t) = self.registry.actor_mut(target) {
                    t.status.stunned_until = Some(until);
                }
                self.router.to_actor(
                    actor,
                    format!("You cast {}! {} reels.", spell.name, capitalise(&self.actor_name(target))),
                );
                if *damage > 0 {
                    let events = self.combat.strike(&mut self.registry, actor, target, *damage)?;
                    self.apply_combat_events(events);
                } else {
                    self.combat.engage(&self.registry, actor, target)?;
                }
            }
            (_, None) => {
                return Err(WorldError::Internal(format!(
                    "spell {} resolved without a target",
                    spell.id
                )))
            }
        }
        Ok(())
    }

    fn handle_ignore(&mut self, actor: ActorId, name: Option<&str>) -> Result<(), WorldError> {
        let own = self.actor_name(actor);
        let player = self
            .registry
            .actor_mut(actor)
            .and_then(|a| a.player_mut())
            .ok_or_else(|| WorldError::NotEligible("Only players can do that.".to_string()))?;
        let Some(name) = name else {
            let text = if player.ignored.is_empty() {
                "You are not ignoring anyone.".to_string()
            } else {
                let list: Vec<&str> = player.ignored.iter().map(String::as_str).collect();
                format!("Ignoring: {}", list.join(", "))
            };
            self.router.to_actor(actor, text);
            return Ok(());
        };
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(WorldError::InvalidCommand("Ignore whom?".to_string()));
        }
        if key == own.to_ascii_lowercase() {
            return Err(WorldError::NotEligible("You can't ignore yourself.".to_string()));
        }
        player.ignored.insert(key);
        self.router
            .to_actor(actor, format!("You are now ignoring {}.", name.trim()));
        Ok(())
    }

    fn handle_unignore(&mut self, actor: ActorId, name: &str) -> Result<(), WorldError> {
        let key = name.trim().to_ascii_lowercase();
        let removed = self
            .registry
            .actor_mut(actor)
            .and_then(|a| a.player_mut())
            .map(|p| p.ignored.remove(&key))
            .unwrap_or(false);
        if !removed {
            return Err(WorldError::NotFound(format!("{} on your ignore list", name.trim())));
        }
        self.router
            .to_actor(actor, format!("You stop ignoring {}.", name.trim()));
        Ok(())
    }

    fn handle_stall(&mut self, actor: ActorId, op: StallOp) -> Result<(), WorldError> {
        let room = self.room_of(actor)?;
        let name = self.actor_name(actor);
        match op {
            StallOp::Open => {
                self.registry.open_stall(actor)?;
                self.router.to_actor(actor, "You set up a stall.");
                let line = format!("{} sets up a stall.", name);
                self.router.to_room(&self.registry, &room, &line, &[actor]);
            }
            StallOp::Close => {
                let stall = self.registry.close_stall(actor)?;
                self.router.to_actor(
                    actor,
                    format!(
                        "You pack up your stall ({} item(s) back in your pack).",
                        stall.offers.len()
                    ),
                );
                let line = format!("{} packs up their stall.", name);
                self.router.to_room(&self.registry, &room, &line, &[actor]);
            }
            StallOp::Add { item, price } => {
                let item = self
                    .registry
                    .add_stall_offer(actor, &item, price, &self.registries)?;
                self.router.to_actor(
                    actor,
                    format!(
                        "You offer {} for {} gold.",
                        self.registries.item_name(&item),
                        price
                    ),
                );
            }
            StallOp::List => {
                let stall = self
                    .registry
                    .room(&room)
                    .and_then(|r| r.stall_of(actor))
                    .ok_or_else(|| WorldError::NotEligible("You don't have a stall open.".to_string()))?;
                let text = if stall.offers.is_empty() {
                    "Your stall is empty.".to_string()
                } else {
                    stall
                        .offers
                        .iter()
                        .map(|o| format!("  {} - {} gold", self.registries.item_name(&o.item), o.price))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                self.router.to_actor(actor, text);
            }
        }
        Ok(())
    }

    fn handle_stalls(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let room_id = self.room_of(actor)?;
        let room = self
            .registry
            .room(&room_id)
            .ok_or_else(|| WorldError::NotFound(room_id.clone()))?;
        let mut lines = Vec::new();
        for stall in room.stalls() {
            lines.push(format!("{}'s stall:", stall.owner_name));
            if stall.offers.is_empty() {
                lines.push("  (nothing for sale)".to_string());
            }
            for offer in &stall.offers {
                lines.push(format!(
                    "  {} - {} gold",
                    self.registries.item_name(&offer.item),
                    offer.price
                ));
            }
        }
        if lines.is_empty() {
            lines.push("No stalls are open here.".to_string());
        }
        self.router.to_actor(actor, lines.join("\n"));
        Ok(())
    }

    fn handle_buy(&mut self, actor: ActorId, seller: &str, item: &str) -> Result<(), WorldError> {
        let purchase = self.registry.buy(actor, seller, item, &self.registries)?;
        let item_name = self.registries.item_name(&purchase.item).to_string();
        info!(
            "{} bought {} from {} for {} gold",
            self.actor_name(actor),
            purchase.item,
            self.actor_name(purchase.seller),
            purchase.price
        );
        self.router.to_actor(
            actor,
            format!(
                "You buy {} from {} for {} gold.",
                item_name,
                self.actor_name(purchase.seller),
                purchase.price
            ),
        );
        self.router.to_actor(
            purchase.seller,
            format!(
                "{} buys {} from your stall for {} gold.",
                self.actor_name(actor),
                item_name,
                purchase.price
            ),
        );
        Ok(())
    }

    fn set_sleeping(&mut self, actor: ActorId, sleeping: bool) -> Result<(), WorldError> {
        let room = self.room_of(actor)?;
        if let Some(a) = self.registry.actor_mut(actor) {
            a.status.sleeping = sleeping;
        }
        let name = self.actor_name(actor);
        let (own, others) = if sleeping {
            ("You lie down and fall asleep.", format!("{} falls asleep.", name))
        } else {
            ("You wake up.", format!("{} wakes up.", name))
        };
        self.router.to_actor(actor, own);
        self.router.to_room(&self.registry, &room, &others, &[actor]);
        Ok(())
    }

    fn handle_save(&mut self, actor: ActorId) -> Result<(), WorldError> {
        let snapshot = self
            .registry
            .snapshot_player(actor, self.clock.now())
            .ok_or_else(|| WorldError::NotEligible("Only players can save.".to_string()))?;
        self.persistence.save_player(snapshot);
        self.router.to_actor(actor, "Saved.");
        Ok(())
    }
}
