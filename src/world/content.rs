//! Read-only content registries: spells, mob templates and items.
//!
//! Built-in definitions ship with the binary; admins can extend or override
//! them with JSON files in `<data_dir>/seeds/` (`spells.json`, `mobs.json`,
//! `items.json`) without recompiling. Nothing in the core ever mutates a
//! definition after startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::world::errors::WorldError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpellEffect {
    Damage { min: u32, max: u32 },
    Heal { amount: i32 },
    Stun { secs: u64, damage: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpellDef {
    pub id: String,
    pub name: String,
    pub mana_cost: i32,
    pub cooldown_secs: u64,
    pub effect: SpellEffect,
}

impl SpellDef {
    pub fn needs_target(&self) -> bool {
        !matches!(self.effect, SpellEffect::Heal { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MobTemplate {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub max_health: i32,
    #[serde(default)]
    pub attack_bonus: i32,
    #[serde(default)]
    pub defense: i32,
    pub damage_min: u32,
    pub damage_max: u32,
    #[serde(default)]
    pub mitigation: u32,
    pub xp_reward: u64,
    /// Median respawn delay in seconds.
    pub respawn_secs: u64,
    #[serde(default)]
    pub loot: Vec<String>,
    /// Lowest floor this mob appears on when floors are generated.
    #[serde(default = "default_min_floor")]
    pub min_floor: u32,
}

fn default_min_floor() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemKind {
    Weapon {
        damage_min: u32,
        damage_max: u32,
        #[serde(default)]
        attack_bonus: i32,
    },
    Armor {
        mitigation: u32,
    },
    Key,
    Trinket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub value: u32,
}

/// Keyed lookup tables. Shared behind an `Arc` by the world and generator.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    spells: BTreeMap<String, SpellDef>,
    mobs: BTreeMap<String, MobTemplate>,
    items: BTreeMap<String, ItemDef>,
}

impl Registries {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Definitions compiled into the binary.
    pub fn builtin() -> Self {
        let mut reg = Self::default();
        reg.insert_spell(SpellDef {
            id: "spark".to_string(),
            name: "Spark".to_string(),
            mana_cost: 4,
            cooldown_secs: 4,
            effect: SpellEffect::Damage { min: 3, max: 6 },
        });
        reg.insert_spell(SpellDef {
            id: "mend".to_string(),
            name: "Mend".to_string(),
            mana_cost: 6,
            cooldown_secs: 10,
            effect: SpellEffect::Heal { amount: 12 },
        });
        reg.insert_spell(SpellDef {
            id: "daze".to_string(),
            name: "Daze".to_string(),
            mana_cost: 8,
            cooldown_secs: 20,
            effect: SpellEffect::Stun { secs: 4, damage: 1 },
        });

        for (id, name, level, hp, atk, def, dmg, xp, respawn, loot, min_floor) in [
            ("giant_rat", "giant rat", 1, 10, 0, 8, (1, 3), 20, 30, vec!["rat_tail"], 1),
            ("cave_bat", "cave bat", 1, 8, 1, 10, (1, 2), 15, 25, vec![], 1),
            ("kobold", "kobold scout", 2, 18, 2, 11, (2, 4), 40, 45, vec!["copper_dagger"], 2),
            ("stone_imp", "stone imp", 4, 30, 3, 13, (3, 6), 90, 60, vec!["imp_horn"], 4),
            ("tower_warden", "tower warden", 8, 70, 6, 15, (5, 10), 300, 180, vec!["warden_plate"], 8),
        ] {
            reg.insert_mob(MobTemplate {
                id: id.to_string(),
                name: name.to_string(),
                level,
                max_health: hp,
                attack_bonus: atk,
                defense: def,
                damage_min: dmg.0,
                damage_max: dmg.1,
                mitigation: level / 2,
                xp_reward: xp,
                respawn_secs: respawn,
                loot: loot.into_iter().map(str::to_string).collect(),
                min_floor,
            });
        }

        for item in [
            ItemDef {
                id: "copper_dagger".to_string(),
                name: "copper dagger".to_string(),
                kind: ItemKind::Weapon {
                    damage_min: 2,
                    damage_max: 4,
                    attack_bonus: 1,
                },
                value: 12,
            },
            ItemDef {
                id: "iron_sword".to_string(),
                name: "iron sword".to_string(),
                kind: ItemKind::Weapon {
                    damage_min: 3,
                    damage_max: 7,
                    attack_bonus: 2,
                },
                value: 40,
            },
            ItemDef {
                id: "leather_vest".to_string(),
                name: "leather vest".to_string(),
                kind: ItemKind::Armor { mitigation: 1 },
                value: 15,
            },
            ItemDef {
                id: "warden_plate".to_string(),
                name: "warden plate".to_string(),
                kind: ItemKind::Armor { mitigation: 4 },
                value: 250,
            },
            ItemDef {
                id: "brass_key".to_string(),
                name: "brass key".to_string(),
                kind: ItemKind::Key,
                value: 1,
            },
            ItemDef {
                id: "rat_tail".to_string(),
                name: "rat tail".to_string(),
                kind: ItemKind::Trinket,
                value: 1,
            },
            ItemDef {
                id: "imp_horn".to_string(),
                name: "imp horn".to_string(),
                kind: ItemKind::Trinket,
                value: 18,
            },
        ] {
            reg.insert_item(item);
        }
        reg
    }

    /// Built-ins plus whatever seed files exist under `dir`.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, WorldError> {
        let dir = dir.as_ref();
        let mut reg = Self::builtin();
        let spells: Vec<SpellDef> = load_seed_file(&dir.join("spells.json"))?;
        let mobs: Vec<MobTemplate> = load_seed_file(&dir.join("mobs.json"))?;
        let items: Vec<ItemDef> = load_seed_file(&dir.join("items.json"))?;
        info!(
            "Loaded seeds from {}: {} spells, {} mobs, {} items",
            dir.display(),
            spells.len(),
            mobs.len(),
            items.len()
        );
        spells.into_iter().for_each(|s| reg.insert_spell(s));
        mobs.into_iter().for_each(|m| reg.insert_mob(m));
        items.into_iter().for_each(|i| reg.insert_item(i));
        Ok(reg)
    }

    pub fn insert_spell(&mut self, spell: SpellDef) {
        self.spells.insert(spell.id.clone(), spell);
    }

    pub fn insert_mob(&mut self, mob: MobTemplate) {
        self.mobs.insert(mob.id.clone(), mob);
    }

    pub fn insert_item(&mut self, item: ItemDef) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn spell_count(&self) -> usize {
        self.spells.len()
    }

    pub fn mob_count(&self) -> usize {
        self.mobs.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn spell(&self, id: &str) -> Option<&SpellDef> {
        self.spells.get(id)
    }

    /// Match by id or by display name, case-insensitively.
    pub fn find_spell(&self, query: &str) -> Option<&SpellDef> {
        let q = query.trim().to_ascii_lowercase();
        self.spells
            .get(&q)
            .or_else(|| self.spells.values().find(|s| s.name.to_ascii_lowercase() == q))
    }

    pub fn mob_template(&self, id: &str) -> Option<&MobTemplate> {
        self.mobs.get(id)
    }

    /// Templates eligible for a given floor, in id order.
    pub fn mobs_for_floor(&self, floor: u32) -> Vec<&MobTemplate> {
        self.mobs.values().filter(|m| m.min_floor <= floor).collect()
    }

    pub fn item(&self, id: &str) -> Option<&ItemDef> {
        self.items.get(id)
    }

    /// Display name for an item id; unknown ids render as themselves.
    pub fn item_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.items.get(id).map(|i| i.name.as_str()).unwrap_or(id)
    }

    /// Pick the first id in `candidates` whose id or name matches `query`.
    pub fn match_item<'a>(&self, candidates: &'a [String], query: &str) -> Option<&'a String> {
        let q = query.trim().to_ascii_lowercase();
        if q.is_empty() {
            return None;
        }
        candidates.iter().find(|id| {
            let name = self.item_name(id).to_ascii_lowercase();
            id.as_str() == q || name == q || name.split_whitespace().any(|w| w.starts_with(&q))
        })
    }
}

fn load_seed_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, WorldError> {
    if !path.exists() {
        debug!("No seed file at {}", path.display());
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        WorldError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to parse {}: {}", path.display(), e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_tables_are_populated() {
        let reg = Registries::builtin();
        assert!(reg.spell("spark").is_some());
        assert_eq!(reg.find_spell("Mend").map(|s| s.id.as_str()), Some("mend"));
        assert!(reg.mob_template("giant_rat").is_some());
        assert_eq!(reg.item_name("brass_key"), "brass key");
        assert_eq!(reg.item_name("mystery"), "mystery");
        assert!(reg.mobs_for_floor(1).iter().all(|m| m.min_floor <= 1));
    }

    #[test]
    fn seed_files_override_builtins() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("mobs.json"),
            r#"[{"id":"giant_rat","name":"huge rat","level":1,"max_health":12,
                 "damage_min":1,"damage_max":1,"xp_reward":5,"respawn_secs":5}]"#,
        )
        .unwrap();
        let reg = Registries::load_dir(dir.path()).expect("load");
        let rat = reg.mob_template("giant_rat").unwrap();
        assert_eq!(rat.name, "huge rat");
        assert_eq!(rat.min_floor, 1);
        assert!(reg.spell("spark").is_some());
    }

    #[test]
    fn malformed_seed_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("items.json"), "{ not json").unwrap();
        assert!(Registries::load_dir(dir.path()).is_err());
    }

    #[test]
    fn match_item_uses_names() {
        let reg = Registries::builtin();
        let inv = vec!["rat_tail".to_string(), "iron_sword".to_string()];
        assert_eq!(reg.match_item(&inv, "sword"), Some(&inv[1]));
        assert_eq!(reg.match_item(&inv, "rat_tail"), Some(&inv[0]));
        assert_eq!(reg.match_item(&inv, "axe"), None);
    }
}
