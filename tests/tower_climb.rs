mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use common::{CollapsingGenerator, Harness, HarnessOptions};
use towermud::world::city::CITY_STAIRS_ID;
use towermud::world::generator::{FloorGenerator, TowerGenerator};
use towermud::world::types::{TowerState, TOWER_STATE_VERSION};
use towermud::world::WorldSettings;

fn at_stairs() -> HarnessOptions {
    HarnessOptions {
        settings: WorldSettings {
            start_room: CITY_STAIRS_ID.to_string(),
            ..common::test_settings()
        },
        ..HarnessOptions::default()
    }
}

#[tokio::test]
async fn climbing_waits_for_generation_then_arrives() {
    let mut h = Harness::with(at_stairs());
    let mut ada = h.login("Ada").await;
    let mut bob = h.login("Bob").await;
    ada.drain();
    bob.drain();

    h.send(&ada, "up");
    h.send(&bob, "up");
    assert!(ada.saw("swirling fog"));
    assert!(bob.saw("swirling fog"));
    assert_eq!(h.room_of(ada.actor), CITY_STAIRS_ID);
    assert_eq!(h.world.registry().highest_floor(), 0);

    assert_eq!(h.pump_one().await, "floor-generated");
    assert_eq!(h.world.registry().highest_floor(), 1);
    assert_eq!(h.room_of(ada.actor), "f1:0");
    assert_eq!(h.room_of(bob.actor), "f1:0");
    h.world.registry().check_integrity().expect("integrity");

    // only one generation was requested for two climbers
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(h.rx.try_recv().is_err());
}

#[tokio::test]
async fn failed_generation_leaves_climber_in_place() {
    let mut opts = at_stairs();
    opts.generator = Some(Arc::new(CollapsingGenerator));
    let mut h = Harness::with(opts);
    let mut ada = h.login("Ada").await;
    ada.drain();

    h.send(&ada, "up");
    assert_eq!(h.pump_one().await, "floor-generated");
    assert_eq!(h.room_of(ada.actor), CITY_STAIRS_ID);
    assert!(ada.saw("shrouded in mist"));
    assert_eq!(h.world.registry().highest_floor(), 0);

    // the next attempt asks again rather than waiting forever
    h.send(&ada, "up");
    assert_eq!(h.pump_one().await, "floor-generated");
    assert_eq!(h.room_of(ada.actor), CITY_STAIRS_ID);
}

#[tokio::test]
async fn restore_rebuilds_saved_floors_and_ground_items() {
    let opts = HarnessOptions::default();
    let registries = Arc::clone(&opts.registries);
    let mut h = Harness::with(opts);
    let mut ground = BTreeMap::new();
    ground.insert("f2:0".to_string(), vec!["imp_horn".to_string()]);
    let saved = TowerState {
        seed: 99,
        highest_floor: 2,
        ground_items: ground,
        saved_at: Utc::now(),
        schema_version: TOWER_STATE_VERSION,
    };

    let highest = h.world.restore(Some(saved), 1).expect("restore");
    assert_eq!(highest, 2);
    assert_eq!(h.world.settings().tower_seed, 99);
    let room = h.world.registry().room("f2:0").expect("floor 2 entry");
    assert_eq!(room.items, vec!["imp_horn".to_string()]);

    // floors come back exactly as the seed generates them
    let again = TowerGenerator::new(registries, 10)
        .with_spawn_chance(0.0)
        .generate(99, 1)
        .expect("generate");
    for expected in &again.rooms {
        let restored = h.world.registry().room(&expected.id).expect("room restored");
        assert_eq!(restored.name, expected.name);
        assert_eq!(restored.exits, expected.exits);
    }

    let state = h.world.tower_state();
    assert_eq!(state.seed, 99);
    assert_eq!(state.highest_floor, 2);
}

#[tokio::test]
async fn climber_who_walks_away_is_not_carried_up() {
    let mut h = Harness::with(at_stairs());
    let mut ada = h.login("Ada").await;
    h.send(&ada, "up");
    assert!(ada.saw("swirling fog"));
    h.send(&ada, "east");
    assert_eq!(h.room_of(ada.actor), "city:plaza");
    ada.drain();

    assert_eq!(h.pump_one().await, "floor-generated");
    assert_eq!(h.world.registry().highest_floor(), 1);
    assert_eq!(h.room_of(ada.actor), "city:plaza");
    assert!(ada.drain().is_empty());
    h.world.registry().check_integrity().expect("integrity");
}
