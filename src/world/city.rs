//! Canonical floor-0 city. Seeded at startup; never regenerated.

use crate::world::types::{Direction, Room, RoomFlag, CITY_FLOOR};

pub const START_ROOM_ID: &str = "city:plaza";
pub const CITY_STAIRS_ID: &str = "city:stairs";

pub const CITY_ROOM_IDS: &[&str] = &[
    "city:plaza",
    "city:market",
    "city:smithy",
    "city:stairs",
    "city:vault",
];

pub fn canonical_city() -> Vec<Room> {
    let city = |id: &str, name: &str, desc: &str| {
        Room::new(id, name, desc, CITY_FLOOR)
            .with_flag(RoomFlag::City)
            .with_flag(RoomFlag::Safe)
    };

    vec![
        city(
            "city:plaza",
            "Spire Plaza",
            "Cobblestones ring the base of the endless tower. Travellers trade rumours \
             beneath lantern posts while the spire vanishes into cloud overhead.",
        )
        .with_exit(Direction::North, "city:market")
        .with_exit(Direction::East, "city:smithy")
        .with_exit(Direction::West, "city:stairs"),
        city(
            "city:market",
            "Market Row",
            "Canvas awnings shade rows of trestle tables. Anyone may open a stall here \
             and hawk what they carried down from the tower.",
        )
        .with_exit(Direction::South, "city:plaza")
        .with_locked_exit(Direction::East, "city:vault", "brass_key")
        .with_item("brass_key"),
        city(
            "city:smithy",
            "Cinder Smithy",
            "Heat rolls off a roaring forge. Racks of half-finished blades line the walls.",
        )
        .with_exit(Direction::West, "city:plaza")
        .with_item("leather_vest"),
        city(
            "city:stairs",
            "Foot of the Spire",
            "A spiral stair climbs into darkness. Scratched into the first step: \
             'no one has seen the top'.",
        )
        .with_flag(RoomFlag::Stairwell)
        .with_exit(Direction::East, "city:plaza")
        .with_exit(Direction::Up, "f1:0"),
        city(
            "city:vault",
            "Guild Vault",
            "Iron-bound chests sit in neat rows behind the brass-locked door.",
        )
        .with_exit(Direction::West, "city:market")
        .with_item("iron_sword"),
    ]
}
