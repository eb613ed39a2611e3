use towermud::config::Config;
use towermud::server::TowerServer;
use towermud::world::combat::TieBreak;

#[tokio::test]
async fn settings_follow_the_config_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    let data_dir = tmp.path().join("data");
    let text = format!(
        r#"
[server]
name = "The Spire"
motd = "Mind the gap."

[world]
data_dir = "{}"
tower_seed = 4242
rng_seed = 9

[combat]
hit_threshold = 4
tie_break = "lowest_id"

[respawn]
default_median_secs = 90
jitter = 0.25

[chat]
max_messages = 3
"#,
        data_dir.display()
    );
    std::fs::write(&path, text).unwrap();

    let config = Config::load(path.to_str().unwrap()).await.unwrap();
    let server = TowerServer::new(config).await.unwrap();
    let settings = server.settings();
    assert_eq!(settings.server_name, "The Spire");
    assert_eq!(settings.motd, "Mind the gap.");
    assert_eq!(settings.tower_seed, 4242);
    assert_eq!(settings.rng_seed, Some(9));
    assert_eq!(settings.combat.hit_threshold, 4);
    assert_eq!(settings.combat.tie_break, TieBreak::LowestId);
    assert_eq!(settings.default_respawn.as_secs(), 90);
    assert_eq!(settings.respawn_jitter, 0.25);
    assert_eq!(settings.chat.max_messages, 3);
}

#[tokio::test]
async fn seed_directory_extends_builtin_content() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.world.data_dir = tmp.path().to_str().unwrap().to_string();
    let seeds = config.seeds_dir();
    std::fs::create_dir_all(&seeds).unwrap();
    std::fs::write(
        seeds.join("items.json"),
        r#"[{"id": "glass_bead", "name": "glass bead", "kind": {"type": "trinket"}, "value": 2}]"#,
    )
    .unwrap();

    let server = TowerServer::new(config).await.unwrap();
    // status opens the (empty) store and reports without error
    server.show_status().await.unwrap();
}

#[tokio::test]
async fn broken_config_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[respawn]\njitter = 3.0\n").unwrap();
    assert!(Config::load(path.to_str().unwrap()).await.is_err());
}
