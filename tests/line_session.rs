mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use common::cheap_argon2;
use towermud::net::line::serve_connection;
use towermud::net::SessionContext;
use towermud::world::city::canonical_city;
use towermud::world::clock::SystemClock;
use towermud::world::content::Registries;
use towermud::world::filters::WordListFilter;
use towermud::world::generator::TowerGenerator;
use towermud::world::persistence::{start_persistence_worker, PersistenceHandle};
use towermud::world::storage::SledStore;
use towermud::world::{World, WorldDeps, WorldRegistry, WorldSettings};

struct Server {
    ctx: Arc<SessionContext>,
    persistence: PersistenceHandle,
    _dir: tempfile::TempDir,
}

fn start_server() -> Server {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SledStore::open(dir.path()).expect("store");
    let (intake, rx) = mpsc::unbounded_channel();
    let persistence = start_persistence_worker(store, cheap_argon2(), intake.clone()).expect("worker");
    let registries = Arc::new(Registries::builtin());
    let filter = Arc::new(WordListFilter::new(Vec::<String>::new()));
    let deps = WorldDeps {
        registries: Arc::clone(&registries),
        generator: Arc::new(TowerGenerator::new(registries, 5)),
        filter: filter.clone(),
        clock: Arc::new(SystemClock),
        persistence: persistence.clone(),
        intake: intake.clone(),
    };
    let world = World::new(
        WorldSettings::default(),
        WorldRegistry::with_rooms(canonical_city()),
        deps,
    );
    tokio::spawn(world.run(rx));
    let ctx = Arc::new(SessionContext {
        intake,
        persistence: persistence.clone(),
        names: filter,
        server_name: "TowerMUD".to_string(),
        max_login_attempts: 3,
        login_timeout: Duration::from_secs(5),
        max_line_length: 256,
    });
    Server {
        ctx,
        persistence,
        _dir: dir,
    }
}

struct Client {
    rd: ReadHalf<DuplexStream>,
    wr: WriteHalf<DuplexStream>,
    seen: String,
}

impl Client {
    fn connect(server: &Server) -> Self {
        let (client, remote) = tokio::io::duplex(16 * 1024);
        let (sr, sw) = tokio::io::split(remote);
        tokio::spawn(serve_connection(sr, sw, Arc::clone(&server.ctx), "test-peer".to_string()));
        let (rd, wr) = tokio::io::split(client);
        Self {
            rd,
            wr,
            seen: String::new(),
        }
    }

    async fn send(&mut self, line: &str) {
        self.wr
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .expect("write");
    }

    /// Read until `needle` shows up; everything before it is consumed.
    async fn expect(&mut self, needle: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 1024];
        loop {
            if let Some(pos) = self.seen.find(needle) {
                self.seen.drain(..pos + needle.len());
                return;
            }
            let n = tokio::time::timeout_at(deadline, self.rd.read(&mut buf))
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {:?}; saw {:?}", needle, self.seen))
                .expect("read");
            assert!(n > 0, "connection closed before {:?}; saw {:?}", needle, self.seen);
            self.seen.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    }

    async fn read_to_close(&mut self) -> String {
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), self.rd.read_to_end(&mut rest))
            .await
            .expect("server did not close")
            .expect("read");
        let mut all = std::mem::take(&mut self.seen);
        all.push_str(&String::from_utf8_lossy(&rest));
        all
    }
}

#[tokio::test]
async fn login_play_and_quit_over_a_line_connection() {
    let server = start_server();
    let mut client = Client::connect(&server);

    client.expect("By what name shall the tower know you?").await;
    client.send("ada").await;
    client.expect("Password:").await;
    client.send("pw12").await;
    client.expect("A new adventurer! Remember your password, Ada.").await;
    client.expect("Spire Plaza").await;

    client.send("say hello\u{7}").await;
    client.expect("You say, \"hello\"").await;

    client.send("quit").await;
    let tail = client.read_to_close().await;
    assert!(tail.contains("Farewell"));

    let mut saved = None;
    for _ in 0..50 {
        server.persistence.flush().await.expect("flush");
        saved = server.persistence.load_actor("ada").await.expect("load");
        if saved.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let saved = saved.expect("saved after quit");
    assert_eq!(saved.name, "Ada");
    assert_eq!(saved.room, "city:plaza");
}

#[tokio::test]
async fn bad_names_are_reprompted() {
    let server = start_server();
    let mut client = Client::connect(&server);
    client.expect("know you?").await;
    client.send("x1").await;
    client.expect("Names need at least 3 letters.").await;
    client.expect("know you?").await;
    client.send("admin").await;
    client.expect("That name is reserved.").await;
    client.expect("know you?").await;
}

#[tokio::test]
async fn three_wrong_passwords_disconnect() {
    let server = start_server();
    server
        .persistence
        .authenticate("Bob", "right-one")
        .await
        .expect("account created");

    let mut client = Client::connect(&server);
    for _ in 0..3 {
        client.expect("know you?").await;
        client.send("bob").await;
        client.expect("Password:").await;
        client.send("wrong-one").await;
    }
    let tail = client.read_to_close().await;
    assert!(tail.contains("Too many failed attempts. Goodbye."));
}

#[tokio::test]
async fn telnet_negotiation_does_not_reach_the_parser() {
    let server = start_server();
    let mut client = Client::connect(&server);
    client.expect("know you?").await;
    client
        .wr
        .write_all(&[255, 251, 24, b'c', b'i', b'd', b'\r', b'\n'])
        .await
        .expect("write");
    client.expect("Password:").await;
    client.send("secret").await;
    client.expect("Remember your password, Cid.").await;
}
