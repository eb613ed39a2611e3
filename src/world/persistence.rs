//! Persistence worker and coordinator.
//!
//! All store access runs on one dedicated thread fed by a FIFO queue. A save
//! queued on disconnect is therefore always applied before the load issued by
//! the same player's next login. Snapshots are built by the world task from
//! committed state and handed over by value, so the worker never sees a
//! half-applied mutation.
//!
//! A failed player save is reported back to the world task as
//! [`WorldEvent::PersistenceFailed`] and retried on the next autosave.

use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use tokio::sync::{mpsc, oneshot};

use crate::config::Argon2Config;
use crate::metrics;
use crate::world::engine::{SessionId, WorldEvent};
use crate::world::errors::WorldError;
use crate::world::storage::PersistenceStore;
use crate::world::types::{PlayerSnapshot, TowerState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No account existed; one was created with this password.
    Created,
    Verified,
    Rejected,
}

#[derive(Debug)]
pub enum PersistRequest {
    SaveActor(PlayerSnapshot),
    SaveWorld(TowerState),
    LoadActor {
        name: String,
        reply: oneshot::Sender<Result<Option<PlayerSnapshot>, WorldError>>,
    },
    LoadWorld {
        reply: oneshot::Sender<Result<Option<TowerState>, WorldError>>,
    },
    /// Load for a login; the result comes back as [`WorldEvent::PlayerLoaded`].
    LoadForSession { session: SessionId, name: String },
    Authenticate {
        name: String,
        password: String,
        reply: oneshot::Sender<Result<AuthOutcome, WorldError>>,
    },
    /// Answered once every earlier request has been applied.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistRequest>,
}

fn worker_gone() -> WorldError {
    WorldError::Internal("persistence worker stopped".to_string())
}

impl PersistenceHandle {
    pub fn save_actor(&self, snapshot: PlayerSnapshot) -> Result<(), WorldError> {
        self.tx
            .send(PersistRequest::SaveActor(snapshot))
            .map_err(|_| worker_gone())
    }

    pub fn save_world(&self, state: TowerState) -> Result<(), WorldError> {
        self.tx
            .send(PersistRequest::SaveWorld(state))
            .map_err(|_| worker_gone())
    }

    pub async fn load_actor(&self, name: &str) -> Result<Option<PlayerSnapshot>, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PersistRequest::LoadActor {
                name: name.to_string(),
                reply,
            })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    pub fn load_for_session(&self, session: SessionId, name: &str) -> Result<(), WorldError> {
        self.tx
            .send(PersistRequest::LoadForSession {
                session,
                name: name.to_string(),
            })
            .map_err(|_| worker_gone())
    }

    pub async fn load_world(&self) -> Result<Option<TowerState>, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PersistRequest::LoadWorld { reply })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    pub async fn authenticate(&self, name: &str, password: &str) -> Result<AuthOutcome, WorldError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PersistRequest::Authenticate {
                name: name.to_string(),
                password: password.to_string(),
                reply,
            })
            .map_err(|_| worker_gone())?;
        rx.await.map_err(|_| worker_gone())?
    }

    /// Queue a flush barrier; `done` fires after all earlier requests.
    pub fn flush_into(&self, done: oneshot::Sender<()>) -> Result<(), WorldError> {
        self.tx
            .send(PersistRequest::Flush(done))
            .map_err(|_| worker_gone())
    }

    pub async fn flush(&self) -> Result<(), WorldError> {
        let (done, rx) = oneshot::channel();
        self.flush_into(done)?;
        rx.await.map_err(|_| worker_gone())
    }
}

/// Build the hasher from optional config overrides.
pub fn build_argon2(cfg: Option<&Argon2Config>) -> Argon2<'static> {
    let Some(a) = cfg else {
        return Argon2::default();
    };
    let defaults = Params::DEFAULT;
    let mem = a.memory_kib.unwrap_or(defaults.m_cost());
    let time = a.time_cost.unwrap_or(defaults.t_cost());
    let para = a.parallelism.unwrap_or(defaults.p_cost());
    match Params::new(mem, time, para, None) {
        Ok(params) => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        Err(e) => {
            warn!("Invalid argon2 parameters ({}); using defaults", e);
            Argon2::default()
        }
    }
}

fn authenticate<S: PersistenceStore>(
    store: &S,
    argon2: &Argon2<'static>,
    name: &str,
    password: &str,
) -> Result<AuthOutcome, WorldError> {
    match store.account_hash(name)? {
        Some(stored) => {
            let parsed = PasswordHash::new(&stored)
                .map_err(|e| WorldError::Internal(format!("corrupt password hash for {}: {}", name, e)))?;
            if argon2.verify_password(password.as_bytes(), &parsed).is_ok() {
                Ok(AuthOutcome::Verified)
            } else {
                Ok(AuthOutcome::Rejected)
            }
        }
        None => {
            let salt = SaltString::generate(&mut rand::thread_rng());
            let hash = argon2
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| WorldError::Internal(format!("password hash failure: {}", e)))?;
            store.put_account_hash(name, &hash.to_string())?;
            info!("Created account {}", name);
            Ok(AuthOutcome::Created)
        }
    }
}

/// Spawn the worker thread. `events` receives failed saves and login loads.
pub fn start_persistence_worker<S: PersistenceStore>(
    store: S,
    argon2: Argon2<'static>,
    events: mpsc::UnboundedSender<WorldEvent>,
) -> Result<PersistenceHandle, WorldError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistRequest>();
    thread::Builder::new()
        .name("towermud-persist".to_string())
        .spawn(move || {
            while let Some(request) = rx.blocking_recv() {
                match request {
                    PersistRequest::SaveActor(snapshot) => {
                        let started = Instant::now();
                        match store.save_actor(&snapshot) {
                            Ok(()) => {
                                metrics::inc_saves_ok();
                                metrics::observe_save_latency(started);
                                debug!("Saved {}", snapshot.name);
                            }
                            Err(e) => {
                                metrics::inc_saves_failed();
                                error!("Failed to save {}: {}", snapshot.name, e);
                                let _ = events.send(WorldEvent::PersistenceFailed { snapshot });
                            }
                        }
                    }
                    PersistRequest::SaveWorld(state) => {
                        if let Err(e) = store.save_world(&state) {
                            metrics::inc_saves_failed();
                            error!("Failed to save tower state: {}", e);
                        }
                    }
                    PersistRequest::LoadActor { name, reply } => {
                        let result = match store.load_actor(&name) {
                            Ok(snapshot) => Ok(Some(snapshot)),
                            Err(WorldError::NotFound(_)) => Ok(None),
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    PersistRequest::LoadForSession { session, name } => {
                        let result = match store.load_actor(&name) {
                            Ok(snapshot) => Ok(Some(snapshot)),
                            Err(WorldError::NotFound(_)) => Ok(None),
                            Err(e) => {
                                error!("Failed to load {}: {}", name, e);
                                Err(e.to_string())
                            }
                        };
                        let _ = events.send(WorldEvent::PlayerLoaded {
                            session,
                            name,
                            result,
                        });
                    }
                    PersistRequest::LoadWorld { reply } => {
                        let _ = reply.send(store.load_world());
                    }
                    PersistRequest::Authenticate {
                        name,
                        password,
                        reply,
                    } => {
                        let _ = reply.send(authenticate(&store, &argon2, &name, &password));
                    }
                    PersistRequest::Flush(done) => {
                        if let Err(e) = store.flush() {
                            error!("Store flush failed: {}", e);
                        }
                        let _ = done.send(());
                    }
                }
            }
            debug!("Persistence worker exiting");
        })?;
    Ok(PersistenceHandle { tx })
}

/// World-task side of persistence: queues saves and remembers the ones that
/// failed so the next autosave can retry them.
#[derive(Debug)]
pub struct PersistenceCoordinator {
    handle: PersistenceHandle,
    retry: BTreeMap<String, PlayerSnapshot>,
    /// `saved_at` of the newest snapshot queued per player.
    queued: BTreeMap<String, DateTime<Utc>>,
}

impl PersistenceCoordinator {
    pub fn new(handle: PersistenceHandle) -> Self {
        Self {
            handle,
            retry: BTreeMap::new(),
            queued: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> &PersistenceHandle {
        &self.handle
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    pub fn save_player(&mut self, snapshot: PlayerSnapshot) {
        let key = snapshot.name.to_ascii_lowercase();
        let newest = self.queued.entry(key).or_insert(snapshot.saved_at);
        if snapshot.saved_at > *newest {
            *newest = snapshot.saved_at;
        }
        if let Err(e) = self.handle.save_actor(snapshot.clone()) {
            warn!("Could not queue save for {}: {}", snapshot.name, e);
            self.record_failure(snapshot);
        }
    }

    /// Keep the newest failed snapshot per player. A failure already
    /// superseded by a newer queued save is dropped.
    pub fn record_failure(&mut self, snapshot: PlayerSnapshot) {
        let key = snapshot.name.to_ascii_lowercase();
        if matches!(self.queued.get(&key), Some(newest) if *newest > snapshot.saved_at) {
            debug!("Ignoring stale save failure for {}", snapshot.name);
            return;
        }
        match self.retry.get(&key) {
            Some(existing) if existing.saved_at > snapshot.saved_at => {}
            _ => {
                self.retry.insert(key, snapshot);
            }
        }
    }

    /// A failed snapshot newer than anything the store holds, if any.
    pub fn take_retry(&mut self, name: &str) -> Option<PlayerSnapshot> {
        self.retry.remove(&name.to_ascii_lowercase())
    }

    /// Save every online player plus any earlier failures, then the tower.
    pub fn autosave(&mut self, online: Vec<PlayerSnapshot>, tower: TowerState) -> usize {
        for snapshot in &online {
            self.retry.remove(&snapshot.name.to_ascii_lowercase());
        }
        let retries: Vec<PlayerSnapshot> = std::mem::take(&mut self.retry).into_values().collect();
        if !retries.is_empty() {
            info!("Retrying {} failed player save(s)", retries.len());
        }
        let mut queued = 0;
        for snapshot in online.into_iter().chain(retries) {
            self.save_player(snapshot);
            queued += 1;
        }
        if let Err(e) = self.handle.save_world(tower) {
            warn!("Could not queue tower save: {}", e);
        }
        queued
    }

    pub fn flush_into(&self, done: oneshot::Sender<()>) {
        if let Err(e) = self.handle.flush_into(done) {
            error!("Could not queue flush barrier: {}", e);
        }
    }
}
