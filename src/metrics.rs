//! Process-wide counters. Logged on every autosave and printed by `status`.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

static COMMANDS_APPLIED: AtomicU64 = AtomicU64::new(0);
static COMMANDS_REJECTED: AtomicU64 = AtomicU64::new(0);
static COMBAT_TICKS: AtomicU64 = AtomicU64::new(0);
static KILLS: AtomicU64 = AtomicU64::new(0);
static RESPAWNS: AtomicU64 = AtomicU64::new(0);
static AUTOSAVES: AtomicU64 = AtomicU64::new(0);
static SAVES_OK: AtomicU64 = AtomicU64::new(0);
static SAVES_FAILED: AtomicU64 = AtomicU64::new(0);
static SAVE_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static SAVE_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);
static CHAT_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
static EVENT_PANICS: AtomicU64 = AtomicU64::new(0);
static LOGIN_FAILURES: AtomicU64 = AtomicU64::new(0);
static SESSIONS_ACTIVE: AtomicU64 = AtomicU64::new(0);

static TRANSPORT_COUNTERS: OnceLock<Mutex<HashMap<String, ConnectionCounter>>> = OnceLock::new();

pub fn inc_commands_applied() {
    COMMANDS_APPLIED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_commands_rejected() {
    COMMANDS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_combat_ticks() {
    COMBAT_TICKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_kills() {
    KILLS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_respawns() {
    RESPAWNS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_autosaves() {
    AUTOSAVES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves_ok() {
    SAVES_OK.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_saves_failed() {
    SAVES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn observe_save_latency(started: Instant) {
    let ms = started.elapsed().as_millis() as u64;
    SAVE_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    SAVE_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_suppressed() {
    CHAT_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_event_panics() {
    EVENT_PANICS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_login_failures() {
    LOGIN_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_active() {
    SESSIONS_ACTIVE.fetch_add(1, Ordering::Relaxed);
}
pub fn dec_sessions_active() {
    let _ = SESSIONS_ACTIVE.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(1))
    });
}

/// Connection counts for one transport ("line", "websocket").
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCounter {
    pub opened: u64,
    pub closed: u64,
    pub currently_open: u64,
    pub concurrent_peak: u64,
}

fn transport_lock() -> MutexGuard<'static, HashMap<String, ConnectionCounter>> {
    TRANSPORT_COUNTERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn record_connection_open(transport: &str) -> ConnectionCounter {
    let mut guard = transport_lock();
    let counter = guard.entry(transport.to_string()).or_default();
    counter.opened = counter.opened.saturating_add(1);
    counter.currently_open = counter.currently_open.saturating_add(1);
    if counter.currently_open > counter.concurrent_peak {
        counter.concurrent_peak = counter.currently_open;
    }
    *counter
}

pub fn record_connection_close(transport: &str) -> ConnectionCounter {
    let mut guard = transport_lock();
    let counter = guard.entry(transport.to_string()).or_default();
    counter.closed = counter.closed.saturating_add(1);
    counter.currently_open = counter.currently_open.saturating_sub(1);
    *counter
}

pub fn connection_counters_snapshot() -> HashMap<String, ConnectionCounter> {
    transport_lock().clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub combat_ticks: u64,
    pub kills: u64,
    pub respawns: u64,
    pub autosaves: u64,
    pub saves_ok: u64,
    pub saves_failed: u64,
    pub save_latency_avg_ms: Option<u64>,
    pub chat_suppressed: u64,
    pub event_panics: u64,
    pub login_failures: u64,
    pub sessions_active: u64,
}

pub fn snapshot() -> Snapshot {
    let sum = SAVE_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = SAVE_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        commands_applied: COMMANDS_APPLIED.load(Ordering::Relaxed),
        commands_rejected: COMMANDS_REJECTED.load(Ordering::Relaxed),
        combat_ticks: COMBAT_TICKS.load(Ordering::Relaxed),
        kills: KILLS.load(Ordering::Relaxed),
        respawns: RESPAWNS.load(Ordering::Relaxed),
        autosaves: AUTOSAVES.load(Ordering::Relaxed),
        saves_ok: SAVES_OK.load(Ordering::Relaxed),
        saves_failed: SAVES_FAILED.load(Ordering::Relaxed),
        save_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
        chat_suppressed: CHAT_SUPPRESSED.load(Ordering::Relaxed),
        event_panics: EVENT_PANICS.load(Ordering::Relaxed),
        login_failures: LOGIN_FAILURES.load(Ordering::Relaxed),
        sessions_active: SESSIONS_ACTIVE.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_open_close_tracks_peak() {
        // unique key so parallel tests don't interfere
        let key = "test-transport";
        let first = record_connection_open(key);
        assert_eq!(first.currently_open, 1);
        let second = record_connection_open(key);
        assert_eq!(second.concurrent_peak, 2);

        let closed = record_connection_close(key);
        assert_eq!(closed.closed, 1);
        assert_eq!(closed.currently_open, 1);
        assert_eq!(closed.concurrent_peak, 2);

        let snap = connection_counters_snapshot();
        assert_eq!(snap.get(key).map(|c| c.opened), Some(2));
    }

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_kills();
        inc_commands_rejected();
        let after = snapshot();
        assert!(after.kills > before.kills);
        assert!(after.commands_rejected > before.commands_rejected);
    }

    #[test]
    fn sessions_active_never_underflows() {
        dec_sessions_active();
        dec_sessions_active();
        let _ = snapshot().sessions_active;
    }
}
