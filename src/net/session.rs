//! Transport-independent session: login handshake, then forwarding lines to
//! the world until either side hangs up.
//!
//! A transport hands over three things in [`SessionIo`]: sanitized inbound
//! lines, the outbound queue its writer drains, and a signal that fires when
//! the writer has closed the connection.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::logutil::escape_log;
use crate::metrics;
use crate::world::broadcast::{Outbound, SessionSink};
use crate::world::engine::{SessionId, WorldEvent};
use crate::world::filters::{canonical_name, NameFilter};
use crate::world::persistence::{AuthOutcome, PersistenceHandle};

pub const MIN_PASSWORD_LEN: usize = 4;

/// Shared by every connection.
pub struct SessionContext {
    pub intake: mpsc::UnboundedSender<WorldEvent>,
    pub persistence: PersistenceHandle,
    pub names: Arc<dyn NameFilter>,
    pub server_name: String,
    pub max_login_attempts: u32,
    pub login_timeout: Duration,
    pub max_line_length: usize,
}

pub struct SessionIo {
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub outbound: SessionSink,
    /// Fires once the writer has shut the connection.
    pub closed: oneshot::Receiver<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoginFailure {
    Hangup,
    TimedOut,
    TooManyAttempts,
    Unavailable,
}

impl LoginFailure {
    fn farewell(&self) -> Option<&'static str> {
        match self {
            LoginFailure::Hangup => None,
            LoginFailure::TimedOut => Some("Login timed out."),
            LoginFailure::TooManyAttempts => Some("Too many failed attempts. Goodbye."),
            LoginFailure::Unavailable => Some("The tower is not accepting logins right now."),
        }
    }
}

/// Drive one connection from greeting to disconnect.
pub async fn run_session(ctx: Arc<SessionContext>, io: SessionIo, peer: String, transport: &'static str) {
    let SessionIo {
        mut inbound,
        outbound,
        mut closed,
    } = io;
    let session = SessionId::new();
    metrics::record_connection_open(transport);
    info!("{} connection from {} (session {})", transport, peer, session);

    let name = match login(&ctx, &mut inbound, &outbound, &peer).await {
        Ok(name) => name,
        Err(failure) => {
            debug!("Session {} ended at login: {:?}", session, failure);
            if let Some(text) = failure.farewell() {
                let _ = outbound.send(Outbound::Close(text.to_string()));
            }
            metrics::record_connection_close(transport);
            return;
        }
    };

    let connected = WorldEvent::Connected {
        session,
        name: name.clone(),
        sink: outbound.clone(),
    };
    if ctx.intake.send(connected).is_err() {
        let _ = outbound.send(Outbound::Close(
            LoginFailure::Unavailable.farewell().unwrap_or_default().to_string(),
        ));
        metrics::record_connection_close(transport);
        return;
    }
    drop(outbound);

    loop {
        tokio::select! {
            line = inbound.recv() => match line {
                Some(line) if line.is_empty() => continue,
                Some(line) => {
                    if ctx.intake.send(WorldEvent::Command { session, line }).is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = &mut closed => break,
        }
    }

    info!("{} disconnected (session {})", name, session);
    let _ = ctx.intake.send(WorldEvent::Disconnected { session });
    metrics::record_connection_close(transport);
}

async fn ask(
    ctx: &SessionContext,
    inbound: &mut mpsc::UnboundedReceiver<String>,
    outbound: &SessionSink,
    prompt: &str,
) -> Result<String, LoginFailure> {
    outbound
        .send(Outbound::Line(prompt.to_string()))
        .map_err(|_| LoginFailure::Hangup)?;
    match tokio::time::timeout(ctx.login_timeout, inbound.recv()).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(LoginFailure::Hangup),
        Err(_) => Err(LoginFailure::TimedOut),
    }
}

async fn login(
    ctx: &SessionContext,
    inbound: &mut mpsc::UnboundedReceiver<String>,
    outbound: &SessionSink,
    peer: &str,
) -> Result<String, LoginFailure> {
    let _ = outbound.send(Outbound::Line(format!("Welcome to {}.", ctx.server_name)));
    let mut failures = 0u32;
    loop {
        let raw = ask(ctx, inbound, outbound, "By what name shall the tower know you?").await?;
        let (allowed, reason) = ctx.names.check(&raw);
        if !allowed {
            warn!(
                target: "security",
                "Rejected name '{}' from {}: {}",
                escape_log(&raw),
                peer,
                reason
            );
            let _ = outbound.send(Outbound::Line(reason));
            continue;
        }
        let name = canonical_name(&raw);

        let password = ask(ctx, inbound, outbound, "Password:").await?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            let _ = outbound.send(Outbound::Line(format!(
                "Passwords need at least {} characters.",
                MIN_PASSWORD_LEN
            )));
            continue;
        }

        match ctx.persistence.authenticate(&name, &password).await {
            Ok(AuthOutcome::Created) => {
                info!(target: "security", "Account created for {} from {}", name, peer);
                let _ = outbound.send(Outbound::Line(format!(
                    "A new adventurer! Remember your password, {}.",
                    name
                )));
                return Ok(name);
            }
            Ok(AuthOutcome::Verified) => {
                info!(target: "security", "{} logged in from {}", name, peer);
                return Ok(name);
            }
            Ok(AuthOutcome::Rejected) => {
                failures += 1;
                metrics::inc_login_failures();
                warn!(
                    target: "security",
                    "Failed login for {} from {} (attempt {})",
                    name,
                    peer,
                    failures
                );
                if failures >= ctx.max_login_attempts.max(1) {
                    return Err(LoginFailure::TooManyAttempts);
                }
                let _ = outbound.send(Outbound::Line("Wrong password.".to_string()));
            }
            Err(e) => {
                error!("Authentication for {} failed: {}", name, e);
                return Err(LoginFailure::Unavailable);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangups_close_silently() {
        assert!(LoginFailure::Hangup.farewell().is_none());
        assert!(LoginFailure::TooManyAttempts.farewell().is_some());
    }
}
