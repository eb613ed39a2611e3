//! # Session Layer
//!
//! Two transports feed the same session logic:
//!
//! - [`line`] - newline-delimited text over TCP (telnet-style clients)
//! - [`websocket`] - text frames via `tokio-tungstenite`
//!
//! [`session`] owns the login handshake and turns each accepted line into a
//! `WorldEvent::Command`. Sessions never touch world state directly.

pub mod line;
pub mod session;
pub mod websocket;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use session::{SessionContext, SessionIo};

/// Bind both transports and start accepting. An empty websocket address
/// leaves that transport off.
pub async fn listen(ctx: Arc<SessionContext>, line_bind: &str, websocket_bind: &str) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    let listener = TcpListener::bind(line_bind)
        .await
        .with_context(|| format!("bind line transport on {}", line_bind))?;
    handles.push(line::spawn_listener(listener, Arc::clone(&ctx)));

    if !websocket_bind.trim().is_empty() {
        let listener = TcpListener::bind(websocket_bind)
            .await
            .with_context(|| format!("bind websocket transport on {}", websocket_bind))?;
        handles.push(websocket::spawn_listener(listener, ctx));
    }
    Ok(handles)
}
