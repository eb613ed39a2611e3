//! Websocket transport. Each text frame may carry one or more command lines;
//! each outbound line is sent as its own text frame.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::logutil::sanitize_line;
use crate::net::session::{run_session, SessionContext, SessionIo};
use crate::world::broadcast::Outbound;

pub const TRANSPORT: &str = "websocket";

/// Split a frame into sanitized command lines.
pub fn frame_lines(text: &str, max_line_len: usize) -> Vec<String> {
    text.split('\n')
        .map(|line| sanitize_line(line, max_line_len))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Upgrade `stream` to a websocket and run a session over it.
pub async fn serve_connection<S>(stream: S, ctx: Arc<SessionContext>, peer: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Websocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let res = match message {
                Outbound::Line(text) => sink.send(Message::Text(text)).await,
                Outbound::Close(text) => {
                    let _ = sink.send(Message::Text(text)).await;
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if res.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
        let _ = closed_tx.send(());
    });

    let max = ctx.max_line_length;
    let reader_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Websocket read error: {}", e);
                    break;
                }
            };
            for line in frame_lines(&text, max) {
                if in_tx.send(line).is_err() {
                    return;
                }
            }
        }
    });

    let io = SessionIo {
        inbound: in_rx,
        outbound: out_tx,
        closed: closed_rx,
    };
    run_session(ctx, io, peer, TRANSPORT).await;
    reader_task.abort();
}

pub fn spawn_listener(listener: TcpListener, ctx: Arc<SessionContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!("Websocket transport listening on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(serve_connection(stream, Arc::clone(&ctx), addr.to_string()));
                }
                Err(e) => {
                    warn!("Websocket accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    })
}
