//! Plain line transport for telnet-style clients.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::logutil::sanitize_line;
use crate::net::session::{run_session, SessionContext, SessionIo};
use crate::world::broadcast::Outbound;

pub const TRANSPORT: &str = "line";

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;

/// Reads `\n`-terminated lines. Lines longer than `max_line_len` bytes are
/// cut at the limit and the rest of that line is discarded.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line_len: usize,
    /// Prefix of an overlong line, kept until its newline arrives.
    overflow: Option<Vec<u8>>,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(1024),
            max_line_len: 8 * 1024,
            overflow: None,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read one line with telnet commands and control characters removed.
    ///
    /// `Ok(None)` on EOF. A partial last line without a newline is returned
    /// before EOF is reported.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(i) = self.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=i).collect();
                let bytes = match self.overflow.take() {
                    Some(prefix) => prefix,
                    None => raw,
                };
                return Ok(Some(self.decode(&bytes)));
            }

            if self.buf.len() > self.max_line_len {
                if self.overflow.is_none() {
                    self.overflow = Some(self.buf[..self.max_line_len].to_vec());
                }
                self.buf.clear();
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if let Some(prefix) = self.overflow.take() {
                    return Ok(Some(self.decode(&prefix)));
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buf);
                return Ok(Some(self.decode(&rest)));
            }
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(&strip_telnet(bytes)).into_owned();
        sanitize_line(&text, self.max_line_len)
    }
}

/// Remove telnet IAC command sequences, including subnegotiations.
pub fn strip_telnet(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != IAC {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes.get(i + 1).copied() {
            Some(IAC) => {
                out.push(IAC);
                i += 2;
            }
            Some(SB) => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == IAC && bytes.get(i + 1) == Some(&SE)) {
                    i += 1;
                }
                i += 2;
            }
            // WILL / WONT / DO / DONT carry one option byte
            Some(251..=254) => i += 3,
            Some(_) => i += 2,
            None => i += 1,
        }
    }
    out
}

async fn write_outbound<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed: oneshot::Sender<()>,
) {
    while let Some(message) = rx.recv().await {
        let (text, last) = match message {
            Outbound::Line(text) => (text, false),
            Outbound::Close(text) => (text, true),
        };
        let wire = format!("{}\r\n", text.replace('\n', "\r\n"));
        if writer.write_all(wire.as_bytes()).await.is_err() {
            break;
        }
        if last {
            break;
        }
    }
    let _ = writer.shutdown().await;
    let _ = closed.send(());
}

/// Run a session over any byte stream halves (a TCP socket or a test duplex).
pub async fn serve_connection<R, W>(reader: R, writer: W, ctx: Arc<SessionContext>, peer: String)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    let max = ctx.max_line_length;
    let reader_task = tokio::spawn(async move {
        let mut lines = LineReader::new(reader).max_line_len(max);
        loop {
            match lines.read_line().await {
                Ok(Some(line)) => {
                    if in_tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Line read error: {}", e);
                    break;
                }
            }
        }
    });
    tokio::spawn(write_outbound(writer, out_rx, closed_tx));

    let io = SessionIo {
        inbound: in_rx,
        outbound: out_tx,
        closed: closed_rx,
    };
    run_session(ctx, io, peer, TRANSPORT).await;
    reader_task.abort();
}

/// Accept line connections until the listener fails.
pub fn spawn_listener(listener: TcpListener, ctx: Arc<SessionContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!("Line transport listening on {}", addr);
        }
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let _ = stream.set_nodelay(true);
                    let (rd, wr) = stream.into_split();
                    tokio::spawn(serve_connection(rd, wr, Arc::clone(&ctx), addr.to_string()));
                }
                Err(e) => {
                    warn!("Line accept failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    })
}
