//! Peer link: TCP listener, one session at a time, sequenced messages with ack/nack.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shuttle_core::wire::{body_len, HEADER_LEN};
use shuttle_core::{AppMessage, Channel, Dispatcher, Frame, SendError, Seq, Source, Timer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

/// A reply from the peer: the sequence number it answers, and true for Ack.
type Reply = (Seq, bool);

/// Live half of a connected peer: where outbound frames go and where its replies come back.
struct Session {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    replies: mpsc::UnboundedReceiver<Reply>,
    next_seq: Seq,
}

impl Session {
    fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, replies: mpsc::UnboundedReceiver<Reply>) -> Self {
        Self {
            outbound,
            replies,
            next_seq: 0,
        }
    }

    /// Wait for the reply to `seq`, dropping replies to earlier messages that timed out.
    async fn reply_to(&mut self, seq: Seq) -> Option<bool> {
        while let Some((answered, accepted)) = self.replies.recv().await {
            if answered == seq {
                return Some(accepted);
            }
            tracing::debug!(seq = answered, pending = seq, "dropping stale reply");
        }
        None
    }
}

/// `Channel` over whichever peer is currently connected.
/// The session lock is held for a whole send, so at most one message awaits a reply.
pub struct PeerLink {
    session: Mutex<Option<Session>>,
    ack_timeout: Duration,
}

impl PeerLink {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            session: Mutex::new(None),
            ack_timeout,
        }
    }

    async fn attach(&self, session: Session) {
        *self.session.lock().await = Some(session);
    }

    async fn detach(&self) {
        *self.session.lock().await = None;
    }
}

#[async_trait]
impl Channel for PeerLink {
    async fn send(&self, msg: &AppMessage) -> Result<(), SendError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(SendError::NotConnected)?;
        let seq = session.next_seq;
        session.next_seq = seq.wrapping_add(1);
        let bytes = Frame::Message {
            seq,
            msg: msg.clone(),
        }
        .to_bytes()?;
        session
            .outbound
            .send(bytes)
            .map_err(|_| SendError::NotConnected)?;
        match tokio::time::timeout(self.ack_timeout, session.reply_to(seq)).await {
            Ok(Some(true)) => Ok(()),
            Ok(Some(false)) => Err(SendError::Rejected),
            Ok(None) => Err(SendError::NotConnected),
            Err(_) => Err(SendError::Timeout(self.ack_timeout)),
        }
    }
}

/// Accept peers forever. A second peer waits in the backlog until the first disconnects.
pub async fn serve<S, T>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<S, Arc<PeerLink>, T>>,
    link: Arc<PeerLink>,
) -> io::Result<()>
where
    S: Source + 'static,
    T: Timer + 'static,
{
    loop {
        let (stream, addr) = listener.accept().await?;
        tracing::info!(%addr, "peer connected");
        if let Err(e) = run_session(stream, dispatcher.clone(), link.clone()).await {
            tracing::warn!(%addr, error = %e, "peer session failed");
        }
        tracing::info!(%addr, "peer disconnected");
    }
}

async fn run_session<S, T>(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher<S, Arc<PeerLink>, T>>,
    link: Arc<PeerLink>,
) -> io::Result<()>
where
    S: Source + 'static,
    T: Timer + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "cannot disable Nagle on peer socket");
    }
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Reply>();
    link.attach(Session::new(out_tx.clone(), reply_rx)).await;

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                tracing::debug!(error = %e, "peer write failed");
                break;
            }
        }
    });

    let mut tasks = JoinSet::new();
    let d = dispatcher.clone();
    tasks.spawn(async move {
        if let Err(e) = d.start_session().await {
            tracing::warn!(error = %e, "status handshake failed");
        }
    });

    let result = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        match frame {
            Frame::Ack { seq } => {
                let _ = reply_tx.send((seq, true));
            }
            Frame::Nack { seq } => {
                let _ = reply_tx.send((seq, false));
            }
            Frame::Message { seq, msg } => {
                let ack = match (Frame::Ack { seq }).to_bytes() {
                    Ok(bytes) => bytes,
                    Err(e) => break Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                };
                if out_tx.send(ack).is_err() {
                    break Ok(());
                }
                let d = dispatcher.clone();
                let today = chrono::Local::now().date_naive();
                tasks.spawn(async move {
                    match d.handle_message(&msg, today).await {
                        Ok(outcome) => tracing::debug!(seq, ?outcome, "request handled"),
                        Err(e) => tracing::warn!(seq, error = %e, "request failed"),
                    }
                });
            }
        }
        while tasks.try_join_next().is_some() {}
    };

    tasks.abort_all();
    drop(reply_tx);
    link.detach().await;
    writer_task.abort();
    result
}

/// Read one frame. `None` on clean EOF at a frame boundary.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Frame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = body_len(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut buf = vec![0u8; HEADER_LEN + len];
    buf[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut buf[HEADER_LEN..]).await?;
    match Frame::parse(&buf) {
        Ok(Some((frame, _))) => Ok(Some(frame)),
        Ok(None) => Err(io::ErrorKind::UnexpectedEof.into()),
        Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}
