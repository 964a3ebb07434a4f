use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::buffer::ReceiveBuffer;
use crate::codec::FrameCodec;
use crate::service::is_benign_disconnect;
use crate::{AppError, AppResult};

use super::SessionEvents;

/// Lifecycle of a session. Transitions only move forward:
/// `Created → Receiving → Closing → Closed`, with `Created → Closed` as the
/// shortcut for a session closed before it ever started receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Receiving = 1,
    Closing = 2,
    Closed = 3,
}

/// One live connection: a receive loop, serialized sends, and an
/// exactly-once cooperative shutdown.
///
/// Owned by whichever component created it (a [`Server`](crate::Server) or a
/// [`Client`](crate::Client)) and handed around as `Arc<Session<C>>`.
pub struct Session<C: FrameCodec> {
    id: Uuid,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    state: AtomicU8,
    codec: Arc<C>,
    events: Arc<dyn SessionEvents<C>>,
    read_buffer_size: usize,
    // taken once by the receive loop
    reader: parking_lot::Mutex<Option<OwnedReadHalf>>,
    // the async mutex is what serializes concurrent sends
    writer: AsyncMutex<Option<BufWriter<OwnedWriteHalf>>>,
    cancel: CancellationToken,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl<C: FrameCodec> Session<C> {
    pub fn new(
        stream: TcpStream,
        read_buffer_size: usize,
        codec: Arc<C>,
        events: Arc<dyn SessionEvents<C>>,
    ) -> AppResult<Arc<Session<C>>> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        let (closed_tx, closed_rx) = watch::channel(false);
        Ok(Arc::new(Session {
            id: Uuid::new_v4(),
            remote_addr,
            local_addr,
            state: AtomicU8::new(SessionState::Created as u8),
            codec,
            events,
            read_buffer_size,
            reader: parking_lot::Mutex::new(Some(reader)),
            writer: AsyncMutex::new(Some(BufWriter::new(writer))),
            cancel: CancellationToken::new(),
            closed_tx,
            closed_rx,
        }))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::SeqCst) {
            0 => SessionState::Created,
            1 => SessionState::Receiving,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Spawns the single receive loop. A no-op unless the session is still
    /// in `Created`, so a second call (or a call after close) does nothing.
    pub fn start_receiving(self: &Arc<Self>) {
        if !self.transition(SessionState::Created, SessionState::Receiving) {
            return;
        }
        let reader = self.reader.lock().take();
        let Some(reader) = reader else {
            return;
        };
        let session = self.clone();
        tokio::spawn(async move {
            session.receive_loop(reader).await;
        });
    }

    async fn receive_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut buf = ReceiveBuffer::new(self.read_buffer_size);
        debug!(session = %self, "start receive loop");

        loop {
            buf.ensure_capacity();
            let read = tokio::select! {
                res = reader.read(buf.spare_mut()) => res,
                _ = self.cancel.cancelled() => {
                    debug!(session = %self, "receive loop cancelled");
                    break;
                }
            };
            let n = match read {
                // peer closed gracefully
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    if !is_benign_disconnect(&e) {
                        let err = AppError::from(e);
                        error!(session = %self, error = %err, "receive failed");
                        self.events.on_error(&err);
                    }
                    break;
                }
            };
            buf.accumulate(n);

            let mut offset = 0;
            loop {
                let before = offset;
                match self.codec.try_extract(buf.buffered(), &mut offset) {
                    Ok(Some(frame)) => self.events.on_received(&self, frame),
                    Ok(None) => break,
                    Err(e) => {
                        // the codec must have advanced past the offending
                        // bytes; bail out if it failed to, rather than spin
                        warn!(session = %self, error = %e, "rejected frame");
                        self.events.on_log(&format!("rejected frame: {}", e));
                        if offset == before {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = buf.consume(offset) {
                error!(session = %self, error = %e, "consume failed");
                self.events.on_error(&e);
                break;
            }
        }

        drop(reader);
        drop(buf);
        self.teardown().await;
    }

    /// Runs on every receive-loop exit path. The loop runs at most once, so
    /// the closed signal and `on_closed` fire at most once.
    async fn teardown(self: &Arc<Self>) {
        self.state
            .store(SessionState::Closing as u8, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        let _ = self.closed_tx.send(true);

        debug!(session = %self, "session closed");
        self.events.on_log(&format!("session closed... {}", self));
        self.events.on_closed(self);
    }

    /// Serializes and writes one frame.
    ///
    /// Returns `Ok(0)` without touching the socket when the session is not
    /// receiving. Benign disconnect-class write errors are swallowed as
    /// `Ok(0)`; anything else propagates. Concurrent sends are serialized by
    /// the writer lock, so partial writes never interleave.
    pub async fn send(self: &Arc<Self>, frame: &C::Frame) -> AppResult<usize> {
        if self.state() != SessionState::Receiving {
            return Ok(0);
        }
        let bytes = self.codec.serialize(frame);

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(0);
        };
        let result: io::Result<()> = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        drop(guard);

        match result {
            Ok(()) => {
                self.events.on_sent(self, frame);
                Ok(bytes.len())
            }
            Err(e) if is_benign_disconnect(&e) => {
                debug!(session = %self, error = %e, "send hit a closing connection");
                Ok(0)
            }
            Err(e) => Err(AppError::from(e)),
        }
    }

    /// Idempotent, concurrent-safe close.
    ///
    /// Cancels the receive loop's pending read and waits until the loop has
    /// fully exited and the socket is released. Safe to call before
    /// [`start_receiving`](Self::start_receiving): the session then moves
    /// straight to `Closed` without a closed callback, since no loop ever
    /// ran.
    pub async fn close(&self) {
        if self.transition(SessionState::Created, SessionState::Closed) {
            self.cancel.cancel();
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
            let _ = self.closed_tx.send(true);
            return;
        }

        // enter Closing at most once, no matter how many callers race here
        self.transition(SessionState::Receiving, SessionState::Closing);
        self.cancel.cancel();

        let mut closed = self.closed_rx.clone();
        let _ = closed.wait_for(|done| *done).await;
    }
}

impl<C: FrameCodec> fmt::Display for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ session_id: {}, remote: {} }}",
            self.id, self.remote_addr
        )
    }
}
