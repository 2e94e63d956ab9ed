//! Multiplexed session over one connection.
//!
//! # Architecture
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!  connection ─► reader ─► demux: DATA / WINDOW_UPDATE ─► StreamShared (per id)
//!                        │        PING / GO_AWAY ───────► session state
//!                        └──────────────────────────────┘
//!  Stream handles ─┐
//!  demux replies ──┼─► WriterHandle ─► writer task ─► connection
//!  keep-alive ─────┘
//! ```
//!
//! The reader task is the only place incoming frames are interpreted, so
//! per-stream receive order is the wire order. Background tasks hold weak
//! references: once every [`Session`] and [`Stream`] handle is gone the
//! writer queue closes, the writer shuts the connection down and the reader
//! stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::SessionConfig;
use super::stream::{Stream, StreamShared, StreamState};
use crate::error::{PeerwireError, Result};
use crate::protocol::{go_away, Frame, FrameBuffer, FrameType, Header, SESSION_STREAM_ID};
use crate::transport::{RawConnection, Role};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Read buffer size of the demultiplexing loop.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A multiplexed connection hosting many [`Stream`]s.
///
/// Cheap to clone; all clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    role: Role,
    config: SessionConfig,
    state: Mutex<SessionState>,
    writer: Mutex<Option<WriterHandle>>,
    incoming_tx: Mutex<Option<mpsc::UnboundedSender<Arc<StreamShared>>>>,
    incoming_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<StreamShared>>>>,
    pings: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    next_ping_id: AtomicU32,
    closed_tx: watch::Sender<bool>,
}

struct SessionState {
    streams: HashMap<u32, Arc<StreamShared>>,
    /// `None` once ids of our parity are used up.
    next_stream_id: Option<u32>,
    local_go_away: bool,
    remote_go_away: bool,
    terminated: bool,
}

impl Session {
    /// Start a session on `conn`.
    ///
    /// Spawns the reader, writer and (if configured) keep-alive tasks, so it
    /// must be called inside a tokio runtime.
    pub fn new<C>(conn: C, role: Role, config: SessionConfig) -> Self
    where
        C: RawConnection + 'static,
    {
        let (reader, writer) = tokio::io::split(conn);
        let (writer, writer_task) = spawn_writer_task(writer);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let first_id = match role {
            Role::Dialer => 1,
            Role::Listener => 2,
        };

        let inner = Arc::new(SessionInner {
            role,
            state: Mutex::new(SessionState {
                streams: HashMap::new(),
                next_stream_id: Some(first_id),
                local_go_away: false,
                remote_go_away: false,
                terminated: false,
            }),
            writer: Mutex::new(Some(writer)),
            incoming_tx: Mutex::new(Some(incoming_tx)),
            incoming_rx: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
            pings: Mutex::new(HashMap::new()),
            next_ping_id: AtomicU32::new(0),
            closed_tx,
            config,
        });

        let weak = Arc::downgrade(&inner);
        let max_payload = inner.config.initial_window;
        tokio::spawn(reader_loop(reader, weak.clone(), closed_rx, max_payload));
        tokio::spawn(supervise_writer(writer_task, weak.clone()));
        if let Some(period) = inner.config.keep_alive_interval {
            tokio::spawn(keep_alive_loop(weak, period));
        }

        tracing::debug!(%role, "session started");
        Self { inner }
    }

    /// Open a new outbound stream.
    ///
    /// The SYN is queued before this returns; the handle is usable for
    /// writes without waiting for the peer's ACK.
    pub fn open_stream(&self) -> Result<Stream> {
        let shared = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return Err(PeerwireError::ConnectionClosed);
            }
            if state.local_go_away || state.remote_go_away {
                return Err(PeerwireError::SessionShutdown);
            }
            if state.streams.len() >= self.inner.config.max_streams {
                return Err(PeerwireError::TooManyStreams);
            }
            let id = state
                .next_stream_id
                .ok_or(PeerwireError::StreamIdsExhausted)?;

            let shared = Arc::new(StreamShared::new(id, &self.inner.config));
            {
                let mut stream = shared.lock();
                self.inner.send_frame(Frame::new_stream(id))?;
                stream.state = StreamState::Open;
            }
            state.next_stream_id = id.checked_add(2);
            state.streams.insert(id, shared.clone());
            shared
        };

        tracing::debug!(stream_id = shared.id(), "opened stream");
        Ok(Stream::new(shared, self.inner.clone()))
    }

    /// Wait for the next stream opened by the peer.
    ///
    /// Fails once the session is torn down and no opened streams are left
    /// in the queue.
    pub async fn accept_stream(&self) -> Result<Stream> {
        let mut incoming = self.inner.incoming_rx.lock().await;
        match incoming.recv().await {
            Some(shared) => Ok(Stream::new(shared, self.inner.clone())),
            None => Err(PeerwireError::ConnectionClosed),
        }
    }

    /// Hand every inbound stream to `handler` from a background task.
    ///
    /// Takes over the accept queue: pending and later
    /// [`accept_stream`](Self::accept_stream) calls wait until the session
    /// ends.
    pub fn on_incoming_stream<F>(&self, handler: F)
    where
        F: Fn(Stream) + Send + Sync + 'static,
    {
        let incoming = self.inner.incoming_rx.clone();
        let session = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut incoming = incoming.lock().await;
            while let Some(shared) = incoming.recv().await {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                handler(Stream::new(shared, inner));
            }
        });
    }

    /// Send GO_AWAY: refuse new streams in both directions, keep serving
    /// existing ones, and tear down once they are all closed.
    pub fn go_away(&self) -> Result<()> {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return Err(PeerwireError::ConnectionClosed);
            }
            if state.local_go_away {
                return Ok(());
            }
            self.inner.send_frame(Frame::go_away(go_away::NORMAL))?;
            state.local_go_away = true;
            state.streams.is_empty()
        };

        tracing::debug!(drained, "sent GO_AWAY");
        if drained {
            self.inner.terminate();
        }
        Ok(())
    }

    /// Tear the session down now. Live streams fail with
    /// [`PeerwireError::ConnectionClosed`].
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            if !state.local_go_away {
                state.local_go_away = true;
                self.inner.send_control(Frame::go_away(go_away::NORMAL));
            }
        }
        self.inner.terminate();
    }

    /// Measure the round-trip time to the peer.
    pub async fn ping(&self) -> Result<Duration> {
        let (id, pong) = self.inner.start_ping()?;
        let started = Instant::now();

        match tokio::time::timeout(self.inner.config.ping_timeout, pong).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(PeerwireError::ConnectionClosed),
            Err(_) => {
                self.inner.pings.lock().remove(&id);
                Err(PeerwireError::PingTimeout)
            }
        }
    }

    /// Resolves once the session is torn down.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed_tx.subscribe();
        // The sender lives as long as `self`.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Streams currently tracked, including inbound ones not yet accepted.
    pub fn stream_count(&self) -> usize {
        self.inner.state.lock().streams.len()
    }

    /// Frames queued for the connection but not yet written.
    pub fn queued_frames(&self) -> usize {
        self.inner
            .writer
            .lock()
            .as_ref()
            .map_or(0, |writer| writer.pending_count())
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.inner.role)
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .field("queued_frames", &self.queued_frames())
            .finish()
    }
}

impl SessionInner {
    #[inline]
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Queue a frame for the writer task.
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<()> {
        match self.writer.lock().as_ref() {
            Some(writer) => writer.send(frame),
            None => Err(PeerwireError::ConnectionClosed),
        }
    }

    /// Register a ping waiter and send the PING. The receiver fails if the
    /// session is torn down first.
    fn start_ping(&self) -> Result<(u32, oneshot::Receiver<()>)> {
        if self.is_terminated() {
            return Err(PeerwireError::ConnectionClosed);
        }

        let id = self.next_ping_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pings.lock().insert(id, tx);

        if let Err(err) = self.send_frame(Frame::ping_request(id)) {
            self.pings.lock().remove(&id);
            return Err(err);
        }
        Ok((id, rx))
    }

    /// Queue a reply the peer can live without.
    fn send_control(&self, frame: Frame) {
        if let Err(err) = self.send_frame(frame) {
            tracing::trace!(error = %err, "dropping control frame");
        }
    }

    /// Forget a stream that reached a terminal state or lost its handle.
    pub(crate) fn remove_stream(&self, id: u32) {
        let drained = {
            let mut state = self.state.lock();
            if state.streams.remove(&id).is_none() {
                return;
            }
            (state.local_go_away || state.remote_go_away) && state.streams.is_empty()
        };

        tracing::trace!(stream_id = id, "stream removed");
        if drained {
            tracing::debug!("all streams closed after GO_AWAY");
            self.terminate();
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    /// Fail every stream, drop the accept queue and close the writer.
    ///
    /// Frames already queued (e.g. GO_AWAY) are still written before the
    /// writer task shuts the connection down.
    fn terminate(&self) {
        let streams = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            std::mem::take(&mut state.streams)
        };

        for stream in streams.values() {
            stream.lock().terminate();
        }
        self.pings.lock().clear();
        self.incoming_tx.lock().take();
        self.writer.lock().take();
        self.closed_tx.send_replace(true);

        tracing::debug!(role = %self.role, streams = streams.len(), "session terminated");
    }

    fn protocol_violation(&self, err: &PeerwireError) {
        tracing::warn!(error = %err, "protocol violation, closing session");
        self.state.lock().local_go_away = true;
        self.send_control(Frame::go_away(go_away::PROTOCOL_ERROR));
        self.terminate();
    }

    /// Dispatch one incoming frame. Errors are protocol violations.
    fn handle_frame(&self, frame: Frame) -> Result<()> {
        tracing::trace!(
            frame_type = ?frame.header.frame_type,
            flags = frame.header.flags,
            stream_id = frame.header.stream_id,
            length = frame.header.length,
            "frame received"
        );

        match frame.header.frame_type {
            FrameType::Data | FrameType::WindowUpdate => self.handle_stream_frame(frame),
            FrameType::Ping => {
                self.handle_ping(&frame.header);
                Ok(())
            }
            FrameType::GoAway => {
                self.handle_go_away(frame.header.length);
                Ok(())
            }
        }
    }

    fn handle_stream_frame(&self, frame: Frame) -> Result<()> {
        let header = frame.header;
        let id = header.stream_id;
        if id == SESSION_STREAM_ID {
            return Err(PeerwireError::Protocol(format!(
                "{:?} frame on the session stream id",
                header.frame_type
            )));
        }

        let stream = if header.is_syn() {
            match self.accept_remote_stream(id)? {
                Some(stream) => stream,
                None => return Ok(()),
            }
        } else {
            let known = self.state.lock().streams.get(&id).cloned();
            match known {
                Some(stream) => stream,
                None => {
                    tracing::debug!(stream_id = id, "frame for unknown stream ignored");
                    return Ok(());
                }
            }
        };

        let remove = {
            let mut inner = stream.lock();
            if header.is_ack() {
                inner.acknowledged = true;
            }

            match header.frame_type {
                FrameType::Data if !frame.payload.is_empty() => {
                    if inner.state.can_receive() {
                        let len = frame.payload.len() as u32;
                        inner.recv_window.record(len).map_err(|exceeded| {
                            PeerwireError::Protocol(format!(
                                "stream {id} received {} bytes with {} left in the window",
                                exceeded.received, exceeded.remaining
                            ))
                        })?;
                        inner.recv_buf.extend_from_slice(&frame.payload);
                        inner.wake_reader();
                    } else {
                        tracing::debug!(stream_id = id, state = ?inner.state, "data after close ignored");
                    }
                }
                FrameType::WindowUpdate => {
                    inner.send_window.apply_delta(header.window_delta());
                    inner.wake_writer();
                }
                _ => {}
            }

            if header.is_rst() {
                tracing::debug!(stream_id = id, "stream reset by peer");
                inner.reset();
                true
            } else if header.is_fin() {
                tracing::debug!(stream_id = id, "stream closed by peer");
                inner.close_remote()
            } else {
                false
            }
        };

        if remove {
            self.remove_stream(id);
        }
        Ok(())
    }

    /// Register a stream opened by the peer.
    ///
    /// Returns `None` when the stream was refused with RST.
    fn accept_remote_stream(&self, id: u32) -> Result<Option<Arc<StreamShared>>> {
        let remote_parity = match self.role {
            Role::Dialer => 0,
            Role::Listener => 1,
        };
        if id % 2 != remote_parity {
            return Err(PeerwireError::Protocol(format!(
                "peer opened stream {id} with our parity"
            )));
        }

        let shared = {
            let mut state = self.state.lock();
            if state.streams.contains_key(&id) {
                return Err(PeerwireError::Protocol(format!("stream {id} already open")));
            }
            if state.local_go_away || state.remote_go_away || state.terminated {
                tracing::debug!(stream_id = id, "refusing stream after GO_AWAY");
                self.send_control(Frame::reset_stream(id));
                return Ok(None);
            }
            if state.streams.len() >= self.config.max_streams {
                tracing::warn!(stream_id = id, max = self.config.max_streams, "stream limit reached, refusing stream");
                self.send_control(Frame::reset_stream(id));
                return Ok(None);
            }

            let shared = Arc::new(StreamShared::new(id, &self.config));
            {
                let mut stream = shared.lock();
                stream.state = StreamState::Open;
                stream.acknowledged = true;
            }
            state.streams.insert(id, shared.clone());
            shared
        };

        self.send_control(Frame::ack_stream(id));
        if let Some(incoming) = self.incoming_tx.lock().as_ref() {
            // Receiver lives in `self`.
            let _ = incoming.send(shared.clone());
        }
        tracing::debug!(stream_id = id, "accepted stream");
        Ok(Some(shared))
    }

    fn handle_ping(&self, header: &Header) {
        if header.is_syn() {
            self.send_control(Frame::ping_response(header.length));
        } else if header.is_ack() {
            match self.pings.lock().remove(&header.length) {
                Some(waiter) => {
                    let _ = waiter.send(());
                }
                None => tracing::debug!(value = header.length, "unsolicited ping response"),
            }
        }
    }

    fn handle_go_away(&self, code: u32) {
        match code {
            go_away::NORMAL => tracing::debug!("peer sent GO_AWAY"),
            go_away::PROTOCOL_ERROR => tracing::warn!("peer sent GO_AWAY: protocol error"),
            go_away::INTERNAL_ERROR => tracing::warn!("peer sent GO_AWAY: internal error"),
            other => tracing::warn!(code = other, "peer sent GO_AWAY with unknown code"),
        }

        let drained = {
            let mut state = self.state.lock();
            state.remote_go_away = true;
            state.streams.is_empty()
        };
        if drained {
            self.terminate();
        }
    }
}

/// Demultiplexing loop: the single reader of the connection.
async fn reader_loop<R>(
    mut reader: R,
    session: Weak<SessionInner>,
    mut shutdown: watch::Receiver<bool>,
    max_payload: u32,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(max_payload);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            _ = shutdown.wait_for(|closed| *closed) => return,
        };

        let Some(inner) = session.upgrade() else {
            return;
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!("connection closed by peer");
                inner.terminate();
                return;
            }
            Ok(n) => n,
            Err(err) => {
                tracing::error!(error = %err, "connection read failed");
                inner.terminate();
                return;
            }
        };

        let decoded = match frames.push(&buf[..n]) {
            Ok(decoded) => decoded,
            Err(err) => {
                inner.protocol_violation(&err.into());
                return;
            }
        };

        for frame in decoded {
            if let Err(err) = inner.handle_frame(frame) {
                inner.protocol_violation(&err);
                return;
            }
        }
    }
}

/// Tear the session down if the writer dies with an error.
async fn supervise_writer(task: JoinHandle<Result<()>>, session: Weak<SessionInner>) {
    match task.await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => tracing::error!(error = %err, "connection write failed"),
        Err(err) => tracing::error!(error = %err, "writer task failed"),
    }
    if let Some(inner) = session.upgrade() {
        inner.terminate();
    }
}

/// Periodic ping. Failures are only logged.
///
/// Only a weak reference is kept while waiting for the pong, so dropping
/// the last handle ends the session without waiting for the timeout.
async fn keep_alive_loop(session: Weak<SessionInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        let (id, pong, timeout) = {
            let Some(inner) = session.upgrade() else {
                return;
            };
            match inner.start_ping() {
                Ok((id, pong)) => (id, pong, inner.config.ping_timeout),
                Err(_) => return,
            }
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, pong).await {
            Ok(Ok(())) => tracing::trace!(rtt = ?started.elapsed(), "keep-alive ping"),
            Ok(Err(_)) => return,
            Err(_) => {
                let Some(inner) = session.upgrade() else {
                    return;
                };
                inner.pings.lock().remove(&id);
                tracing::warn!(?timeout, "keep-alive ping timed out");
            }
        }
    }
}
