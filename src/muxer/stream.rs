//! Logical streams of a session.
//!
//! The session owns every stream's state; a [`Stream`] is only a handle to
//! it. All frames of one stream are queued while that stream's lock is held,
//! which keeps them in order on the wire.
//!
//! # State machine
//!
//! ```text
//!            SYN sent/received
//!   Idle ─────────────────────► Open
//!                               │  │
//!                     FIN sent  │  │ FIN received
//!                               ▼  ▼
//!             HalfClosedLocal     HalfClosedRemote
//!                         │          │
//!          FIN received   └──► Closed ◄──┘  FIN sent
//!
//!   any non-terminal state ── RST sent/received ──► Reset
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::config::SessionConfig;
use super::session::SessionInner;
use super::window::{RecvWindow, SendWindow};
use crate::error::{PeerwireError, Result};
use crate::protocol::Frame;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Created, SYN not yet sent.
    Idle,
    Open,
    /// We sent FIN; the peer may still write.
    HalfClosedLocal,
    /// The peer sent FIN; we may still write.
    HalfClosedRemote,
    Closed,
    Reset,
}

impl StreamState {
    /// Whether we may still send data.
    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Whether the peer may still send data.
    #[inline]
    pub fn can_receive(self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Reset)
    }
}

/// Stream state shared between the session and the stream handle.
#[derive(Debug)]
pub(crate) struct StreamShared {
    id: u32,
    inner: Mutex<StreamInner>,
}

#[derive(Debug)]
pub(crate) struct StreamInner {
    pub state: StreamState,
    /// Peer answered our SYN (always true for inbound streams).
    pub acknowledged: bool,
    /// Owning session is gone.
    pub session_closed: bool,
    pub send_window: SendWindow,
    pub recv_window: RecvWindow,
    pub recv_buf: BytesMut,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl StreamShared {
    pub fn new(id: u32, config: &SessionConfig) -> Self {
        Self {
            id,
            inner: Mutex::new(StreamInner {
                state: StreamState::Idle,
                acknowledged: false,
                session_closed: false,
                send_window: SendWindow::new(config.initial_window),
                recv_window: RecvWindow::new(config.initial_window, config.update_threshold()),
                recv_buf: BytesMut::new(),
                read_waker: None,
                write_waker: None,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock()
    }
}

impl StreamInner {
    pub fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    pub fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }

    /// We sent FIN. Returns true once both directions are closed.
    pub fn close_local(&mut self) -> bool {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
        self.wake_writer();
        self.state == StreamState::Closed
    }

    /// The peer sent FIN. Returns true once both directions are closed.
    pub fn close_remote(&mut self) -> bool {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
        self.wake_reader();
        self.state == StreamState::Closed
    }

    /// RST sent or received: buffered data is discarded.
    pub fn reset(&mut self) {
        self.state = StreamState::Reset;
        self.recv_buf.clear();
        self.wake_reader();
        self.wake_writer();
    }

    /// The session went away underneath the stream.
    pub fn terminate(&mut self) {
        self.session_closed = true;
        self.wake_reader();
        self.wake_writer();
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            StreamState::Reset => Err(PeerwireError::StreamReset),
            StreamState::HalfClosedLocal | StreamState::Closed => Err(PeerwireError::StreamClosed),
            _ if self.session_closed => Err(PeerwireError::ConnectionClosed),
            _ => Ok(()),
        }
    }
}

/// Handle to one logical stream.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`]. Writes never exceed the
/// window granted by the peer; `poll_write` returns `Pending` while the
/// window is empty. Dropping a handle releases the stream's slot in the
/// session: it sends FIN once the peer has finished sending, RST otherwise.
pub struct Stream {
    shared: Arc<StreamShared>,
    session: Arc<SessionInner>,
}

impl Stream {
    pub(crate) fn new(shared: Arc<StreamShared>, session: Arc<SessionInner>) -> Self {
        Self { shared, session }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.shared.id()
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    /// Bytes the peer currently allows us to send.
    pub fn send_window(&self) -> u32 {
        self.shared.lock().send_window.available()
    }

    /// Whether the peer acknowledged the stream.
    pub fn is_acknowledged(&self) -> bool {
        self.shared.lock().acknowledged
    }

    /// Write all of `buf` without waiting, or nothing.
    ///
    /// Fails with [`PeerwireError::WouldBlock`] if the send window is
    /// smaller than `buf`.
    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        let mut inner = self.shared.lock();
        inner.check_writable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if (inner.send_window.available() as usize) < buf.len() {
            return Err(PeerwireError::WouldBlock);
        }
        self.send_data(&mut inner, buf)?;
        Ok(buf.len())
    }

    /// Half-close: send FIN. The peer may keep writing.
    pub fn close(&self) -> Result<()> {
        let closed = {
            let mut inner = self.shared.lock();
            match inner.state {
                StreamState::Open | StreamState::HalfClosedRemote => {}
                StreamState::Reset => return Err(PeerwireError::StreamReset),
                _ => return Ok(()),
            }
            self.session.send_frame(Frame::close_stream(self.id()))?;
            inner.close_local()
        };

        tracing::debug!(stream_id = self.id(), "stream closed for writing");
        if closed {
            self.session.remove_stream(self.id());
        }
        Ok(())
    }

    /// Send RST and discard everything buffered.
    pub fn reset(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                return Ok(());
            }
            if !inner.session_closed {
                self.session.send_frame(Frame::reset_stream(self.id()))?;
            }
            inner.reset();
        }

        tracing::debug!(stream_id = self.id(), "stream reset");
        self.session.remove_stream(self.id());
        Ok(())
    }

    /// Queue `data` as DATA frames. Caller checked the window.
    fn send_data(&self, inner: &mut StreamInner, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.session.config().frame_payload_limit()) {
            self.session
                .send_frame(Frame::data(self.id(), Bytes::copy_from_slice(chunk)))?;
        }
        inner.send_window.consume(data.len() as u32);
        Ok(())
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let mut inner = this.shared.lock();

        if !inner.recv_buf.is_empty() {
            let n = buf.remaining().min(inner.recv_buf.len());
            let chunk = inner.recv_buf.split_to(n);
            buf.put_slice(&chunk);

            if inner.state.can_receive() && !inner.session_closed {
                if let Some(delta) = inner.recv_window.consume(n as u32) {
                    tracing::trace!(stream_id = this.id(), delta, "granting window");
                    // A dead writer also ends the session; nothing to do here.
                    let _ = this
                        .session
                        .send_frame(Frame::window_update(this.id(), delta as i32));
                }
            }
            return Poll::Ready(Ok(()));
        }

        match inner.state {
            StreamState::HalfClosedRemote | StreamState::Closed => Poll::Ready(Ok(())),
            StreamState::Reset => Poll::Ready(Err(PeerwireError::StreamReset.into())),
            _ if inner.session_closed => Poll::Ready(Err(PeerwireError::ConnectionClosed.into())),
            _ => {
                inner.read_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let mut inner = this.shared.lock();

        inner.check_writable()?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let available = inner.send_window.available() as usize;
        if available == 0 {
            inner.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = buf.len().min(available);
        this.send_data(&mut inner, &buf[..n])?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Frames are flushed by the session's writer task.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(self.close().map_err(Into::into))
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let release = {
            let mut inner = self.shared.lock();
            if inner.state.is_terminal() {
                false
            } else if inner.state.can_receive() {
                // Nobody will read what the peer still sends.
                if !inner.session_closed {
                    let _ = self.session.send_frame(Frame::reset_stream(self.id()));
                }
                inner.reset();
                true
            } else {
                if inner.state.can_write() && !inner.session_closed {
                    let _ = self.session.send_frame(Frame::close_stream(self.id()));
                }
                inner.close_local();
                true
            }
        };

        if release {
            tracing::trace!(stream_id = self.id(), "stream handle dropped");
            self.session.remove_stream(self.id());
        }
    }
}
