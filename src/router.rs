//! Per-stream application protocol routing.
//!
//! The router maps protocol ids to handlers. Every inbound stream first
//! negotiates a protocol (as listener), then runs the matching handler in
//! its own task. Handler concurrency is capped by a semaphore shared by all
//! sessions the router serves; streams arriving at capacity are reset.
//!
//! # Example
//!
//! ```no_run
//! use peerwire::{Router, Session};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn run(session: Session) -> peerwire::Result<()> {
//! let router = Router::new()
//!     .handle("/greet/1.0.0", |mut stream| async move {
//!         stream.write_all(b"hello").await?;
//!         stream.shutdown().await?;
//!         Ok(())
//!     })
//!     .max_concurrent_handlers(64);
//!
//! router.serve(session).await
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::Result;
use crate::muxer::{Session, Stream};
use crate::negotiation::{Multiselect, Negotiator};
use crate::transport::{BoxFuture, Role};

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Trait for stream handlers.
pub trait StreamHandler: Send + Sync + 'static {
    /// Serve one stream that negotiated this handler's protocol.
    fn call(&self, stream: Stream) -> BoxFuture<'static, HandlerResult>;
}

/// Adapts an async closure to [`StreamHandler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> StreamHandler for FnHandler<F, Fut>
where
    F: Fn(Stream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, stream: Stream) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(stream))
    }
}

/// Protocols in registration order plus their handlers.
#[derive(Clone, Default)]
struct RouteTable {
    protocols: Vec<String>,
    handlers: HashMap<String, Arc<dyn StreamHandler>>,
}

/// Dispatches inbound streams to protocol handlers.
#[derive(Clone)]
pub struct Router {
    negotiator: Arc<dyn Negotiator>,
    routes: RouteTable,
    max_concurrent_handlers: usize,
    semaphore: Arc<Semaphore>,
}

impl Router {
    /// Create an empty router using multistream-select.
    pub fn new() -> Self {
        Self {
            negotiator: Arc::new(Multiselect::new()),
            routes: RouteTable::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_HANDLERS)),
        }
    }

    /// Register a handler for `protocol`, replacing any previous one.
    pub fn handle<F, Fut>(mut self, protocol: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Stream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let protocol = protocol.into();
        if !self.routes.handlers.contains_key(&protocol) {
            self.routes.protocols.push(protocol.clone());
        }
        self.routes
            .handlers
            .insert(protocol, Arc::new(FnHandler::new(handler)));
        self
    }

    /// Set maximum concurrent handlers.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self.semaphore = Arc::new(Semaphore::new(limit));
        self
    }

    /// Replace the protocol negotiator.
    pub fn negotiator(mut self, negotiator: impl Negotiator + 'static) -> Self {
        self.negotiator = Arc::new(negotiator);
        self
    }

    /// Registered protocol ids, in registration order.
    pub fn protocols(&self) -> &[String] {
        &self.routes.protocols
    }

    /// Serve inbound streams of `session` until it closes.
    pub async fn serve(&self, session: Session) -> Result<()> {
        let routes = Arc::new(self.routes.clone());

        loop {
            let stream = match session.accept_stream().await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!(error = %err, "session closed, router stopping");
                    return Ok(());
                }
            };
            self.dispatch(stream, &routes);
        }
    }

    /// Negotiate and run the handler of one stream in its own task.
    fn dispatch(&self, stream: Stream, routes: &Arc<RouteTable>) {
        let stream_id = stream.id();

        // Try to acquire semaphore permit
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!(
                    stream_id,
                    limit = self.max_concurrent_handlers,
                    "handler capacity reached, resetting stream"
                );
                let _ = stream.reset();
                return;
            }
        };

        let negotiator = self.negotiator.clone();
        let routes = routes.clone();

        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;
            let mut stream = stream;

            let protocol = match negotiator
                .select_protocol(&mut stream, Role::Listener, &routes.protocols)
                .await
            {
                Ok(protocol) => protocol,
                Err(err) => {
                    tracing::debug!(stream_id, error = %err, "stream protocol negotiation failed");
                    let _ = stream.reset();
                    return;
                }
            };

            let Some(handler) = routes.handlers.get(&protocol) else {
                tracing::warn!(stream_id, %protocol, "negotiated protocol has no handler");
                let _ = stream.reset();
                return;
            };

            if let Err(err) = handler.call(stream).await {
                tracing::error!(stream_id, %protocol, error = %err, "handler failed");
            }
        });
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("protocols", &self.routes.protocols)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .finish()
    }
}

/// Open a stream on `session` and negotiate one of `protocols` on it.
///
/// Returns the stream and the protocol the peer accepted. The stream is
/// reset if negotiation fails.
pub async fn open_protocol_stream(
    session: &Session,
    negotiator: &dyn Negotiator,
    protocols: &[String],
) -> Result<(Stream, String)> {
    let mut stream = session.open_stream()?;
    match negotiator
        .select_protocol(&mut stream, Role::Dialer, protocols)
        .await
    {
        Ok(protocol) => Ok((stream, protocol)),
        Err(err) => {
            let _ = stream.reset();
            Err(err)
        }
    }
}
