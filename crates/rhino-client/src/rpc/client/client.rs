use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

use super::correlation::CorrelationTable;
use super::dispatcher::{Dispatcher, HandlerTable};
use super::funnel::{OutboundFunnel, OutboundRelay};
use super::session::Session;
use super::status::{ConnectionStatus, SessionStats, StatsSnapshot};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::rpc::codec::EnvelopeCodec;
use crate::rpc::envelope::{Envelope, Notification, Reply, Request};
use crate::rpc::protocol::is_reserved;
use crate::rpc::transport::{BoxStream, Endpoint, SessionSource, SessionStream};

const SESSION_THREAD: &str = "rhino-session";
const DISPATCH_THREAD: &str = "rhino-dispatch";

/// Callback for a server-pushed notification.
///
/// Runs on the dispatcher thread. An `Err` or a panic is logged and counted;
/// it never reaches the session.
pub type NotificationHandler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// State shared by the facade, the session loop and the dispatcher
pub(crate) struct Shared {
    active: AtomicBool,
    pub(crate) correlation: CorrelationTable,
    pub(crate) handlers: HandlerTable,
    pub(crate) stats: SessionStats,
    status: watch::Sender<ConnectionStatus>,
    pub(crate) shutdown: Notify,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            active: AtomicBool::new(false),
            correlation: CorrelationTable::new(),
            handlers: HandlerTable::default(),
            stats: SessionStats::default(),
            status,
            shutdown: Notify::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn publish(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status.clone());
        if previous != status {
            log::debug!("Connection status {previous} -> {status}");
        }
    }
}

/// Parts consumed by `start`
struct Startup {
    source: SessionSource,
    relay: OutboundRelay,
}

/// JSON-RPC client facade.
///
/// All methods take `&self`; share it between caller threads behind an
/// `Arc`. Calls block the calling thread only, each waiting on its own
/// response slot, while one background session thread owns the transport.
///
/// ```no_run
/// use rhino_client::{ClientConfig, RpcClient};
/// use serde_json::json;
///
/// let client = RpcClient::new(ClientConfig::default())?;
/// client.on("on_trade", |params| {
///     println!("trade: {params}");
///     Ok(())
/// });
/// client.start()?;
///
/// let reply = client.call("rqalpha.portfolio", json!({"tag": "alice"}));
/// if reply.is_timeout() {
///     eprintln!("gateway did not answer");
/// }
/// client.close();
/// # Ok::<(), rhino_client::ClientError>(())
/// ```
pub struct RpcClient {
    config: ClientConfig,
    identity: String,
    shared: Arc<Shared>,
    funnel: OutboundFunnel,
    startup: Mutex<Option<Startup>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl RpcClient {
    /// Create a client that dials `config.endpoint` once started.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint: Endpoint = config.endpoint.parse()?;
        Self::build(config, SessionSource::Endpoint(endpoint))
    }

    /// Create a client over an already connected stream.
    ///
    /// The stream is used once; after it is lost the client stays
    /// disconnected until closed.
    pub fn with_stream<S>(config: ClientConfig, stream: S) -> Result<Self, ClientError>
    where
        S: SessionStream + 'static,
    {
        let stream: BoxStream = Box::new(stream);
        Self::build(config, SessionSource::Stream(Some(stream)))
    }

    fn build(config: ClientConfig, source: SessionSource) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::Config(format!("{e:#}")))?;

        let identity = config
            .identity
            .clone()
            .unwrap_or_else(|| format!("rhino-{}", Uuid::new_v4().simple()));
        let (funnel, relay) = OutboundFunnel::channel();

        Ok(Self {
            config,
            identity,
            shared: Arc::new(Shared::new()),
            funnel,
            startup: Mutex::new(Some(Startup { source, relay })),
            threads: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the session and dispatcher threads. Calling it again while
    /// running is a no-op.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let mut startup = lock(&self.startup);
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if startup.is_none() {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ClientError::Runtime)?;
        let Some(Startup { source, relay }) = startup.take() else {
            return Ok(());
        };
        let target = source.describe();

        let (jobs, queue) = mpsc::channel();
        self.shared.set_active(true);

        let session = Session::new(
            self.shared.clone(),
            self.config.clone(),
            self.identity.clone(),
            source,
            relay,
            self.funnel.clone(),
            jobs,
        );
        let session_thread = thread::Builder::new()
            .name(SESSION_THREAD.to_owned())
            .spawn(move || session.run(runtime))
            .map_err(|source| self.abort_start(None, SESSION_THREAD, source))?;

        let dispatcher = Dispatcher::new(queue, self.shared.clone(), self.config.poll_interval());
        let dispatch_thread = match thread::Builder::new()
            .name(DISPATCH_THREAD.to_owned())
            .spawn(move || dispatcher.run())
        {
            Ok(handle) => handle,
            Err(source) => return Err(self.abort_start(Some(session_thread), DISPATCH_THREAD, source)),
        };

        lock(&self.threads).extend([session_thread, dispatch_thread]);
        log::info!("RPC client {} started against {target}", self.identity);
        Ok(())
    }

    fn abort_start(
        &self,
        started: Option<JoinHandle<()>>,
        name: &'static str,
        source: std::io::Error,
    ) -> ClientError {
        log::error!("Failed to spawn {name} thread: {source}");
        self.closed.store(true, Ordering::Release);
        self.shared.set_active(false);
        self.shared.shutdown.notify_one();
        if let Some(handle) = started {
            if handle.join().is_err() {
                log::error!("{SESSION_THREAD} thread panicked");
            }
        }
        self.shared.publish(ConnectionStatus::Closed);
        ClientError::Spawn { name, source }
    }

    /// Issue a request and block until its response or the call timeout.
    ///
    /// Never fails: a missing response, a stopped client or a send failure
    /// all come back as [`Reply::timeout`]. Method names in the reserved
    /// `rpc.` namespace are rejected locally without touching the wire.
    pub fn call(&self, method: &str, params: Value) -> Reply {
        if !self.is_active() {
            log::debug!("Call {method} on an inactive client");
            return Reply::timeout();
        }
        if is_reserved(method) {
            return Reply::rejected(ClientError::ReservedMethod(method.to_owned()).to_string());
        }

        let call_timeout = self.config.call_timeout();
        let request = Request::new(method, params);
        let call_id = request.id.clone();
        let slot = self
            .shared
            .correlation
            .register(&call_id, Instant::now() + call_timeout);

        let frame = match EnvelopeCodec::encode(&request.into()) {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.correlation.unregister(&call_id);
                log::error!("Failed to encode call {method}: {e}");
                return Reply::internal(e.to_string());
            }
        };

        if let Err(e) = self.funnel.submit(frame) {
            self.shared.correlation.unregister(&call_id);
            log::warn!("Call {method} not sent: {e}");
            return Reply::timeout();
        }

        match slot.wait(call_timeout) {
            Some(reply) => reply,
            None => {
                self.shared.correlation.unregister(&call_id);
                log::debug!("Call {method} ({call_id}) timed out");
                Reply::timeout()
            }
        }
    }

    /// Send a notification. Nothing is awaited.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if !self.is_active() {
            return Err(ClientError::NotRunning);
        }
        if is_reserved(method) {
            return Err(ClientError::ReservedMethod(method.to_owned()));
        }

        let frame = EnvelopeCodec::encode(&Envelope::from(Notification::new(method, params)))?;
        self.funnel.submit(frame)
    }

    /// Register the handler for notifications named `method`, replacing any
    /// earlier one. May be called before or after `start`.
    pub fn on<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let method = method.into();
        if self.shared.handlers.insert(method.clone(), Arc::new(handler)) {
            log::debug!("Replaced handler for {method}");
        }
    }

    /// Remove the handler for `method`. Returns whether one was registered.
    pub fn off(&self, method: &str) -> bool {
        self.shared.handlers.remove(method)
    }

    /// Stop both background threads and release every waiting caller.
    ///
    /// Returns within about one poll interval unless a notification handler
    /// is still running. Idempotent; also safe to call from a handler.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // waits out a concurrent start, so its threads are in `threads` below
        lock(&self.startup).take();
        self.shared.set_active(false);
        self.shared.shutdown.notify_one();

        let handles: Vec<_> = lock(&self.threads).drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("background").to_owned();
            if handle.join().is_err() {
                log::error!("{name} thread panicked");
            }
        }

        let released = self.shared.correlation.clear();
        if released > 0 {
            log::debug!("Released {released} pending calls on close");
        }
        self.shared.publish(ConnectionStatus::Closed);
        log::info!("RPC client {} closed", self.identity);
    }

    /// Identity announced to the peer on every connect
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active() && !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that observes every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.correlation.len()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
