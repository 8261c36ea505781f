//! Session I/O loop.
//!
//! Sole owner of the transport. Outbound frames arrive through the funnel
//! relay, inbound frames are decoded and routed to the correlation table or
//! the dispatcher queue. Heartbeats and re-dials are scheduled from here so
//! that nothing else ever touches the stream.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::runtime::Runtime;
use tokio::time::timeout;

use super::client::Shared;
use super::correlation::Resolution;
use super::dispatcher::DispatchJob;
use super::funnel::{OutboundFunnel, OutboundRelay};
use super::reconnect::Backoff;
use super::status::{ConnectionStatus, FaultKind};
use crate::config::ClientConfig;
use crate::rpc::codec::{CodecError, EnvelopeCodec, FrameBuffer};
use crate::rpc::envelope::{Envelope, Notification, Request};
use crate::rpc::protocol::{HELLO_METHOD, HEARTBEAT_METHOD, HeartbeatParams, HelloMessage};
use crate::rpc::transport::{BoxStream, SessionSource};

const READ_CHUNK: usize = 8 * 1024;

/// Pending entries this far past their deadline were leaked by their caller.
const SWEEP_GRACE: Duration = Duration::from_secs(10);

pub(crate) struct Session {
    shared: Arc<Shared>,
    config: ClientConfig,
    identity: String,
    source: SessionSource,
    relay: OutboundRelay,
    funnel: OutboundFunnel,
    jobs: Sender<DispatchJob>,
    backoff: Backoff,
    stream: Option<BoxStream>,
    buffer: FrameBuffer,
    /// `None` until the next dial is due
    next_dial: Option<Instant>,
    may_dial: bool,
    last_ping: Option<Instant>,
    /// id of the latest heartbeat, so a plain response to it counts as an echo
    heartbeat_id: Option<String>,
    last_pong: Instant,
    stale: bool,
}

impl Session {
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: ClientConfig,
        identity: String,
        source: SessionSource,
        relay: OutboundRelay,
        funnel: OutboundFunnel,
        jobs: Sender<DispatchJob>,
    ) -> Self {
        let backoff = Backoff::from_config(&config.reconnect);
        Self {
            shared,
            config,
            identity,
            source,
            relay,
            funnel,
            jobs,
            backoff,
            stream: None,
            buffer: FrameBuffer::new(),
            next_dial: None,
            may_dial: true,
            last_ping: None,
            heartbeat_id: None,
            last_pong: Instant::now(),
            stale: false,
        }
    }

    /// Thread entry point; returns once the client is closed.
    pub(crate) fn run(mut self, runtime: Runtime) {
        log::debug!("Session loop started for {}", self.source.describe());
        runtime.block_on(self.drive());

        if self.stream.is_some() {
            runtime.block_on(self.shutdown_stream());
        }
        self.shared.publish(ConnectionStatus::Closed);
        log::debug!("Session loop stopped");
    }

    async fn drive(&mut self) {
        let mut read_buf = vec![0u8; READ_CHUNK];
        let poll_interval = self.config.poll_interval();

        while self.shared.is_active() {
            if self.stream.is_none() && self.may_dial {
                self.try_connect().await;
                if !self.shared.is_active() {
                    break;
                }
            }

            let now = Instant::now();
            self.check_liveness(now);
            self.maybe_heartbeat(now);
            if let Some(cutoff) = now.checked_sub(SWEEP_GRACE) {
                let swept = self.shared.correlation.sweep_expired(cutoff);
                if swept > 0 {
                    log::warn!("Swept {swept} abandoned pending calls");
                }
            }

            let connected = self.stream.is_some();
            tokio::select! {
                _ = self.shared.shutdown.notified() => break,

                Some(frame) = self.relay.next() => self.write_frame(frame).await,

                result = read_some(&mut self.stream, &mut read_buf), if connected => {
                    match result {
                        Ok(0) => self.lose_stream("peer closed the connection"),
                        Ok(n) => self.on_bytes(&read_buf[..n]),
                        Err(e) => self.lose_stream(format!("read failed: {e}")),
                    }
                }

                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn try_connect(&mut self) {
        if self.next_dial.is_some_and(|at| Instant::now() < at) {
            return;
        }
        self.next_dial = None;

        let dialed = match &mut self.source {
            SessionSource::Stream(stream) => match stream.take() {
                Some(stream) => Ok(stream),
                None => {
                    self.may_dial = false;
                    return;
                }
            },
            SessionSource::Endpoint(endpoint) => {
                self.shared.publish(ConnectionStatus::Connecting);
                log::debug!("Dialing {endpoint}");
                tokio::select! {
                    _ = self.shared.shutdown.notified() => return,
                    result = timeout(self.config.io_timeout(), endpoint.dial()) => match result {
                        Ok(Ok(stream)) => Ok(stream),
                        Ok(Err(e)) => Err(format!("dial failed: {e}")),
                        Err(_) => Err("dial timed out".to_owned()),
                    },
                }
            }
        };

        match dialed {
            Ok(stream) => self.on_connected(stream).await,
            Err(reason) => {
                self.shared.stats.record(FaultKind::Transport);
                self.schedule_redial(reason);
            }
        }
    }

    async fn on_connected(&mut self, stream: BoxStream) {
        self.stream = Some(stream);
        self.buffer.clear();
        self.backoff.reset();
        self.last_ping = None;
        self.heartbeat_id = None;
        self.last_pong = Instant::now();
        self.stale = false;

        // the peer learns our identity before anything else
        match hello_frame(&self.identity) {
            Ok(frame) => self.write_frame(frame).await,
            Err(e) => log::error!("Failed to encode {HELLO_METHOD}: {e:#}"),
        }
        if self.stream.is_none() || !self.shared.is_active() {
            return;
        }

        self.shared.stats.connected();
        self.shared.publish(ConnectionStatus::Connected);
        log::info!(
            "Session {} connected to {}",
            self.identity,
            self.source.describe()
        );
    }

    fn check_liveness(&mut self, now: Instant) {
        if self.stream.is_none() || self.stale {
            return;
        }

        let silence = now.saturating_duration_since(self.last_pong);
        if silence > self.config.heartbeat_timeout() {
            self.stale = true;
            self.shared.stats.stale_warning();
            self.shared.publish(ConnectionStatus::Stale);
            log::warn!(
                "No heartbeat echo from {} for {:.1}s, peer may be unresponsive",
                self.source.describe(),
                silence.as_secs_f64()
            );
        }
    }

    fn maybe_heartbeat(&mut self, now: Instant) {
        if self.stream.is_none() {
            return;
        }
        let interval = self.config.heartbeat_interval();
        if self
            .last_ping
            .is_some_and(|at| now.saturating_duration_since(at) < interval)
        {
            return;
        }
        self.last_ping = Some(now);

        let submitted = heartbeat_frame().and_then(|(id, frame)| {
            self.funnel.submit(frame)?;
            Ok(id)
        });
        match submitted {
            Ok(id) => {
                self.heartbeat_id = Some(id);
                self.shared.stats.heartbeat_sent();
            }
            Err(e) => log::warn!("Failed to queue heartbeat: {e:#}"),
        }
    }

    async fn write_frame(&mut self, frame: Vec<u8>) {
        let Some(stream) = self.stream.as_mut() else {
            log::debug!("No transport, dropping {} byte frame", frame.len());
            self.shared.stats.record(FaultKind::Transport);
            return;
        };

        // a peer that stops reading must not hold up close
        let written = tokio::select! {
            _ = self.shared.shutdown.notified() => {
                log::debug!("Close requested, abandoning {} byte write", frame.len());
                return;
            }
            result = timeout(self.config.io_timeout(), async {
                stream.write_all(&frame).await?;
                stream.flush().await
            }) => result,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.lose_stream(format!("write failed: {e}")),
            Err(_) => self.lose_stream("write timed out"),
        }
    }

    fn on_bytes(&mut self, data: &[u8]) {
        self.buffer.push(data);

        loop {
            match self.buffer.next_frame() {
                Ok(Some(frame)) => match EnvelopeCodec::decode(&frame) {
                    Ok(envelope) => self.route(envelope),
                    Err(e) => {
                        log::warn!("Dropping undecodable frame: {e}");
                        self.shared.stats.record(FaultKind::Decode);
                    }
                },
                Ok(None) => break,
                Err(e @ CodecError::FrameTooLarge(_)) => {
                    // the length prefix cannot be trusted, so neither can the stream position
                    self.shared.stats.record(FaultKind::Decode);
                    self.lose_stream(e);
                    break;
                }
                Err(e) => {
                    log::warn!("Frame buffer reset: {e}");
                    self.shared.stats.record(FaultKind::Decode);
                    break;
                }
            }
        }
    }

    fn route(&mut self, envelope: Envelope) {
        if envelope.method() == Some(HEARTBEAT_METHOD) || self.is_heartbeat_reply(&envelope) {
            self.on_pong();
            return;
        }

        match envelope {
            Envelope::Response(response) => {
                let id = response.id.clone();
                match self.shared.correlation.resolve(&id, response.into()) {
                    Resolution::Delivered => {}
                    Resolution::Abandoned => {
                        log::debug!("Response {id} arrived after its caller gave up");
                    }
                    Resolution::Missing => {
                        log::warn!("No pending call for response id {id}, dropped");
                        self.shared.stats.record(FaultKind::CorrelationMiss);
                    }
                }
            }
            Envelope::Notification(Notification { method, params }) => {
                let job = DispatchJob {
                    handler: self.shared.handlers.lookup(&method),
                    method,
                    params,
                };
                if self.jobs.send(job).is_err() {
                    log::debug!("Dispatcher gone, notification dropped");
                }
            }
            Envelope::Request(request) => {
                log::warn!(
                    "Unexpected request {} ({}) from peer, dropped",
                    request.method,
                    request.id
                );
            }
        }
    }

    fn is_heartbeat_reply(&self, envelope: &Envelope) -> bool {
        match envelope {
            Envelope::Response(response) => {
                self.heartbeat_id.as_deref() == Some(response.id.as_str())
            }
            _ => false,
        }
    }

    fn on_pong(&mut self) {
        self.last_pong = Instant::now();
        self.shared.stats.pong_received();

        if self.stale {
            self.stale = false;
            self.shared.publish(ConnectionStatus::Connected);
            log::info!("Heartbeat echo from {} resumed", self.source.describe());
        }
    }

    fn lose_stream(&mut self, reason: impl Display) {
        self.stream = None;
        self.buffer.clear();
        self.stale = false;
        self.shared.stats.record(FaultKind::Transport);

        if self.shared.is_active() {
            self.schedule_redial(reason);
        }
    }

    fn schedule_redial(&mut self, reason: impl Display) {
        let target = self.source.describe();

        if !self.source.is_dialable() || !self.config.reconnect.enabled {
            self.give_up(&target, reason);
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                log::warn!(
                    "Connection to {target} unavailable ({reason}), retry {} in {delay:?}",
                    self.backoff.attempts()
                );
                self.next_dial = Some(Instant::now() + delay);
                self.shared.publish(ConnectionStatus::Reconnecting);
            }
            None => self.give_up(&target, reason),
        }
    }

    fn give_up(&mut self, target: &str, reason: impl Display) {
        self.may_dial = false;
        self.next_dial = None;
        log::error!("Connection to {target} lost ({reason}), no further attempts");
        self.shared.publish(ConnectionStatus::Disconnected);
    }

    async fn shutdown_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match timeout(self.config.poll_interval(), stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Transport shutdown failed: {e}"),
                Err(_) => log::debug!("Transport shutdown timed out"),
            }
        }
    }
}

async fn read_some(stream: &mut Option<BoxStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

fn hello_frame(identity: &str) -> Result<Vec<u8>> {
    let params = serde_json::to_value(HelloMessage::new(identity))?;
    Ok(EnvelopeCodec::encode(&Notification::new(HELLO_METHOD, params).into())?)
}

/// Heartbeat request and its id.
fn heartbeat_frame() -> Result<(String, Vec<u8>)> {
    let params = serde_json::to_value(HeartbeatParams::now())?;
    let request = Request::new(HEARTBEAT_METHOD, params);
    let id = request.id.clone();
    Ok((id, EnvelopeCodec::encode(&request.into())?))
}
