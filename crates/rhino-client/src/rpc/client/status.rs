use std::sync::atomic::{AtomicU64, Ordering};

use strum_macros::Display;

/// Health of the session as seen by the I/O loop
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ConnectionStatus {
    /// not started yet
    Idle,
    Connecting,
    Connected,
    /// connected, but no heartbeat echo within the heartbeat timeout
    Stale,
    /// transport lost, waiting for the next dial attempt
    Reconnecting,
    /// transport lost and no further dial will be made
    Disconnected,
    Closed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Stale)
    }
}

/// Categories of failures the session recovers from locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FaultKind {
    /// send/receive failure on the transport
    Transport,
    /// inbound frame that could not be decoded
    Decode,
    /// response whose id matches no pending call
    CorrelationMiss,
    /// notification handler returned an error or panicked
    HandlerFault,
}

/// Counters maintained by the session loop and the dispatcher.
#[derive(Debug, Default)]
pub struct SessionStats {
    transport_errors: AtomicU64,
    decode_errors: AtomicU64,
    correlation_misses: AtomicU64,
    handler_faults: AtomicU64,
    heartbeats_sent: AtomicU64,
    pongs_received: AtomicU64,
    stale_warnings: AtomicU64,
    notifications_dispatched: AtomicU64,
    unhandled_notifications: AtomicU64,
    connects: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub correlation_misses: u64,
    pub handler_faults: u64,
    pub heartbeats_sent: u64,
    pub pongs_received: u64,
    pub stale_warnings: u64,
    pub notifications_dispatched: u64,
    pub unhandled_notifications: u64,
    /// successful dials, the first one included
    pub connects: u64,
}

impl SessionStats {
    pub fn record(&self, fault: FaultKind) {
        let counter = match fault {
            FaultKind::Transport => &self.transport_errors,
            FaultKind::Decode => &self.decode_errors,
            FaultKind::CorrelationMiss => &self.correlation_misses,
            FaultKind::HandlerFault => &self.handler_faults,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pong_received(&self) {
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_warning(&self) {
        self.stale_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notification_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn notification_unhandled(&self) {
        self.unhandled_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            correlation_misses: self.correlation_misses.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            stale_warnings: self.stale_warnings.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            unhandled_notifications: self.unhandled_notifications.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}
