//! Notification dispatch.
//!
//! The session loop looks the handler up when the notification arrives and
//! queues `(handler, params)`; this thread only invokes. A slow or faulty
//! handler therefore never stalls the I/O loop.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;

use super::client::{NotificationHandler, Shared};
use super::status::FaultKind;

/// Method name → handler, last registration wins
#[derive(Default)]
pub(crate) struct HandlerTable {
    handlers: RwLock<HashMap<String, NotificationHandler>>,
}

impl HandlerTable {
    /// Returns whether an earlier handler was replaced.
    pub(crate) fn insert(&self, method: String, handler: NotificationHandler) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, handler)
            .is_some()
    }

    pub(crate) fn remove(&self, method: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(method)
            .is_some()
    }

    pub(crate) fn lookup(&self, method: &str) -> Option<NotificationHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }
}

/// One queued notification, handler captured at enqueue time
pub(crate) struct DispatchJob {
    pub(crate) method: String,
    pub(crate) handler: Option<NotificationHandler>,
    pub(crate) params: Value,
}

pub(crate) struct Dispatcher {
    jobs: Receiver<DispatchJob>,
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub(crate) fn new(jobs: Receiver<DispatchJob>, shared: Arc<Shared>, poll_interval: Duration) -> Self {
        Self {
            jobs,
            shared,
            poll_interval,
        }
    }

    pub(crate) fn run(self) {
        log::debug!("Notification dispatcher started");

        while self.shared.is_active() {
            match self.jobs.recv_timeout(self.poll_interval) {
                Ok(job) => {
                    // nothing fires once close has begun
                    if !self.shared.is_active() {
                        break;
                    }
                    self.invoke(job);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!("Notification dispatcher stopped");
    }

    fn invoke(&self, job: DispatchJob) {
        let DispatchJob {
            method,
            handler,
            params,
        } = job;

        let Some(handler) = handler else {
            log::debug!("No handler registered for notification {method}, dropped");
            self.shared.stats.notification_unhandled();
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(&params))) {
            Ok(Ok(())) => self.shared.stats.notification_dispatched(),
            Ok(Err(e)) => {
                log::error!("Handler for {method} failed: {e:#}");
                self.shared.stats.record(FaultKind::HandlerFault);
            }
            Err(payload) => {
                log::error!("Handler for {method} panicked: {}", panic_message(payload.as_ref()));
                self.shared.stats.record(FaultKind::HandlerFault);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
