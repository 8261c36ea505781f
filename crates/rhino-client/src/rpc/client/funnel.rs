//! Outbound funnel: any number of caller threads submit encoded frames, a
//! single relay owned by the session loop writes them to the transport.

use tokio::sync::mpsc;

use crate::error::ClientError;

/// Submitting side, cheap to clone and safe to share between threads.
#[derive(Clone, Debug)]
pub struct OutboundFunnel {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// Draining side, owned by the session loop
#[derive(Debug)]
pub struct OutboundRelay {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl OutboundFunnel {
    pub fn channel() -> (Self, OutboundRelay) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, OutboundRelay { receiver })
    }

    /// Queue one complete frame. Never blocks.
    pub fn submit(&self, frame: Vec<u8>) -> Result<(), ClientError> {
        self.sender
            .send(frame)
            .map_err(|_closed| ClientError::FunnelClosed)
    }
}

impl OutboundRelay {
    /// Next queued frame; `None` once every funnel handle is gone.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}
