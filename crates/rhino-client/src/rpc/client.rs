#[expect(clippy::module_inception)]
pub mod client;
pub mod correlation;
pub(crate) mod dispatcher;
pub mod funnel;
pub mod reconnect;
pub(crate) mod session;
pub mod status;

pub use client::{NotificationHandler, RpcClient};
pub use correlation::{CorrelationTable, Resolution, ResponseSlot};
pub use funnel::{OutboundFunnel, OutboundRelay};
pub use reconnect::Backoff;
pub use status::{ConnectionStatus, FaultKind, SessionStats, StatsSnapshot};
