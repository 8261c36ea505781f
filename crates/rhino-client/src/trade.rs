//! Trade gateway calls: login, order placement and cancellation, position
//! and order queries.

pub mod api;
pub mod order;

pub use api::{DEFAULT_NAMESPACE, REJECTED_ORDER, TradeApi};
pub use order::{AlgoOptions, CallStatus, Credentials, DEFAULT_STRATEGY, OrderFields, OrderSide};
