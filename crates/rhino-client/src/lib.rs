//! JSON-RPC session client for the rhino trading bridge.
//!
//! Many caller threads issue blocking, correlated calls over one
//! single-writer session while a background thread delivers server
//! notifications and keeps the link alive with heartbeats.

pub mod config;
pub mod error;
pub mod rpc;
pub mod trade;

pub use config::{ClientConfig, ReconnectConfig};
pub use error::ClientError;
pub use rpc::client::RpcClient;

/// Initialise logging for binaries and examples.
///
/// `RUST_LOG` wins when set; otherwise `level` (default `Info`) is used.
pub fn setup(level: Option<log::LevelFilter>) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.unwrap_or(log::LevelFilter::Info).as_str()),
    );
    builder.format_timestamp_millis();

    // a second init (tests, embedding apps) is not an error for us
    if builder.try_init().is_err() {
        log::debug!("logger already initialised");
    }
}
