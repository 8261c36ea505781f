use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum_macros::{Display, EnumString};

use crate::rpc::envelope::RpcError;

/// Default placement algorithm on the gateway side
pub const DEFAULT_STRATEGY: &str = "TWAP_KY_01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum OrderSide {
    #[serde(rename = "B")]
    #[strum(serialize = "buy", to_string = "B")]
    Buy,
    #[serde(rename = "S")]
    #[strum(serialize = "sell", to_string = "S")]
    Sell,
}

/// Execution options forwarded verbatim to the placement algorithm.
///
/// Sent as a JSON string inside the order payload, not as a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoOptions {
    #[serde(rename = "algo.style")]
    pub style: u32,
    #[serde(rename = "algo.order_position")]
    pub order_position: String,
    #[serde(rename = "algo.order_tick")]
    pub order_tick: u32,
    #[serde(rename = "algo.append_position")]
    pub append_position: String,
    #[serde(rename = "algo.append_tick")]
    pub append_tick: u32,
    /// seconds between cancel/re-place cycles
    #[serde(rename = "algo.cancel_cycle")]
    pub cancel_cycle: u32,
    pub offer_start_time: String,
    pub offer_stop_time: String,
}

impl Default for AlgoOptions {
    fn default() -> Self {
        Self {
            style: 2,
            order_position: "OP1".to_owned(),
            order_tick: 99,
            append_position: "OP1".to_owned(),
            append_tick: 99,
            cancel_cycle: 60,
            offer_start_time: "09:30:00".to_owned(),
            offer_stop_time: "COMMON_ORDER".to_owned(),
        }
    }
}

/// One limit order as the gateway expects it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFields {
    /// instrument in gateway notation, e.g. `600000.SH`
    pub order_book_id: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub limit_price: f64,
    pub strategy: String,
    pub algo: AlgoOptions,
}

impl OrderFields {
    pub fn limit(
        order_book_id: impl Into<String>,
        side: OrderSide,
        quantity: u64,
        limit_price: f64,
    ) -> Self {
        Self {
            order_book_id: order_book_id.into(),
            side,
            quantity,
            limit_price,
            strategy: DEFAULT_STRATEGY.to_owned(),
            algo: AlgoOptions::default(),
        }
    }

    pub fn to_params(&self) -> serde_json::Result<Value> {
        Ok(json!({
            "order_book_id": self.order_book_id,
            "order_side": self.side.to_string(),
            "order_qty": self.quantity,
            "order_px_limit": self.limit_price,
            "order_place_strategy": self.strategy,
            "order_place_extraopts": serde_json::to_string(&self.algo)?,
        }))
    }
}

/// Error part of a reply in the `(rows, status)` shape of the query calls.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallStatus {
    pub code: i64,
    pub message: String,
}

impl CallStatus {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<Option<RpcError>> for CallStatus {
    fn from(error: Option<RpcError>) -> Self {
        error.map_or_else(Self::default, |e| Self {
            code: e.code,
            message: e.message,
        })
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.code, self.message)
    }
}
