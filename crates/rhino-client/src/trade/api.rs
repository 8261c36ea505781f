use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::order::{CallStatus, Credentials, OrderFields};
use crate::config::ClientConfig;
use crate::rpc::client::RpcClient;
use crate::rpc::envelope::{Reply, RpcError};
use crate::rpc::protocol::INTERNAL_ERROR_CODE;

/// Namespace the gateway registers its trade methods under
pub const DEFAULT_NAMESPACE: &str = "rqalpha";

/// Order reference returned when placement failed
pub const REJECTED_ORDER: &str = "-1";

/// Order-management calls on top of [`RpcClient::call`].
///
/// Every call inherits the client's timeout: an unanswered call comes back
/// as a failure carrying `-1,jsonrpc, timeout`. No order state is kept here.
pub struct TradeApi {
    config: ClientConfig,
    namespace: String,
    username: String,
    client: Option<RpcClient>,
}

impl TradeApi {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            username: String::new(),
            client: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn method(&self, name: &str) -> String {
        format!("{}.{name}", self.namespace)
    }

    /// Underlying client, once `login` has created it.
    ///
    /// Handy for registering notification handlers next to the trade calls.
    pub fn client(&self) -> Option<&RpcClient> {
        self.client.as_ref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Connect to `endpoint` and authenticate.
    ///
    /// Incomplete credentials are refused locally before any client is
    /// created.
    pub fn login(&mut self, endpoint: &str, credentials: &Credentials) -> (bool, String) {
        if !credentials.is_complete() {
            return (false, "-1,empty username or password".to_owned());
        }

        self.close();
        let config = self.config.clone().with_endpoint(endpoint);
        let client = match RpcClient::new(config) {
            Ok(client) => client,
            Err(e) => return (false, format!("-1,{e}")),
        };
        if let Err(e) = client.start() {
            return (false, format!("-1,{e}"));
        }
        self.username = credentials.username.clone();

        let reply = client.call(
            &self.method("login"),
            json!({"username": credentials.username, "password": credentials.password}),
        );
        self.client = Some(client);

        if reply.is_ok() {
            log::info!("{} logged in", self.username);
            (true, format!("{} has login", self.username))
        } else {
            let status = CallStatus::from(reply.error);
            log::warn!("Login of {} refused: {status}", self.username);
            (false, status.to_string())
        }
    }

    /// Returns the gateway's order reference, or [`REJECTED_ORDER`] and the
    /// error.
    pub fn place_order(&self, order: &OrderFields) -> (String, String) {
        let params = match order.to_params() {
            Ok(params) => params,
            Err(e) => {
                let error = RpcError::new(INTERNAL_ERROR_CODE, e.to_string());
                return (REJECTED_ORDER.to_owned(), error.to_string());
            }
        };

        let reply = self.call("order.place", params);
        if !reply.is_ok() {
            return (
                REJECTED_ORDER.to_owned(),
                CallStatus::from(reply.error).to_string(),
            );
        }

        match reply.result {
            Some(Value::String(order_ref)) => (order_ref, String::new()),
            Some(Value::Number(order_ref)) => (order_ref.to_string(), String::new()),
            other => {
                log::warn!("Order placement returned no usable reference: {other:?}");
                (
                    REJECTED_ORDER.to_owned(),
                    format!("{INTERNAL_ERROR_CODE},missing order reference"),
                )
            }
        }
    }

    pub fn cancel_order(&self, order_ref: &str) -> (bool, String) {
        let reply = self.call("order.cancel", json!({"order_id": order_ref}));
        if reply.is_ok() {
            (true, String::new())
        } else {
            (false, CallStatus::from(reply.error).to_string())
        }
    }

    pub fn get_positions(&self) -> (Vec<Value>, CallStatus) {
        let reply = self.call("portfolio", json!({"tag": self.username}));
        let (result, error) = reply.into_parts();

        let rows = match result {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                log::warn!("Positions reply is not a list: {other}");
                Vec::new()
            }
        };
        (rows, error.into())
    }

    /// Orders keyed by order reference.
    pub fn get_orders(&self) -> (BTreeMap<String, Value>, CallStatus) {
        let reply = self.call("order.status", json!({"tag": self.username}));
        let (result, error) = reply.into_parts();

        let rows = match result {
            Some(Value::Object(rows)) => rows.into_iter().collect(),
            Some(Value::Null) | None => BTreeMap::new(),
            Some(other) => {
                log::warn!("Orders reply is not a map: {other}");
                BTreeMap::new()
            }
        };
        (rows, error.into())
    }

    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.close();
        }
    }

    fn call(&self, name: &str, params: Value) -> Reply {
        match &self.client {
            Some(client) => client.call(&self.method(name), params),
            None => {
                log::debug!("{name} called before login");
                Reply::timeout()
            }
        }
    }
}

impl Drop for TradeApi {
    fn drop(&mut self) {
        self.close();
    }
}
