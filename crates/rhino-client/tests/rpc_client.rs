mod common;

use std::sync::{Arc, Mutex};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use common::{MockServer, fast_config, wait_until};
use rhino_client::rpc::client::ConnectionStatus;
use rhino_client::rpc::{HELLO_METHOD, HelloMessage, Notification, Response};
use rhino_client::{ClientConfig, RpcClient};
use serde_json::{Value, json};

fn echo_params(server: &MockServer) {
    server.respond_with(|request| Some(Response::success(&request.id, request.params.clone())));
}

fn started_client(config: ClientConfig) -> RpcClient {
    let client = RpcClient::new(config).expect("Failed to create client");
    client.start().expect("Failed to start client");
    client
}

#[test]
fn test_call_returns_peer_result() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));

    let reply = client.call("rqalpha.portfolio", json!({"tag": "alice"}));
    assert!(reply.is_ok(), "{reply:?}");
    assert_eq!(reply.result, Some(json!({"tag": "alice"})));
    assert_eq!(client.pending_calls(), 0);
}

#[test]
fn test_unanswered_call_times_out_within_bound() {
    let server = MockServer::start();
    let client = started_client(fast_config(&server.endpoint()));

    let started = Instant::now();
    let reply = client.call("rqalpha.order.status", json!({}));
    let elapsed = started.elapsed();

    assert!(reply.is_timeout());
    let error = reply.error.expect("timeout error");
    assert_eq!((error.code, error.message.as_str()), (-1, "jsonrpc, timeout"));
    assert!(elapsed >= Duration::from_millis(500), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned late: {elapsed:?}");
    assert_eq!(client.pending_calls(), 0);
}

#[test]
fn test_concurrent_calls_receive_their_own_responses() {
    let server = MockServer::start();
    let mut config = fast_config(&server.endpoint());
    config.call_timeout_ms = 3_000;
    let client = Arc::new(started_client(config));

    let callers: Vec<_> = (0..8)
        .map(|n| {
            let client = client.clone();
            thread::spawn(move || (n, client.call("rqalpha.echo", json!({"n": n}))))
        })
        .collect();

    // answer in reverse arrival order
    let requests = server.wait_for_requests("rqalpha.echo", 8, Duration::from_secs(2));
    for request in requests.iter().rev() {
        server.push_envelope(Response::success(&request.id, request.params["n"].clone()));
    }

    for caller in callers {
        let (n, reply) = caller.join().expect("caller thread");
        assert_eq!(reply.result, Some(json!(n)), "caller {n} got someone else's reply");
    }
    assert_eq!(client.stats().correlation_misses, 0);
}

#[test]
fn test_late_and_unknown_responses_are_dropped() {
    let server = MockServer::start();
    let client = started_client(fast_config(&server.endpoint()));

    assert!(client.call("rqalpha.order.cancel", json!({"order_id": "1"})).is_timeout());
    let late = server.wait_for_requests("rqalpha.order.cancel", 1, Duration::from_secs(1));
    server.push_envelope(Response::success(&late[0].id, json!(true)));
    server.push_envelope(Response::success("never-issued", json!(true)));

    assert!(wait_until(Duration::from_secs(2), || client.stats().correlation_misses == 2));

    // the session is unaffected
    echo_params(&server);
    let reply = client.call("rqalpha.portfolio", json!([1, 2]));
    assert_eq!(reply.result, Some(json!([1, 2])));
}

#[test]
fn test_notifications_reach_registered_handler() {
    let server = MockServer::start();
    let client = started_client(fast_config(&server.endpoint()));
    let (seen_tx, seen_rx) = mpsc::channel();

    client.on("on_trade", move |params| {
        seen_tx.send(params.clone())?;
        Ok(())
    });
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));

    server.push_envelope(Notification::new("on_unregistered", json!({})));
    server.push_envelope(Notification::new("on_trade", json!({"order_id": "ORD-9", "qty": 200})));

    let params = seen_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("handler invoked");
    assert_eq!(params, json!({"order_id": "ORD-9", "qty": 200}));
    assert!(wait_until(Duration::from_secs(1), || {
        client.stats().unhandled_notifications == 1
    }));
    assert_eq!(client.stats().handler_faults, 0);
}

#[test]
fn test_handler_is_resolved_when_notification_is_queued() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));
    let (blocked_tx, blocked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (seen_tx, seen_rx) = mpsc::channel();

    let release_rx = Mutex::new(release_rx);
    client.on("on_hold", move |_| {
        blocked_tx.send(())?;
        release_rx.lock().expect("release lock").recv()?;
        Ok(())
    });
    {
        let seen_tx = seen_tx.clone();
        client.on("on_order", move |params| {
            seen_tx.send(("registered", params.clone()))?;
            Ok(())
        });
    }
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));

    // keep the dispatcher busy while the next notifications are queued
    server.push_envelope(Notification::new("on_hold", json!({})));
    blocked_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("dispatcher busy");
    server.push_envelope(Notification::new("on_order", json!({"order_id": "ORD-1"})));
    server.push_envelope(Notification::new("on_fill", json!({"order_id": "ORD-1"})));

    // the reply trails both notifications on the stream, so both are queued
    assert!(client.call("rqalpha.portfolio", json!(1)).is_ok());

    assert!(client.off("on_order"));
    client.on("on_fill", move |params| {
        seen_tx.send(("late", params.clone()))?;
        Ok(())
    });
    release_tx.send(()).expect("handler waiting");

    let (which, params) = seen_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("handler captured at queue time invoked");
    assert_eq!(which, "registered");
    assert_eq!(params, json!({"order_id": "ORD-1"}));
    assert!(wait_until(Duration::from_secs(1), || {
        client.stats().unhandled_notifications == 1
    }));
    assert!(seen_rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_faulty_handler_does_not_stop_dispatch() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));
    let (seen_tx, seen_rx) = mpsc::channel();

    client.on("on_order", |params: &Value| {
        if params["fail"].as_bool().unwrap_or(false) {
            anyhow::bail!("cannot handle order update");
        }
        panic!("unexpected order update");
    });
    client.on("on_trade", move |_| {
        seen_tx.send(())?;
        Ok(())
    });
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));

    server.push_envelope(Notification::new("on_order", json!({"fail": true})));
    server.push_envelope(Notification::new("on_order", json!({"fail": false})));
    server.push_envelope(Notification::new("on_trade", json!({})));

    seen_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("later notification still dispatched");
    assert_eq!(client.stats().handler_faults, 2);
    assert!(client.call("rqalpha.portfolio", json!(1)).is_ok());
}

#[test]
fn test_heartbeat_round_trip_keeps_session_healthy() {
    let server = MockServer::start();
    let mut config = fast_config(&server.endpoint());
    config.heartbeat_interval_ms = 50;
    config.heartbeat_timeout_ms = 300;
    let client = started_client(config);

    assert!(wait_until(Duration::from_secs(2), || client.stats().pongs_received >= 3));
    let stats = client.stats();
    assert!(stats.heartbeats_sent >= 3);
    assert_eq!(stats.stale_warnings, 0);
    assert_eq!(client.status(), ConnectionStatus::Connected);

    let heartbeats = server.requests("x.heartbeat");
    assert!(heartbeats.iter().all(|hb| !hb.id.is_empty()));
    assert!(heartbeats.iter().all(|hb| hb.params["time"].as_f64().is_some()));
}

#[test]
fn test_plain_heartbeat_response_counts_as_echo() {
    let server = MockServer::start();
    server.set_heartbeat_as_response(true);

    let mut config = fast_config(&server.endpoint());
    config.heartbeat_interval_ms = 100;
    config.heartbeat_timeout_ms = 500;
    let client = started_client(config);

    assert!(wait_until(Duration::from_secs(2), || client.stats().pongs_received >= 3));
    thread::sleep(Duration::from_millis(600));
    let stats = client.stats();
    assert_eq!(stats.correlation_misses, 0);
    assert_eq!(stats.stale_warnings, 0);
    assert_eq!(client.status(), ConnectionStatus::Connected);
}

#[test]
fn test_silent_peer_is_reported_stale_but_not_dropped() {
    let server = MockServer::start();
    server.set_echo_heartbeat(false);
    echo_params(&server);

    let mut config = fast_config(&server.endpoint());
    config.heartbeat_interval_ms = 50;
    config.heartbeat_timeout_ms = 200;
    let client = started_client(config);

    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Stale));
    thread::sleep(Duration::from_millis(200));
    // one warning per transition, not per poll
    assert_eq!(client.stats().stale_warnings, 1);
    assert!(client.is_active());
    assert_eq!(server.connections(), 1);

    // calls still flow while stale
    let reply = client.call("rqalpha.portfolio", json!("still here"));
    assert_eq!(reply.result, Some(json!("still here")));

    server.set_echo_heartbeat(true);
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));
}

#[test]
fn test_close_releases_blocked_caller() {
    let server = MockServer::start();
    let mut config = fast_config(&server.endpoint());
    config.call_timeout_ms = 10_000;
    let client = Arc::new(started_client(config));

    let caller = {
        let client = client.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let reply = client.call("rqalpha.order.place", json!({}));
            (reply, started.elapsed())
        })
    };
    server.wait_for_requests("rqalpha.order.place", 1, Duration::from_secs(2));

    let closing = Instant::now();
    client.close();
    assert!(closing.elapsed() < Duration::from_secs(1), "close took {:?}", closing.elapsed());

    let (reply, waited) = caller.join().expect("caller thread");
    assert!(reply.is_timeout());
    assert!(waited < Duration::from_secs(3), "caller stayed blocked for {waited:?}");
    assert_eq!(client.status(), ConnectionStatus::Closed);
    assert!(client.call("rqalpha.order.place", json!({})).is_timeout());
}

#[test]
fn test_malformed_frame_is_skipped() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));

    // well-framed, but 0xc1 is never valid MessagePack
    server.push_raw(&[0, 0, 0, 4, 0, 0xc1, 0xc1, 0xc1]);
    assert!(wait_until(Duration::from_secs(2), || client.stats().decode_errors == 1));

    let reply = client.call("rqalpha.portfolio", json!("after garbage"));
    assert_eq!(reply.result, Some(json!("after garbage")));
    assert_eq!(server.connections(), 1);
}

#[test]
fn test_reserved_methods_never_reach_the_wire() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));

    let reply = client.call("rpc.shutdown", json!({}));
    assert_eq!(reply.error.map(|e| e.code), Some(-32600));
    assert!(client.notify("rpc.ping", json!({})).is_err());

    assert!(client.call("rqalpha.portfolio", json!(1)).is_ok());
    assert!(server.requests("rpc.shutdown").is_empty());
}

#[test]
fn test_hello_announces_identity_on_every_connect() {
    let server = MockServer::start();
    let mut config = fast_config(&server.endpoint());
    config.identity = Some("desk-7".to_owned());
    let client = started_client(config);

    let hellos = || {
        server
            .received()
            .into_iter()
            .filter(|envelope| envelope.method() == Some(HELLO_METHOD))
            .count()
    };
    assert!(wait_until(Duration::from_secs(2), || hellos() == 1));

    let first = server.received().into_iter().next().expect("first envelope");
    let rhino_client::rpc::Envelope::Notification(hello) = first else {
        panic!("hello must come first and be a notification");
    };
    let hello: HelloMessage = serde_json::from_value(hello.params).expect("hello payload");
    assert_eq!(hello.identity, client.identity());

    server.kick();
    assert!(wait_until(Duration::from_secs(3), || hellos() == 2));
}

#[test]
fn test_reconnects_after_peer_drops_connection() {
    let server = MockServer::start();
    echo_params(&server);
    let client = started_client(fast_config(&server.endpoint()));
    assert!(wait_until(Duration::from_secs(2), || client.stats().connects == 1));

    server.kick();
    assert!(wait_until(Duration::from_secs(3), || client.stats().connects == 2));
    assert_eq!(server.connections(), 2);
    assert!(client.stats().transport_errors >= 1);

    let reply = client.call("rqalpha.portfolio", json!("reconnected"));
    assert_eq!(reply.result, Some(json!("reconnected")));
}

#[test]
fn test_single_attempt_budget_still_redials_once() {
    let server = MockServer::start();
    echo_params(&server);
    let mut config = fast_config(&server.endpoint());
    config.reconnect.max_attempts = Some(1);
    let client = started_client(config);
    assert!(wait_until(Duration::from_secs(2), || client.stats().connects == 1));

    server.kick();
    assert!(wait_until(Duration::from_secs(3), || client.stats().connects == 2));
    assert_eq!(server.connections(), 2);
    assert!(client.status().is_connected());

    let reply = client.call("rqalpha.portfolio", json!("redialed"));
    assert_eq!(reply.result, Some(json!("redialed")));
}

#[test]
fn test_disabled_reconnect_leaves_client_disconnected() {
    let server = MockServer::start();
    let mut config = fast_config(&server.endpoint());
    config.reconnect.enabled = false;
    let client = started_client(config);
    assert!(wait_until(Duration::from_secs(2), || client.status() == ConnectionStatus::Connected));

    server.kick();
    assert!(wait_until(Duration::from_secs(2), || {
        client.status() == ConnectionStatus::Disconnected
    }));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(server.connections(), 1);

    // still open, calls just time out
    assert!(client.is_active());
    assert!(client.call("rqalpha.portfolio", json!(1)).is_timeout());
}

#[test]
fn test_unreachable_endpoint_keeps_retrying() {
    // bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port();
    let client = started_client(fast_config(&format!("tcp://127.0.0.1:{port}")));

    assert!(wait_until(Duration::from_secs(2), || client.stats().transport_errors >= 2));
    assert!(matches!(
        client.status(),
        ConnectionStatus::Reconnecting | ConnectionStatus::Connecting
    ));
    assert!(client.call("rqalpha.portfolio", json!(1)).is_timeout());

    let closing = Instant::now();
    client.close();
    assert!(closing.elapsed() < Duration::from_secs(1));
}
