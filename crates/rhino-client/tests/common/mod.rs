use std::io::{ErrorKind, Read as _, Write as _};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rhino_client::ClientConfig;
use rhino_client::rpc::{
    Envelope, EnvelopeCodec, FrameBuffer, HEARTBEAT_METHOD, Request, Response,
};

pub type Responder = Arc<dyn Fn(&Request) -> Option<Response> + Send + Sync>;

/// Client settings scaled down so tests finish quickly.
pub fn fast_config(endpoint: &str) -> ClientConfig {
    let mut config = ClientConfig::default().with_endpoint(endpoint);
    config.call_timeout_ms = 500;
    config.poll_interval_ms = 20;
    config.io_timeout_ms = 500;
    config.reconnect.min_interval_ms = 50;
    config.reconnect.max_interval_ms = 200;
    config
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

struct ServerState {
    running: AtomicBool,
    echo_heartbeat: AtomicBool,
    heartbeat_as_response: AtomicBool,
    connections: AtomicUsize,
    received: Mutex<Vec<Envelope>>,
    writer: Mutex<Option<TcpStream>>,
    responder: Mutex<Option<Responder>>,
}

/// Blocking gateway stand-in serving one connection at a time.
///
/// Heartbeats are echoed back unless disabled; requests are answered by the
/// installed responder, or left unanswered when there is none.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind mock server");
        listener
            .set_nonblocking(true)
            .expect("Failed to set nonblocking");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(ServerState {
            running: AtomicBool::new(true),
            echo_heartbeat: AtomicBool::new(true),
            heartbeat_as_response: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
            responder: Mutex::new(None),
        });

        let handle = {
            let state = state.clone();
            thread::spawn(move || accept_loop(listener, state))
        };

        Self {
            addr,
            state,
            handle: Some(handle),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&Request) -> Option<Response> + Send + Sync + 'static,
    {
        *self.state.responder.lock().expect("responder lock") = Some(Arc::new(responder));
    }

    pub fn set_echo_heartbeat(&self, echo: bool) {
        self.state.echo_heartbeat.store(echo, Ordering::SeqCst);
    }

    /// Answer heartbeats with a plain result instead of echoing the request.
    pub fn set_heartbeat_as_response(&self, as_response: bool) {
        self.state
            .heartbeat_as_response
            .store(as_response, Ordering::SeqCst);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Envelope> {
        self.state.received.lock().expect("received lock").clone()
    }

    /// Requests received so far for `method`, in arrival order.
    pub fn requests(&self, method: &str) -> Vec<Request> {
        self.received()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Request(request) if request.method == method => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn wait_for_requests(&self, method: &str, count: usize, timeout: Duration) -> Vec<Request> {
        assert!(
            wait_until(timeout, || self.requests(method).len() >= count),
            "expected {count} {method} requests, got {}",
            self.requests(method).len()
        );
        self.requests(method)
    }

    pub fn push_envelope(&self, envelope: impl Into<Envelope>) {
        let frame = EnvelopeCodec::encode(&envelope.into()).expect("Failed to encode");
        self.push_raw(&frame);
    }

    pub fn push_raw(&self, bytes: &[u8]) {
        assert!(
            wait_until(Duration::from_secs(2), || self.state.writer.lock().expect("writer lock").is_some()),
            "no client connected"
        );
        write_to_client(&self.state, bytes);
    }

    /// Drop the current connection from the server side.
    pub fn kick(&self) {
        if let Some(stream) = self.state.writer.lock().expect("writer lock").take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        self.kick();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    while state.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                state.connections.fetch_add(1, Ordering::SeqCst);
                serve(stream, &state);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(Duration::from_millis(5)),
            Err(_) => break,
        }
    }
}

fn serve(mut stream: TcpStream, state: &ServerState) {
    stream
        .set_nonblocking(false)
        .expect("Failed to set blocking");
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .expect("Failed to set read timeout");
    *state.writer.lock().expect("writer lock") = Some(stream.try_clone().expect("Failed to clone stream"));

    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 4096];

    while state.running.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.push(&chunk[..n]);
                while let Ok(Some(frame)) = buffer.next_frame() {
                    if let Ok(envelope) = EnvelopeCodec::decode(&frame) {
                        handle(state, envelope);
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => break,
        }
    }

    state.writer.lock().expect("writer lock").take();
    let _ = stream.shutdown(Shutdown::Both);
}

fn handle(state: &ServerState, envelope: Envelope) {
    state
        .received
        .lock()
        .expect("received lock")
        .push(envelope.clone());

    let Envelope::Request(request) = envelope else {
        return;
    };

    let reply: Option<Envelope> = if request.method == HEARTBEAT_METHOD {
        if !state.echo_heartbeat.load(Ordering::SeqCst) {
            None
        } else if state.heartbeat_as_response.load(Ordering::SeqCst) {
            Some(Envelope::Response(Response::success(&request.id, request.params)))
        } else {
            Some(Envelope::Request(request))
        }
    } else {
        let responder = state.responder.lock().expect("responder lock").clone();
        responder
            .and_then(|responder| responder(&request))
            .map(Envelope::Response)
    };

    if let Some(reply) = reply {
        let frame = EnvelopeCodec::encode(&reply).expect("Failed to encode");
        write_to_client(state, &frame);
    }
}

fn write_to_client(state: &ServerState, bytes: &[u8]) {
    if let Some(stream) = state.writer.lock().expect("writer lock").as_mut() {
        let _ = stream.write_all(bytes);
    }
}
