//! In-memory mock network for unit and integration testing.
//!
//! [`MockNetwork`] is a [`SocketFactory`] whose sockets deliver frames to each
//! other without libzmq:
//!
//! - A publisher's `send_frames` copies the message into the inbound queue of
//!   every open subscriber that shares an endpoint with it and has a
//!   subscription that is a prefix of part 0 (the same matching rule ZeroMQ
//!   SUB sockets use).
//! - Subscriptions take effect immediately, so tests are deterministic.
//!
//! Every created socket is recorded in creation order and can be inspected
//! through a [`MockSocketHandle`].  Failures can be injected per socket index.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zmq_pubsub_core::SocketMode;

use super::{CurveSettings, PubSubSocket, SocketFactory};
use crate::error::SocketError;

/// Upper bound on how long an empty `recv_frames` call sleeps.
const EMPTY_RECV_SLEEP: Duration = Duration::from_millis(5);

/// Observable state of one mock socket.
#[derive(Debug)]
struct MockSocketState {
    mode: SocketMode,
    endpoints: Vec<String>,
    subscriptions: Vec<Vec<u8>>,
    sent: Vec<Vec<Vec<u8>>>,
    inbound: VecDeque<Vec<Vec<u8>>>,
    curve: Option<CurveSettings>,
    closed: bool,
    close_calls: usize,
    fail_connect: bool,
    fail_close: bool,
}

impl MockSocketState {
    fn new(mode: SocketMode) -> Self {
        Self {
            mode,
            endpoints: Vec::new(),
            subscriptions: Vec::new(),
            sent: Vec::new(),
            inbound: VecDeque::new(),
            curve: None,
            closed: false,
            close_calls: 0,
            fail_connect: false,
            fail_close: false,
        }
    }

    fn matches(&self, topic: &[u8]) -> bool {
        self.subscriptions.iter().any(|s| topic.starts_with(s))
    }
}

#[derive(Debug, Default)]
struct NetworkInner {
    sockets: Vec<Arc<Mutex<MockSocketState>>>,
    fail_connect: HashSet<usize>,
    fail_close: HashSet<usize>,
    fail_create: bool,
}

/// An in-memory pub/sub network.  Cloning shares the same network.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `connect`/`bind` fail on the socket created at position `index`
    /// (0-based, in creation order).  May be called before the socket exists.
    pub fn fail_connect_for(&self, index: usize) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.fail_connect.insert(index);
        if let Some(state) = inner.sockets.get(index) {
            state.lock().expect("lock poisoned").fail_connect = true;
        }
    }

    /// Makes `close` fail on the socket created at position `index`.  The
    /// socket is still released.
    pub fn fail_close_for(&self, index: usize) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.fail_close.insert(index);
        if let Some(state) = inner.sockets.get(index) {
            state.lock().expect("lock poisoned").fail_close = true;
        }
    }

    /// Makes every subsequent `create` call fail.
    pub fn fail_create(&self) {
        self.inner.lock().expect("lock poisoned").fail_create = true;
    }

    /// Number of sockets created so far.
    pub fn socket_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").sockets.len()
    }

    /// Handle to the socket created at position `index`.
    pub fn socket(&self, index: usize) -> Option<MockSocketHandle> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.sockets.get(index).map(|state| MockSocketHandle {
            state: Arc::clone(state),
        })
    }

    /// Handles to all sockets, in creation order.
    pub fn sockets(&self) -> Vec<MockSocketHandle> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner
            .sockets
            .iter()
            .map(|state| MockSocketHandle {
                state: Arc::clone(state),
            })
            .collect()
    }

    /// Delivers `frames` to every open subscriber on one of `endpoints` whose
    /// filter matches.
    fn route(&self, endpoints: &[String], frames: &[Vec<u8>]) {
        let Some(topic) = frames.first() else {
            return;
        };
        let sockets: Vec<_> = self
            .inner
            .lock()
            .expect("lock poisoned")
            .sockets
            .iter()
            .map(Arc::clone)
            .collect();

        for socket in sockets {
            let mut state = socket.lock().expect("lock poisoned");
            let shares_endpoint = state.endpoints.iter().any(|e| endpoints.contains(e));
            if state.mode == SocketMode::Subscriber
                && !state.closed
                && shares_endpoint
                && state.matches(topic)
            {
                state.inbound.push_back(frames.to_vec());
            }
        }
    }
}

impl SocketFactory for MockNetwork {
    fn create(&self, mode: SocketMode) -> Result<Box<dyn PubSubSocket>, SocketError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.fail_create {
            return Err(SocketError::Other("mock socket creation failure".into()));
        }
        let index = inner.sockets.len();
        let mut state = MockSocketState::new(mode);
        state.fail_connect = inner.fail_connect.contains(&index);
        state.fail_close = inner.fail_close.contains(&index);
        let state = Arc::new(Mutex::new(state));
        inner.sockets.push(Arc::clone(&state));
        Ok(Box::new(MockSocket {
            state,
            network: self.clone(),
        }))
    }
}

/// A socket living on a [`MockNetwork`].
pub struct MockSocket {
    state: Arc<Mutex<MockSocketState>>,
    network: MockNetwork,
}

impl MockSocket {
    fn attach(&mut self, endpoint: &str) -> Result<(), SocketError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(SocketError::Closed);
        }
        if state.fail_connect {
            return Err(SocketError::Other(format!("mock attach failure for {endpoint}")));
        }
        state.endpoints.push(endpoint.to_string());
        Ok(())
    }
}

impl PubSubSocket for MockSocket {
    fn mode(&self) -> SocketMode {
        self.state.lock().expect("lock poisoned").mode
    }

    fn configure_curve(&mut self, settings: &CurveSettings) -> Result<(), SocketError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(SocketError::Closed);
        }
        state.curve = Some(settings.clone());
        Ok(())
    }

    fn connect(&mut self, endpoint: &str) -> Result<(), SocketError> {
        self.attach(endpoint)
    }

    fn bind(&mut self, endpoint: &str) -> Result<(), SocketError> {
        self.attach(endpoint)
    }

    fn subscribe(&mut self, topic: &[u8]) -> Result<(), SocketError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(SocketError::Closed);
        }
        state.subscriptions.push(topic.to_vec());
        Ok(())
    }

    fn send_frames(&mut self, frames: &[Vec<u8>]) -> Result<(), SocketError> {
        let endpoints = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.closed {
                return Err(SocketError::Closed);
            }
            state.sent.push(frames.to_vec());
            state.endpoints.clone()
        };
        self.network.route(&endpoints, frames);
        Ok(())
    }

    fn recv_frames(&mut self, timeout: Duration) -> Result<Option<Vec<Vec<u8>>>, SocketError> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.closed {
                return Err(SocketError::Closed);
            }
            if let Some(frames) = state.inbound.pop_front() {
                return Ok(Some(frames));
            }
        }
        std::thread::sleep(timeout.min(EMPTY_RECV_SLEEP));
        Ok(None)
    }

    fn close(&mut self) -> Result<(), SocketError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(SocketError::Closed);
        }
        state.closed = true;
        state.close_calls += 1;
        if state.fail_close {
            return Err(SocketError::Other("mock close failure".into()));
        }
        Ok(())
    }
}

/// Read access to a mock socket's recorded state.
#[derive(Debug, Clone)]
pub struct MockSocketHandle {
    state: Arc<Mutex<MockSocketState>>,
}

impl MockSocketHandle {
    pub fn mode(&self) -> SocketMode {
        self.state.lock().expect("lock poisoned").mode
    }

    /// Endpoints successfully connected or bound.
    pub fn endpoints(&self) -> Vec<String> {
        self.state.lock().expect("lock poisoned").endpoints.clone()
    }

    pub fn subscriptions(&self) -> Vec<Vec<u8>> {
        self.state.lock().expect("lock poisoned").subscriptions.clone()
    }

    /// Every multipart message this socket sent.
    pub fn sent(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().expect("lock poisoned").sent.clone()
    }

    pub fn curve(&self) -> Option<CurveSettings> {
        self.state.lock().expect("lock poisoned").curve.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("lock poisoned").closed
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().expect("lock poisoned").close_calls
    }

    /// Queues a raw multipart message as if it had arrived from the network.
    pub fn inject(&self, frames: Vec<Vec<u8>>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .inbound
            .push_back(frames);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(topic: &str, body: &str) -> Vec<Vec<u8>> {
        vec![topic.as_bytes().to_vec(), body.as_bytes().to_vec()]
    }

    #[test]
    fn test_publisher_frames_reach_matching_subscriber_only() {
        // Arrange
        let net = MockNetwork::new();
        let mut publisher = net.create(SocketMode::Publisher).unwrap();
        publisher.bind("inproc://bus").unwrap();
        let mut test_sub = net.create(SocketMode::Subscriber).unwrap();
        test_sub.connect("inproc://bus").unwrap();
        test_sub.subscribe(b"test@").unwrap();
        let mut test2_sub = net.create(SocketMode::Subscriber).unwrap();
        test2_sub.connect("inproc://bus").unwrap();
        test2_sub.subscribe(b"test2@").unwrap();

        // Act
        publisher.send_frames(&frames("test2@", "1")).unwrap();

        // Assert
        let none = test_sub.recv_frames(Duration::ZERO).unwrap();
        let some = test2_sub.recv_frames(Duration::ZERO).unwrap();
        assert!(none.is_none(), "test@ must not match test2@");
        assert_eq!(some, Some(frames("test2@", "1")));
    }

    #[test]
    fn test_subscriber_on_other_endpoint_receives_nothing() {
        let net = MockNetwork::new();
        let mut publisher = net.create(SocketMode::Publisher).unwrap();
        publisher.bind("inproc://a").unwrap();
        let mut sub = net.create(SocketMode::Subscriber).unwrap();
        sub.connect("inproc://b").unwrap();
        sub.subscribe(b"").unwrap();

        publisher.send_frames(&frames("x@", "1")).unwrap();

        assert!(sub.recv_frames(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_injected_connect_failure_applies_to_indexed_socket() {
        let net = MockNetwork::new();
        net.fail_connect_for(1);
        let mut first = net.create(SocketMode::Subscriber).unwrap();
        let mut second = net.create(SocketMode::Subscriber).unwrap();

        assert!(first.connect("inproc://x").is_ok());
        assert!(matches!(second.connect("inproc://x"), Err(SocketError::Other(_))));
    }

    #[test]
    fn test_failing_close_still_marks_socket_closed() {
        let net = MockNetwork::new();
        let mut socket = net.create(SocketMode::Subscriber).unwrap();
        net.fail_close_for(0);

        assert!(socket.close().is_err());

        let handle = net.socket(0).unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_injected_frames_are_received_in_order() {
        let net = MockNetwork::new();
        let mut sub = net.create(SocketMode::Subscriber).unwrap();
        let handle = net.socket(0).unwrap();
        handle.inject(frames("a@", "1"));
        handle.inject(frames("a@", "2"));

        assert_eq!(sub.recv_frames(Duration::ZERO).unwrap(), Some(frames("a@", "1")));
        assert_eq!(sub.recv_frames(Duration::ZERO).unwrap(), Some(frames("a@", "2")));
    }
}
