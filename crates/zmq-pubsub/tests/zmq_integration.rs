//! End-to-end tests over real libzmq sockets.
//!
//! # Slow joiners (for beginners)
//!
//! A ZeroMQ SUB socket's subscription travels to the PUB side asynchronously.
//! Messages published before it arrives are dropped, which is normal pub/sub
//! behaviour and not an error.  These tests therefore publish repeatedly until
//! the first message gets through, then check the payload.
//!
//! The CURVE test is skipped when the linked libzmq lacks CURVE support.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use zmq_pubsub::infrastructure::socket::zmq_socket::ZmqSocketFactory;
use zmq_pubsub::{ChannelServer, Connection, HandlerRegistry, KeyStore, ServerOptions};
use zmq_pubsub_core::{ConnectionOptions, CurveOptions};

const DEADLINE: Duration = Duration::from_secs(5);
const RESEND_EVERY: Duration = Duration::from_millis(50);

fn registry_for(channel: &str) -> (HandlerRegistry, UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = HandlerRegistry::new();
    registry
        .register_handler(channel, move |result| {
            if let Ok(value) = result {
                let _ = tx.send(value);
            }
        })
        .unwrap();
    (registry, rx)
}

/// Publishes `payload` on `channel` until the handler reports it.
async fn publish_until_received(
    publisher: &Connection,
    channel: &str,
    payload: &Value,
    rx: &mut UnboundedReceiver<Value>,
) -> Value {
    let started = Instant::now();
    loop {
        publisher.send(channel, payload).unwrap();
        if let Ok(Some(value)) = tokio::time::timeout(RESEND_EVERY, rx.recv()).await {
            return value;
        }
        assert!(started.elapsed() < DEADLINE, "nothing received on {channel} within {DEADLINE:?}");
    }
}

fn free_tcp_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("tcp://127.0.0.1:{port}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inproc_round_trip_through_channel_server() {
    // Arrange
    let factory = ZmqSocketFactory::new();
    let endpoint = "inproc://zmq-integration-round-trip";
    let mut publisher = Connection::new(&ConnectionOptions::publisher(endpoint), &factory).unwrap();
    publisher.bind().await.unwrap();
    let (registry, mut rx) = registry_for("test");
    let mut server =
        ChannelServer::new(ServerOptions::new(endpoint), registry, std::sync::Arc::new(factory.clone()))
            .unwrap();
    let mut ready = Vec::new();
    server
        .listen(|channel, result| ready.push((channel.to_string(), result.is_ok())))
        .await
        .unwrap();

    // Act
    let payload = json!({ "msg": "a", "n": [1, 2, 3] });
    let received = publish_until_received(&publisher, "test", &payload, &mut rx).await;

    // Assert
    assert_eq!(ready, vec![("test".to_string(), true)]);
    assert_eq!(received, payload);
    assert!(server.close().is_clean());
    publisher.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_prefix_channel_does_not_leak_into_longer_channel() {
    // Arrange
    let factory = ZmqSocketFactory::new();
    let endpoint = "inproc://zmq-integration-prefix";
    let mut publisher = Connection::new(&ConnectionOptions::publisher(endpoint), &factory).unwrap();
    publisher.bind().await.unwrap();
    let (registry, mut rx) = registry_for("test2");
    let mut server =
        ChannelServer::new(ServerOptions::new(endpoint), registry, std::sync::Arc::new(factory.clone()))
            .unwrap();
    server.listen(|_, _| {}).await.unwrap();

    // Act: once "test2" is known to flow, a "test" message must not arrive.
    publish_until_received(&publisher, "test2", &json!("warm-up"), &mut rx).await;
    publisher.send("test", &json!("wrong channel")).unwrap();
    publisher.send("test2", &json!("right channel")).unwrap();

    // Assert: late warm-ups may still arrive first.
    loop {
        let next = tokio::time::timeout(DEADLINE, rx.recv()).await.unwrap().unwrap();
        assert_ne!(next, json!("wrong channel"));
        if next == json!("right channel") {
            break;
        }
    }
    server.close();
    publisher.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_curve_encrypted_round_trip_with_generated_keys() {
    if !ZmqSocketFactory::curve_supported() {
        return;
    }

    // Arrange: the binding publisher is the CURVE server; the subscribers pin
    // its public key.  Both sides generate their own keys on first use.
    let server_keys = tempfile::tempdir().unwrap();
    let client_keys = tempfile::tempdir().unwrap();
    let server_public = KeyStore::open(Some(server_keys.path()))
        .unwrap()
        .load_or_create_key_pair()
        .unwrap()
        .public_key()
        .to_string();

    let endpoint = free_tcp_endpoint();
    let factory = ZmqSocketFactory::new();
    let publisher_options = ConnectionOptions::publisher(endpoint.clone()).with_curve(CurveOptions {
        server: true,
        path: Some(server_keys.path().to_path_buf()),
        ..CurveOptions::default()
    });
    let mut publisher = Connection::new(&publisher_options, &factory).unwrap();
    publisher.bind().await.unwrap();

    let (registry, mut rx) = registry_for("secure");
    let server_options = ServerOptions::new(endpoint).with_curve(CurveOptions {
        server_key: Some(server_public),
        path: Some(client_keys.path().to_path_buf()),
        ..CurveOptions::default()
    });
    let mut server =
        ChannelServer::new(server_options, registry, std::sync::Arc::new(factory.clone())).unwrap();
    server.listen(|_, _| {}).await.unwrap();

    // Act
    let payload = json!({ "secret": "payload" });
    let received = publish_until_received(&publisher, "secure", &payload, &mut rx).await;

    // Assert
    assert_eq!(received, payload);
    assert!(client_keys.path().join("public_key.curve").exists());
    server.close();
    publisher.close().unwrap();
}
