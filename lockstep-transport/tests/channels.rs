//! Integration tests for framed channels over both network providers.

use std::time::Duration;

use lockstep_core::{ChannelListener, NetworkProvider, TimeProvider, TokioNetworkProvider, TokioTimeProvider};
use lockstep_transport::{connect_with_retry, Connection, MemoryNetwork, RetryPolicy, TransportError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[tokio::test]
async fn test_tcp_frame_exchange() {
    init_tracing();

    let network = TokioNetworkProvider::new();
    let listener = network.bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let server = async {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut conn = Connection::new(stream);
        let hello = conn.receive().await.expect("receive hello");
        conn.send(b"ack").await.expect("send ack");
        hello
    };
    let client = async {
        let stream = network.connect(&addr).await.expect("connect");
        let mut conn = Connection::new(stream);
        conn.send(b"hello from 3").await.expect("send hello");
        conn.receive().await.expect("receive ack")
    };

    let (hello, ack) = tokio::join!(server, client);
    assert_eq!(hello, b"hello from 3");
    assert_eq!(ack, b"ack");
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_gives_up() {
    init_tracing();

    let network = MemoryNetwork::new();
    let time = TokioTimeProvider::new();
    let policy = RetryPolicy::fixed(Duration::from_millis(100)).with_max_attempts(4);

    let result = connect_with_retry(&network, &time, "node-0:9000", &policy).await;

    match result {
        Err(TransportError::ConnectRetriesExhausted {
            address, attempts, ..
        }) => {
            assert_eq!(address, "node-0:9000");
            assert_eq!(attempts, 4);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("nothing listens on node-0:9000"),
    }
    // Three delays between four attempts.
    assert!(time.now() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_retry_succeeds_once_listener_appears() {
    init_tracing();

    let network = MemoryNetwork::new();
    let time = TokioTimeProvider::new();
    let policy = RetryPolicy::fixed(Duration::from_millis(5));

    let late_listener = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let listener = network.bind("node-0:9000").await.expect("bind");
        let (stream, _) = listener.accept().await.expect("accept");
        let mut conn = Connection::new(stream);
        conn.receive().await.expect("receive")
    };
    let initiator = async {
        let stream = connect_with_retry(&network, &time, "node-0:9000", &policy)
            .await
            .expect("eventually connects");
        let mut conn = Connection::new(stream);
        conn.send(b"late but fine").await.expect("send");
        conn
    };

    let (received, _conn) = tokio::join!(late_listener, initiator);
    assert_eq!(received, b"late but fine");
}
