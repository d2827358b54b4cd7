//! End-to-end link behavior: outage detection, reconnection, exactly-once
//! delivery. In-memory duplex pairs stand in for TCP where the test needs
//! to sever and rebind transports deterministically.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use resilink_link::{Client, ClientConfig, Connection, LinkConfig, LinkError, Server, ServerConfig};

fn fast_link() -> LinkConfig {
    LinkConfig {
        timeout: Duration::from_millis(300),
        retry_delay: Duration::from_millis(50),
        ..LinkConfig::default()
    }
}

fn pair() -> (Connection, Connection) {
    let cfg = fast_link();
    (
        Connection::new("left", cfg.clone()),
        Connection::new("right", cfg),
    )
}

/// Bind a fresh in-memory transport between the two ends and wait for the
/// keepalives to bring both up.
async fn wire(a: &Connection, b: &Connection) {
    let (x, y) = tokio::io::duplex(4096);
    a.attach_transport(x).await;
    b.attach_transport(y).await;
    a.wait_up().await.unwrap();
    b.wait_up().await.unwrap();
}

/// Kill the link: bind `conn` to a transport whose peer is already gone.
/// Its old transport halves drop with the old session, so the other end
/// sees EOF and goes down too.
async fn sever(conn: &Connection) {
    let (x, y) = tokio::io::duplex(64);
    drop(y);
    conn.attach_transport(x).await;
}

async fn assert_no_line(conn: &Connection, wait: Duration) {
    let extra = tokio::time::timeout(wait, conn.readline()).await;
    assert!(extra.is_err(), "unexpected extra line: {extra:?}");
}

#[tokio::test]
async fn keepalives_keep_an_idle_link_up() {
    let (a, b) = pair();
    wire(&a, &b).await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(a.status());
    assert!(b.status());
    assert_eq!(a.connects(), 1);
    assert_eq!(b.connects(), 1);
}

#[tokio::test]
async fn payloads_flow_both_ways() {
    let (a, b) = pair();
    wire(&a, &b).await;

    a.write(b"from-a", false, true).await.unwrap();
    b.write(b"from-b", false, true).await.unwrap();
    assert_eq!(b.readline().await.unwrap(), "from-a");
    assert_eq!(a.readline().await.unwrap(), "from-b");
}

#[tokio::test]
async fn qos_write_during_outage_waits_for_reconnect() {
    let (a, b) = pair();
    wire(&a, &b).await;
    sever(&a).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!a.status());
    assert!(!b.status());

    let writer = {
        let a = a.clone();
        tokio::spawn(async move { a.write(b"persistent", true, true).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!writer.is_finished(), "write must block while the link is down");

    wire(&a, &b).await;
    writer.await.unwrap().unwrap();
    assert_eq!(b.readline().await.unwrap(), "persistent");
    assert_no_line(&b, Duration::from_millis(700)).await;
}

#[tokio::test]
async fn qos_survives_a_severed_transport_exactly_once() {
    let (a, b) = pair();
    wire(&a, &b).await;

    // Returns after the send; confirmation runs in the background.
    a.write(b"important", true, false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Outage inside the confirmation window forces a retransmission with
    // the same message ID once the link is back.
    sever(&a).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    wire(&a, &b).await;

    assert_eq!(b.readline().await.unwrap(), "important");
    assert_no_line(&b, Duration::from_millis(700)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ordered_qos_writes_survive_an_outage_in_order() {
    let (a, b) = pair();
    wire(&a, &b).await;

    let writer = {
        let a = a.clone();
        tokio::spawn(async move {
            for i in 0..5 {
                a.write(format!("m{i}"), true, true).await?;
            }
            Ok::<_, LinkError>(())
        })
    };

    tokio::time::sleep(Duration::from_millis(450)).await;
    sever(&a).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    wire(&a, &b).await;

    let received = tokio::time::timeout(Duration::from_secs(10), async {
        let mut lines = Vec::new();
        for _ in 0..5 {
            lines.push(b.readline().await.unwrap());
        }
        lines
    })
    .await
    .unwrap();
    assert_eq!(received, ["m0", "m1", "m2", "m3", "m4"]);
    writer.await.unwrap().unwrap();
    assert_no_line(&b, Duration::from_millis(700)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rapid_background_qos_writes_are_never_lost_or_duplicated() {
    let (a, b) = pair();
    wire(&a, &b).await;

    for i in 0..4 {
        a.write(format!("burst{i}"), true, false).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    sever(&a).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    wire(&a, &b).await;

    let mut received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut lines = Vec::new();
        for _ in 0..4 {
            lines.push(b.readline().await.unwrap());
        }
        lines
    })
    .await
    .unwrap();
    received.sort();
    assert_eq!(received, ["burst0", "burst1", "burst2", "burst3"]);
    assert_no_line(&b, Duration::from_millis(700)).await;
}

#[tokio::test]
async fn watchdog_tolerates_sub_timeout_gaps() {
    let a = Connection::new("watchdog", fast_link());
    let (x, y) = tokio::io::duplex(1024);
    a.attach_transport(x).await;
    let (mut peer_rx, mut peer_tx) = tokio::io::split(y);
    // Drain a's outbound frames so the pipe never backs up.
    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while peer_rx.read(&mut sink).await.map(|n| n > 0).unwrap_or(false) {}
    });

    peer_tx.write_all(b"\n").await.unwrap();
    a.wait_up().await.unwrap();
    assert_eq!(a.connects(), 1);

    // Silence shorter than the timeout is not an outage.
    tokio::time::sleep(Duration::from_millis(200)).await;
    peer_tx.write_all(b"\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(a.status());
    assert_eq!(a.connects(), 1);

    // A full window of silence is.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!a.status());
}

#[tokio::test]
async fn duplicate_envelopes_dropped_best_effort_passed_through() {
    let a = Connection::new("dedup", fast_link());
    let (x, y) = tokio::io::duplex(1024);
    a.attach_transport(x).await;
    let (mut peer_rx, mut peer_tx) = tokio::io::split(y);
    tokio::spawn(async move {
        let mut sink = [0u8; 256];
        while peer_rx.read(&mut sink).await.map(|n| n > 0).unwrap_or(false) {}
    });

    // A QoS retransmission carries the same ID and must be dropped.
    peer_tx.write_all(b"05once\n05once\n").await.unwrap();
    assert_eq!(a.readline().await.unwrap(), "once");
    assert_no_line(&a, Duration::from_millis(300)).await;

    // Best-effort frames carry ID 00 and are never deduplicated.
    peer_tx.write_all(b"00twice\n00twice\n").await.unwrap();
    assert_eq!(a.readline().await.unwrap(), "twice");
    assert_eq!(a.readline().await.unwrap(), "twice");
}

#[tokio::test]
async fn initial_connect_to_a_dead_server_is_fatal() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let cfg = ClientConfig::new("127.0.0.1", port, "nobody").with_link(fast_link());
    let err = Client::connect(cfg).await.unwrap_err();
    assert!(matches!(err, LinkError::InitialConnect { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn startup_barrier_waits_for_the_late_client() {
    let link = fast_link();
    let server = Server::bind(
        ServerConfig::new(0)
            .with_expected(["one", "two"])
            .with_link(link.clone()),
    )
    .await
    .unwrap();
    let port = server.local_addr().port();

    let registry = server.registry().clone();
    let barrier = tokio::spawn(async move { registry.wait_for_all(["one", "two"]).await });

    let c1 = Client::connect(ClientConfig::new("127.0.0.1", port, "one").with_link(link.clone()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!barrier.is_finished(), "barrier must hold for the missing client");

    let c2 = Client::connect(ClientConfig::new("127.0.0.1", port, "two").with_link(link.clone()))
        .await
        .unwrap();
    let conns = barrier.await.unwrap().unwrap();
    assert_eq!(conns.len(), 2);

    c1.write(b"ping", true, true).await.unwrap();
    let s1 = server.get_connection("one").await.unwrap();
    assert_eq!(s1.readline().await.unwrap(), "ping");
    s1.write(b"pong", true, true).await.unwrap();
    assert_eq!(c1.readline().await.unwrap(), "pong");

    server.close_all();
    c1.close();
    c2.close();
}

#[tokio::test]
async fn close_unblocks_a_pending_readline() {
    let (a, b) = pair();
    wire(&a, &b).await;

    let reader = {
        let b = b.clone();
        tokio::spawn(async move { b.readline().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    b.close();
    let result = reader.await.unwrap();
    assert!(matches!(result, Err(LinkError::Closed)));
    a.close();
}
