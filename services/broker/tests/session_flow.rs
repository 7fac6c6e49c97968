//! End-to-end session tests over a real TCP listener.
//!
//! Each test boots an ephemeral broker, drives it through `courier-client`,
//! and asserts on the wire-visible behaviour: ack/error envelopes, event
//! delivery, replay, and cleanup semantics.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use broker::auth::PrincipalAuth;
use broker::directory::SessionDirectory;
use broker::server;
use broker::session::SessionContext;
use courier_broker::{Config, Registry};
use courier_client::{Client, Event};
use courier_common::Draft;
use courier_transport::{TcpServer, TransportConfig};
use courier_wire::{ErrorCode, Request, Response};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct TestBroker {
    addr: SocketAddr,
    registry: Arc<Registry>,
    directory: Arc<SessionDirectory>,
    _accept: JoinHandle<()>,
}

async fn start_broker(config: Config) -> TestBroker {
    let registry = Arc::new(Registry::new(config));
    registry.start();
    let directory = Arc::new(SessionDirectory::new());
    let server = TcpServer::bind(
        "127.0.0.1:0".parse().expect("addr"),
        TransportConfig::default(),
    )
    .await
    .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let ctx = SessionContext {
        registry: Arc::clone(&registry),
        directory: Arc::clone(&directory),
        auth: PrincipalAuth::new(),
        max_frame_bytes: 1024 * 1024,
        outbound_queue_depth: 256,
    };
    let accept = tokio::spawn(async move {
        let _ = server::serve(server, ctx).await;
    });
    TestBroker {
        addr,
        registry,
        directory,
        _accept: accept,
    }
}

async fn next_event(client: &mut Client) -> Event {
    timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("event within deadline")
        .expect("connection open")
}

async fn expect_no_event(client: &mut Client) {
    let quiet = timeout(Duration::from_millis(200), client.next_event()).await;
    assert!(quiet.is_err(), "expected no event, got {quiet:?}");
}

#[tokio::test]
async fn create_subscribe_publish_receive() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("orders").await.expect("create");

    let mut subscriber = Client::connect(broker.addr, "c1").await.expect("connect c1");
    subscriber.subscribe("orders", 0).await.expect("subscribe");

    let mut publisher = Client::connect(broker.addr, "p1").await.expect("connect p1");
    publisher
        .publish("orders", Draft::new("m1", json!({"x": 1})))
        .await
        .expect("publish");

    let event = next_event(&mut subscriber).await;
    assert_eq!(event.topic, "orders");
    assert_eq!(event.message.id, "m1");
    assert_eq!(event.message.topic, "orders");
    assert_eq!(event.message.payload, json!({"x": 1}));
}

#[tokio::test]
async fn publish_with_empty_id_is_rejected_at_the_wire() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("orders").await.expect("create");

    let mut client = Client::connect(broker.addr, "c1").await.expect("connect");
    let response = client
        .request(Request::Publish {
            topic: "orders".to_string(),
            message: Draft::new("", json!({"x": 1})),
            request_id: None,
        })
        .await
        .expect("request");
    match response {
        Response::Error { error, .. } => {
            assert_eq!(error.code, ErrorCode::BadRequest);
            assert!(error.message.contains("message.id"));
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_delivers_last_n_in_order() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");
    for i in 1..=5 {
        broker
            .registry
            .publish("t", Draft::new(i.to_string(), json!(null)))
            .await
            .expect("publish");
    }

    let mut client = Client::connect(broker.addr, "c2").await.expect("connect");
    client.subscribe("t", 3).await.expect("subscribe");
    for expected in ["3", "4", "5"] {
        assert_eq!(next_event(&mut client).await.message.id, expected);
    }
    expect_no_event(&mut client).await;
}

#[tokio::test]
async fn ring_drops_oldest_before_replay() {
    let config = Config::default()
        .with_ring_buffer_size(3)
        .expect("ring capacity");
    let broker = start_broker(config).await;
    broker.registry.create_topic("t").await.expect("create");
    for i in 1..=5 {
        broker
            .registry
            .publish("t", Draft::new(i.to_string(), json!(null)))
            .await
            .expect("publish");
    }

    let mut client = Client::connect(broker.addr, "c1").await.expect("connect");
    client.subscribe("t", 10).await.expect("subscribe");
    for expected in ["3", "4", "5"] {
        assert_eq!(next_event(&mut client).await.message.id, expected);
    }
    expect_no_event(&mut client).await;
}

#[tokio::test]
async fn publisher_is_acked_even_with_idle_subscriber() {
    let config = Config::default()
        .with_channel_buffer_size(2)
        .expect("queue capacity");
    let broker = start_broker(config).await;
    broker.registry.create_topic("t").await.expect("create");

    let mut idle = Client::connect(broker.addr, "c3").await.expect("connect c3");
    idle.subscribe("t", 0).await.expect("subscribe idle");
    let mut active = Client::connect(broker.addr, "c4").await.expect("connect c4");
    active.subscribe("t", 0).await.expect("subscribe active");

    let mut publisher = Client::connect(broker.addr, "p1").await.expect("connect p1");
    for i in 1..=5 {
        timeout(
            Duration::from_millis(500),
            publisher.publish("t", Draft::new(i.to_string(), json!(null))),
        )
        .await
        .expect("publish must not block on a slow consumer")
        .expect("publish acked");
    }

    for i in 1..=5 {
        assert_eq!(next_event(&mut active).await.message.id, i.to_string());
    }
}

#[tokio::test]
async fn delete_topic_disconnects_and_later_publishes_fail() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");

    let mut client = Client::connect(broker.addr, "c4").await.expect("connect");
    client.subscribe("t", 0).await.expect("subscribe");

    broker.registry.delete_topic("t").await.expect("delete");

    let response = client
        .request(Request::Publish {
            topic: "t".to_string(),
            message: Draft::new("m1", json!(null)),
            request_id: None,
        })
        .await
        .expect("request");
    match response {
        Response::Error { error, .. } => assert_eq!(error.code, ErrorCode::TopicNotFound),
        other => panic!("expected error, got {other:?}"),
    }

    // The session dropped its dead subscription, so a fresh topic with the
    // same name accepts this client again.
    broker.registry.create_topic("t").await.expect("recreate");
    client.subscribe("t", 0).await.expect("resubscribe");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");

    let mut client = Client::connect(broker.addr, "c1").await.expect("connect");
    client.subscribe("t", 0).await.expect("subscribe");
    client.unsubscribe("t").await.expect("unsubscribe");

    broker
        .registry
        .publish("t", Draft::new("m1", json!(null)))
        .await
        .expect("publish");
    expect_no_event(&mut client).await;

    client.subscribe("t", 0).await.expect("resubscribe");
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");

    let mut first = Client::connect(broker.addr, "c5").await.expect("connect");
    first.subscribe("t", 0).await.expect("subscribe");
    drop(first);

    // Session teardown is asynchronous; retry until the registry slot frees.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut resubscribed = None;
    while resubscribed.is_none() {
        let mut again = Client::connect(broker.addr, "c5").await.expect("reconnect");
        if again.subscribe("t", 0).await.is_ok() {
            resubscribed = Some(again);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscription slot never released"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // The replacement session is live and delivering.
    let mut again = resubscribed.expect("resubscribed client");
    broker
        .registry
        .publish("t", Draft::new("m1", json!(null)))
        .await
        .expect("publish");
    assert_eq!(next_event(&mut again).await.message.id, "m1");
}

#[tokio::test]
async fn second_session_of_same_principal_collides_on_subscribe() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");

    let mut first = Client::connect(broker.addr, "c1").await.expect("connect a");
    first.subscribe("t", 0).await.expect("subscribe");

    let mut second = Client::connect(broker.addr, "c1").await.expect("connect b");
    let response = second
        .request(Request::Subscribe {
            topic: "t".to_string(),
            last_n: 0,
            request_id: None,
        })
        .await
        .expect("request");
    match response {
        Response::Error { error, .. } => {
            assert_eq!(error.code, ErrorCode::Internal);
            assert!(error.message.contains("already subscribed"));
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn ping_round_trips() {
    let broker = start_broker(Config::default()).await;
    let mut client = Client::connect(broker.addr, "c1").await.expect("connect");
    let ts = client.ping().await.expect("ping");
    assert!(ts <= chrono::Utc::now());
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let broker = start_broker(Config::default()).await;
    broker.registry.create_topic("t").await.expect("create");
    let mut client = Client::connect(broker.addr, "c1").await.expect("connect");
    client.subscribe("t", 0).await.expect("subscribe");

    broker.directory.shutdown_all().await;
    broker.registry.stop().await;

    // The session tears down and the event stream ends.
    let closed = timeout(Duration::from_secs(2), client.next_event())
        .await
        .expect("close within deadline");
    assert!(closed.is_none());
}
