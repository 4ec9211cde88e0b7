//! End-to-end tests against an in-process collector.
//!
//! These exercise the client facade over real sockets: event round trips,
//! queries, rejection handling, close and reconnect behaviour, batching,
//! write backpressure, UDP and TLS.

mod common;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, init_tracing, MockCollector, TlsIdentity, UdpReceiver};
use riemann_client::{
    Awaitable, BatchConfig, Error, Event, EventBuilder, Msg, Query, Resolver, Result,
    RiemannClient, TcpConfig, TcpTransport, UdpConfig,
};
use riemann_client::{AsyncSender, Connectable};

const WAIT: Duration = Duration::from_secs(5);

fn tcp_config(port: u16) -> TcpConfig {
    TcpConfig {
        reconnect_delay_ms: 200,
        connect_timeout_ms: 2000,
        ..TcpConfig::new("127.0.0.1", port)
    }
}

fn connected_client(collector: &MockCollector) -> RiemannClient {
    let client = RiemannClient::tcp(tcp_config(collector.port())).expect("client");
    client.connect().expect("connect");
    client
}

#[test]
fn test_event_round_trip_preserves_fields() {
    init_tracing();
    let collector = MockCollector::acking();
    let client = connected_client(&collector);

    let expected = EventBuilder::new()
        .host("web-3")
        .service("http req latency")
        .state("warning")
        .description("p99 over budget")
        .metric(231i64)
        .tags(["http", "latency"])
        .attribute("region", "eu-west")
        .attribute("tier", "frontend")
        .ttl(60.0)
        .time_secs(1_700_000_000)
        .build();
    let response = client.send_event(expected.clone()).wait().expect("ack");
    assert_eq!(response.ok, Some(true));

    let received = collector.wait_for(1, WAIT);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].events, vec![expected]);
    client.close();
}

#[test]
fn test_builder_send_uses_client() {
    let collector = MockCollector::acking();
    let client = connected_client(&collector);
    client
        .event()
        .service("builder")
        .metric(1.5f64)
        .send()
        .wait()
        .expect("ack");
    let received = collector.wait_for(1, WAIT);
    assert_eq!(received[0].events[0].metric_d, Some(1.5));
}

#[test]
fn test_query_string_passes_through() {
    let collector = MockCollector::start(|msg| {
        Some(Msg {
            ok: Some(true),
            query: msg.query.clone(),
            ..Default::default()
        })
    });
    let client = connected_client(&collector);

    let expression = "host = \"x\"";
    let response = client.query_message(expression).wait().expect("query");
    assert_eq!(
        response.query,
        Some(Query {
            string: Some(expression.to_string())
        })
    );
}

#[test]
fn test_query_returns_matching_events() {
    let collector = MockCollector::start(|_| {
        Some(Msg {
            ok: Some(true),
            events: vec![Event {
                host: Some("x".into()),
                service: Some("load".into()),
                ..Default::default()
            }],
            ..Default::default()
        })
    });
    let client = connected_client(&collector);
    let events = client.query("host = \"x\"").wait().expect("query");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].service.as_deref(), Some("load"));
}

#[test]
fn test_server_rejection_surfaces_reason() {
    let collector = MockCollector::start(|_| Some(Msg::rejection("no such stream")));
    let client = connected_client(&collector);
    let err = client
        .send_event(Event::default())
        .wait()
        .expect_err("rejected");
    match err {
        Error::ServerRejected(reason) => assert_eq!(reason, "no such stream"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_close_resolves_every_outstanding_promise() {
    let collector = MockCollector::silent();
    let client = connected_client(&collector);

    let responses: Vec<_> = (0..100)
        .map(|n| {
            client.send_event(Event {
                metric_sint64: Some(n),
                ..Default::default()
            })
        })
        .collect();
    client.close();

    for response in responses {
        let outcome = response
            .wait_timeout(WAIT)
            .expect_err("closed before any response");
        assert!(outcome.is_connection_error(), "{outcome}");
    }
    assert!(!client.is_connected());
}

#[test]
fn test_lost_channel_fails_sends_until_reconnected() {
    init_tracing();
    let collector = MockCollector::acking();
    let client = RiemannClient::tcp(TcpConfig {
        reconnect_delay_ms: 300,
        ..tcp_config(collector.port())
    })
    .expect("client");
    client.connect().expect("connect");
    client.send_event(Event::default()).wait().expect("first send");

    collector.drop_connections();
    assert!(eventually(WAIT, || !client.is_connected()));

    let before = client.send_event(Event::default()).wait();
    assert!(
        matches!(&before, Err(e) if e.is_connection_error()),
        "{before:?}"
    );

    assert!(eventually(WAIT, || client.is_connected()));
    assert!(collector.accepted() >= 2);
    let after = client.send_event(Event::default()).wait().expect("after reconnect");
    assert!(after.is_ok());
}

#[test]
fn test_explicit_reconnect() {
    let collector = MockCollector::acking();
    let client = connected_client(&collector);
    client.reconnect().expect("reconnect");
    assert!(client.is_connected());
    assert!(eventually(WAIT, || collector.accepted() == 2));
    client.send_event(Event::default()).wait().expect("ack");
}

#[test]
fn test_connect_failure_keeps_retrying() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = listener.local_addr().expect("address").port();
    drop(listener);

    let transport = TcpTransport::new(TcpConfig {
        reconnect_delay_ms: 100,
        ..tcp_config(port)
    })
    .expect("transport");
    let err = transport.connect().expect_err("nothing listening");
    assert!(err.is_connection_error());
    assert!(!transport.is_connected());

    // Start listening on the same port; the background reconnect finds it.
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(_) => return,
    };
    std::thread::spawn(move || {
        let _held: Vec<_> = listener.incoming().take(1).collect();
        std::thread::sleep(Duration::from_secs(10));
    });
    assert!(eventually(WAIT, || transport.is_connected()));
    transport.close();
}

#[test]
fn test_write_limit_rejects_when_full() {
    // A collector that accepts and never reads keeps the first write in flight.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("address").port();
    std::thread::spawn(move || {
        let _held: Vec<_> = listener.incoming().take(1).collect();
        std::thread::sleep(Duration::from_secs(30));
    });

    let transport = TcpTransport::new(TcpConfig {
        write_limit: 1,
        write_timeout_ms: 60_000,
        ..tcp_config(port)
    })
    .expect("transport");
    transport.connect().expect("connect");

    let huge = Msg::with_events(vec![Event {
        description: Some("x".repeat(32 * 1024 * 1024)),
        ..Default::default()
    }]);
    let stuck = transport.send_async(huge);
    assert!(eventually(WAIT, || transport.outstanding_writes() == 1));

    let refused = transport.send_async(Msg::with_events(vec![Event::default()]));
    assert!(refused.is_realized());
    let err = refused.wait().expect_err("over the limit");
    assert!(err.is_overloaded());
    assert!(!err.is_connection_error());

    transport.close();
    assert!(stuck.wait_timeout(WAIT).is_err());
}

#[test]
fn test_batches_partition_in_enqueue_order() {
    let collector = MockCollector::acking();
    let client = connected_client(&collector)
        .batched(&BatchConfig::new(4))
        .expect("batched");

    let promises: Vec<_> = (0..14)
        .map(|n| {
            client.send_event(Event {
                metric_sint64: Some(n),
                ..Default::default()
            })
        })
        .collect();
    client.flush().expect("flush");
    for promise in promises {
        assert!(promise.wait_timeout(WAIT).expect("ack").is_some());
    }

    let received = collector.wait_for(4, WAIT);
    let sizes: Vec<usize> = received.iter().map(|m| m.events.len()).collect();
    assert_eq!(sizes, vec![4, 4, 4, 2]);
    let order: Vec<i64> = received
        .iter()
        .flat_map(|m| m.events.iter().filter_map(|e| e.metric_sint64))
        .collect();
    assert_eq!(order, (0..14).collect::<Vec<_>>());
}

#[test]
fn test_rejected_batch_fails_every_event() {
    let collector = MockCollector::start(|_| Some(Msg::rejection("batch refused")));
    let client = connected_client(&collector)
        .batched(&BatchConfig::new(3))
        .expect("batched");

    let promises: Vec<_> = (0..3).map(|_| client.send_event(Event::default())).collect();
    for promise in promises {
        assert!(matches!(
            promise.wait(),
            Err(Error::ServerRejected(ref reason)) if reason == "batch refused"
        ));
    }
    assert_eq!(collector.wait_for(1, WAIT).len(), 1);
}

#[test]
fn test_udp_send_and_size_cap() {
    let receiver = UdpReceiver::bind();
    let client = RiemannClient::udp(UdpConfig {
        max_size: 1024,
        ..UdpConfig::new("127.0.0.1", receiver.port())
    });
    client.connect().expect("connect");

    let response = client
        .event()
        .service("udp")
        .metric(3i64)
        .send()
        .wait()
        .expect("sent");
    assert_eq!(response.ok, None);
    let datagram = receiver.recv().expect("datagram");
    assert_eq!(datagram.events[0].service.as_deref(), Some("udp"));

    let too_large = client
        .event()
        .description("z".repeat(4096))
        .send()
        .wait();
    assert!(matches!(too_large, Err(Error::MessageTooLarge { .. })));
    assert!(matches!(
        client.query("true").wait(),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_tls_round_trip() {
    init_tracing();
    let identity = TlsIdentity::localhost();
    let collector = MockCollector::tls(&identity);
    let addr: SocketAddr = collector.addr();
    let resolver: Arc<dyn Resolver> = Arc::new(move |_: &str, port: u16| -> Result<SocketAddr> {
        Ok(SocketAddr::new(addr.ip(), port))
    });

    let client = RiemannClient::tcp_with_resolver(
        TcpConfig {
            host: "localhost".to_string(),
            tls: Some(identity.client_config()),
            ..tcp_config(collector.port())
        },
        resolver,
    )
    .expect("client");
    client.connect().expect("TLS connect");
    client
        .event()
        .service("over tls")
        .send()
        .wait()
        .expect("ack over TLS");
    assert_eq!(collector.wait_for(1, WAIT).len(), 1);
}
