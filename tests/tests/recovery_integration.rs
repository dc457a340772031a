//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "End-to-end recovery cycle exercised against the in-memory transport."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use amqpr_common::{
    ClientConfig, ConsumerConfig, EndpointConfig, ProducerConfig, RecoveryPolicyConfig,
    RoutingType, Scheme, SendMode,
};
use amqpr_core::{LogicalConnection, RecoverableState};
use amqpr_transport::{InMemoryTransport, Message, MessageBody, Transport, TypedBody};
use tokio_util::sync::CancellationToken;

fn config() -> ClientConfig {
    ClientConfig {
        endpoints: vec![EndpointConfig::new(Scheme::Amqp, "localhost", 5672, "guest", "guest")],
        recovery_policy: RecoveryPolicyConfig::Constant {
            delay_ms: 5,
            retry_count: None,
            fast_first: true,
        },
        logging: Default::default(),
    }
}

fn producer_config() -> ProducerConfig {
    ProducerConfig {
        address: "orders".into(),
        routing_type: RoutingType::Queue,
        message_priority: None,
        time_to_live: None,
        send_mode: SendMode::AwaitCredit,
    }
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        address: "orders".into(),
        queue: None,
        routing_type: RoutingType::Queue,
        prefetch_count: 10,
        credit_refill_mode: Default::default(),
    }
}

/// Scenario 6: peer close + recover. No message produced and acked before
/// the disconnect is redelivered; no message pending in the prefetch
/// buffer at disconnect is lost; both sides resume within `policy.delay(0)
/// + epsilon` of the broker reopening.
#[tokio::test(flavor = "multi_thread")]
async fn peer_close_then_recover_loses_nothing_in_flight() {
    let transport = Arc::new(InMemoryTransport::new());
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let connection = LogicalConnection::start(config(), dyn_transport).unwrap();

    let producer = connection.open_producer(producer_config());
    let consumer = connection.open_consumer(consumer_config());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(producer.state(), RecoverableState::Attached);
    assert_eq!(consumer.state(), RecoverableState::Attached);

    // Sent and acked before the disconnect: must not be redelivered.
    producer
        .send(Message::new(MessageBody::String("before-disconnect".into())), CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let delivered = consumer.receive(CancellationToken::new()).await.unwrap();
    consumer.accept(&delivered).await.unwrap();

    // Pending in the prefetch buffer at disconnect: must survive.
    producer
        .send(Message::new(MessageBody::String("pending-in-buffer".into())), CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Simulate the broker forcing the connection closed.
    for conn in transport.live_connections().await {
        conn.simulate_peer_close(Some("amqp:connection:forced".into()));
    }

    // Give the supervisor at most policy.delay(0) + epsilon to recover.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(producer.state(), RecoverableState::Attached);
    assert_eq!(consumer.state(), RecoverableState::Attached);

    let redelivered: String = consumer
        .receive(CancellationToken::new())
        .await
        .unwrap()
        .get_body();
    assert_eq!(redelivered, "pending-in-buffer");

    producer
        .send(Message::new(MessageBody::String("after-recover".into())), CancellationToken::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after: String = consumer
        .receive(CancellationToken::new())
        .await
        .unwrap()
        .get_body();
    assert_eq!(after, "after-recover");

    connection.shutdown().await;
}
