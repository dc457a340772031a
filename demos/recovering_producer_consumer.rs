//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "End-to-end demo: a producer and consumer survive a mid-stream broker disconnect."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use amqpr_common::{
    ClientConfig, ConsumerConfig, EndpointConfig, LoggingConfig, ProducerConfig,
    RecoveryPolicyConfig, RoutingType, Scheme, SendMode,
};
use amqpr_core::LogicalConnection;
use amqpr_transport::{InMemoryTransport, Message, MessageBody, Transport, TypedBody};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    amqpr_logging::init_tracing("recovering-producer-consumer-demo", &LoggingConfig::default())?;

    let transport = Arc::new(InMemoryTransport::new());
    let dyn_transport: Arc<dyn Transport> = transport.clone();

    let config = ClientConfig {
        endpoints: vec![EndpointConfig::new(Scheme::Amqp, "localhost", 5672, "guest", "guest")],
        recovery_policy: RecoveryPolicyConfig::Exponential {
            initial_delay_ms: 25,
            max_delay_ms: Some(500),
            retry_count: None,
            factor: 2.0,
            fast_first: true,
        },
        logging: LoggingConfig::default(),
    };
    let connection = LogicalConnection::start(config, dyn_transport)?;

    let producer = connection.open_producer(ProducerConfig {
        address: "orders".into(),
        routing_type: RoutingType::Queue,
        message_priority: None,
        time_to_live: None,
        send_mode: SendMode::AwaitCredit,
    });
    let consumer = connection.open_consumer(ConsumerConfig {
        address: "orders".into(),
        queue: None,
        routing_type: RoutingType::Queue,
        prefetch_count: 50,
        credit_refill_mode: Default::default(),
    });

    // Wait for both sides of the link to attach.
    tokio::time::sleep(Duration::from_millis(50)).await;

    producer
        .send(Message::new(MessageBody::String("order-1".into())), CancellationToken::new())
        .await?;
    let received = consumer.receive(CancellationToken::new()).await?;
    let body: String = received.get_body();
    println!("received before disconnect: {body}");
    consumer.accept(&received).await?;

    // Simulate the broker dropping the connection mid-stream.
    for live in transport.live_connections().await {
        live.simulate_peer_close(Some("amqp:connection:forced".into()));
    }
    println!("broker connection forced closed; waiting for recovery...");
    tokio::time::sleep(Duration::from_millis(200)).await;

    producer
        .send(Message::new(MessageBody::String("order-2-after-recovery".into())), CancellationToken::new())
        .await?;
    let received = consumer.receive(CancellationToken::new()).await?;
    let body: String = received.get_body();
    println!("received after recovery: {body}");
    consumer.accept(&received).await?;

    println!("reconnects observed: {}", connection.metrics().reconnect_count());
    connection.shutdown().await;
    Ok(())
}
