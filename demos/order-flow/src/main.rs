//! Order Flow - end-to-end Courier demo
//!
//! Wires every piece of the messaging layer against the in-memory transport:
//!
//! - a domain publisher emits `OrderPlaced`
//! - a supervised domain consumer reserves stock and publishes
//!   `OrderConfirmed` / `OrderRejected` on the integration family
//! - a supervised integration consumer "notifies" the customer
//! - the admin router exposes restart/stop for both consumers
//!
//! Run with: `cargo run -p order-flow`
//!
//! ```text
//! curl localhost:8080/admin/consumers
//! curl -X POST localhost:8080/admin/consumers/domain/restart
//! curl localhost:8080/metrics
//! ```

mod events;
mod handlers;

use axum::routing::get;
use courier_core::cancellation::CancellationSignal;
use courier_core::message::{DomainMessage, IntegrationMessage, MessageFamily, Payload};
use courier_core::publisher::ExternalPublisher;
use courier_runtime::metrics::describe_metrics;
use courier_runtime::{
    ConsumerManager, ConsumerSupervisor, Dispatcher, HandlerRegistry, Host, MessagingConfig, Publisher,
    RetryingPublisher, TransportConsumer, wait_for_signal,
};
use courier_testing::InMemoryTransport;
use courier_web::{AdminState, admin_router};
use events::{OrderConfirmed, OrderPlaced, OrderRejected};
use handlers::{NotifyCustomer, ReserveStock};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    let mut config = MessagingConfig::from_env()?;
    config.domain_queue.get_or_insert_with(|| "orders.domain".to_string());
    config.integration_queue.get_or_insert_with(|| "orders.integration".to_string());
    let config = Arc::new(config);

    let transport = Arc::new(
        InMemoryTransport::new()
            .route(MessageFamily::Domain, config.queue_name(MessageFamily::Domain)?)
            .route(MessageFamily::Integration, config.queue_name(MessageFamily::Integration)?),
    );

    let mapper = Arc::new(events::mapper());
    let outbound: Arc<dyn ExternalPublisher> = Arc::new(RetryingPublisher::new(
        Arc::clone(&transport),
        config.publish_retry.clone(),
    ));
    let orders = Publisher::domain(Arc::clone(&mapper), Arc::clone(&outbound));
    let announcements = Publisher::integration(mapper, outbound);

    let domain_handlers = HandlerRegistry::builder()
        .register::<DomainMessage<OrderPlaced>, _>(ReserveStock::new([("widget", 5), ("gadget", 1)], announcements))
        .build();
    let notify = Arc::new(NotifyCustomer);
    let integration_handlers = HandlerRegistry::builder()
        .register_shared::<IntegrationMessage<OrderConfirmed>, _>(Arc::clone(&notify))
        .register_shared::<IntegrationMessage<OrderRejected>, _>(notify)
        .build();

    let domain_supervisor = supervise(
        "order-processing",
        MessageFamily::Domain,
        domain_handlers,
        &config,
        &transport,
    );
    let integration_supervisor = supervise(
        "customer-notifications",
        MessageFamily::Integration,
        integration_handlers,
        &config,
        &transport,
    );

    let mut host = Host::new(config.shutdown_timeout());
    host.register(domain_supervisor.clone());
    host.register(integration_supervisor.clone());
    host.start().await?;

    // Admin surface
    let state = AdminState::new()
        .with_supervisor(domain_supervisor)
        .with_supervisor(integration_supervisor);
    let app = admin_router(state).route(
        "/metrics",
        get(move || {
            let prometheus = prometheus.clone();
            async move { prometheus.render() }
        }),
    );
    let addr = std::env::var("ORDER_FLOW_ADMIN_ADDR").unwrap_or_else(|_| DEFAULT_ADMIN_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Admin endpoints listening");

    let shutdown = CancellationSignal::new();
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    place_demo_orders(&orders).await?;

    info!("Press Ctrl+C to stop");
    wait_for_signal().await;

    shutdown.cancel();
    if let Err(errors) = host.stop().await {
        for (service, error) in errors {
            error!(service = %service, error = %error, "Service did not stop cleanly");
        }
    }
    server.await??;

    info!("Order flow stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_flow=info,courier_runtime=info,courier_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the supervised consumer for one family.
fn supervise(
    name: &str,
    family: MessageFamily,
    handlers: HandlerRegistry,
    config: &Arc<MessagingConfig>,
    transport: &Arc<InMemoryTransport>,
) -> Arc<ConsumerSupervisor> {
    for (envelope, count) in handlers.summary() {
        info!(consumer = name, envelope = %envelope, handlers = count, "Handlers registered");
    }

    let dispatcher = Dispatcher::new(Arc::new(handlers)).with_strategy(config.dispatch_strategy);
    let consumer = TransportConsumer::new(name, family, Arc::clone(config), transport.clone(), dispatcher);
    let manager = Arc::new(ConsumerManager::new(name, family));
    let supervisor =
        ConsumerSupervisor::new(Arc::new(consumer), manager).with_retry_policy(config.supervisor_retry.clone());

    Arc::new(supervisor)
}

async fn place_demo_orders(orders: &Publisher) -> anyhow::Result<()> {
    orders
        .publish(
            OrderPlaced {
                order_id: 1,
                sku: "widget".to_string(),
                quantity: 2,
            },
            None,
            None,
            None,
        )
        .await?;

    // One checkout, two orders: both share the generated correlation id.
    let checkout: Vec<Box<dyn Payload>> = vec![
        Box::new(OrderPlaced {
            order_id: 2,
            sku: "gadget".to_string(),
            quantity: 3,
        }),
        Box::new(OrderPlaced {
            order_id: 3,
            sku: "widget".to_string(),
            quantity: 1,
        }),
    ];
    orders.publish_many(checkout, None, Some("checkout"), None).await?;

    info!("Demo orders published");
    Ok(())
}
