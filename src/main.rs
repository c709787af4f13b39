use std::process;
use std::sync::Arc;

use brokerlink::client::{MessageListener, TopicRouteManager};
use brokerlink::config::load_config;
use brokerlink::discovery::MemoryDiscovery;
use brokerlink::transport::{Body, Message};
use brokerlink::utils::logging;
use tracing::{error, info};

struct LoggingListener;

impl MessageListener for LoggingListener {
    fn on_message(&self, message: &Message) -> bool {
        let size = match &message.body {
            Body::Bytes(data) => data.len(),
            Body::Text(text) => text.len(),
        };
        info!(
            message_id = %message.header.message_id,
            topic = %message.header.topic,
            message_type = %message.header.message_type,
            size,
            "message received"
        );
        true
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            process::exit(1);
        }
    };
    logging::init(&settings.log.level);

    let discovery = Arc::new(MemoryDiscovery::with_brokers(
        settings.discovery.brokers.clone(),
    ));
    let manager = TopicRouteManager::new(&settings, discovery, Arc::new(LoggingListener));
    manager.set_publish_topics(settings.client.publish_topics.iter().cloned());

    if let Err(e) = manager.start().await {
        error!(error = %e, "client failed to start");
        manager.destroy().await;
        process::exit(1);
    }
    info!(
        group_id = %settings.client.group_id,
        host_id = %settings.client.host_id,
        "brokerlink client running"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    manager.destroy().await;
}
