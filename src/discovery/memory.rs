//! In-process discovery registry.
//!
//! Implements the `Discovery` contract against plain maps so a client can run
//! with a static broker list, and tests can drive membership changes with
//! `set_brokers`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::binding::Binding;
use crate::discovery::{Discovery, DiscoveryEvent, pub_path, server_path, sub_path};
use crate::utils::{LinkError, Result};

#[derive(Debug, Default)]
struct Registry {
    servers: HashMap<String, Vec<String>>,
    watched: HashSet<String>,
    publishers: BTreeSet<String>,
    /// serde_json-encoded binding lists keyed by sub path
    bindings: HashMap<String, Vec<u8>>,
    watchers: Vec<mpsc::UnboundedSender<DiscoveryEvent>>,
    closed: bool,
}

impl Registry {
    fn notify(&mut self, event: DiscoveryEvent) {
        self.watchers.retain(|w| w.send(event.clone()).is_ok());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(LinkError::discovery("registry closed"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryDiscovery {
    registry: RwLock<Registry>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry with a static topic → brokers table.
    pub fn with_brokers(brokers: HashMap<String, Vec<String>>) -> Self {
        let discovery = Self::new();
        discovery.registry.write().servers = brokers;
        discovery
    }

    /// Replaces the broker list of `topic`, firing a watch if one is set.
    pub fn set_brokers(&self, topic: &str, hosts: Vec<String>) {
        let mut registry = self.registry.write();
        registry.servers.insert(topic.to_string(), hosts.clone());
        if registry.watched.contains(topic) {
            debug!(topic, ?hosts, "broker membership changed");
            registry.notify(DiscoveryEvent::NodeChanged {
                path: server_path(topic),
                children: hosts,
            });
        }
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.registry.read().publishers.iter().cloned().collect()
    }

    pub fn bindings_at(&self, path: &str) -> Result<Vec<Binding>> {
        match self.registry.read().bindings.get(path) {
            Some(data) => Ok(serde_json::from_slice(data)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    async fn publish_topics(&self, topics: &[String], group_id: &str, host: &str) -> Result<()> {
        let mut registry = self.registry.write();
        registry.ensure_open()?;
        for topic in topics {
            registry.publishers.insert(pub_path(topic, group_id, host));
        }
        info!(group_id, host, ?topics, "published topic interest");
        Ok(())
    }

    async fn brokers_and_watch(&self, topic: &str) -> Result<Vec<String>> {
        let mut registry = self.registry.write();
        registry.ensure_open()?;
        registry.watched.insert(topic.to_string());
        Ok(registry.servers.get(topic).cloned().unwrap_or_default())
    }

    async fn publish_bindings(&self, group_id: &str, bindings: &[Binding]) -> Result<()> {
        let mut by_topic: BTreeMap<&str, Vec<Binding>> = BTreeMap::new();
        for binding in bindings {
            by_topic
                .entry(binding.topic.as_str())
                .or_default()
                .push(binding.clone());
        }

        let mut registry = self.registry.write();
        registry.ensure_open()?;
        for (topic, bindings) in by_topic {
            let path = sub_path(topic, group_id);
            registry
                .bindings
                .insert(path.clone(), serde_json::to_vec(&bindings)?);
            registry.notify(DiscoveryEvent::DataChanged { path, bindings });
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.write().watchers.push(tx);
        rx
    }

    async fn close(&self) {
        let mut registry = self.registry.write();
        registry.closed = true;
        // dropping the senders ends every watch loop
        registry.watchers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::topic_of_server_path;

    #[test]
    fn test_server_path_parsing() {
        assert_eq!(topic_of_server_path(&server_path("orders")), Some("orders"));
        assert_eq!(
            topic_of_server_path("/brokerlink/server/orders/127.0.0.1:13800"),
            Some("orders")
        );
        assert_eq!(topic_of_server_path("/brokerlink/server"), None);
        assert_eq!(topic_of_server_path("/brokerlink/server/"), None);
        assert_eq!(topic_of_server_path("/brokerlink/sub/orders"), None);
    }

    #[tokio::test]
    async fn test_watch_fires_only_for_watched_topics() {
        let discovery = MemoryDiscovery::new();
        let mut rx = discovery.subscribe();

        discovery.set_brokers("orders", vec!["a:1".to_string()]);
        assert!(rx.try_recv().is_err());

        let hosts = discovery.brokers_and_watch("orders").await.unwrap();
        assert_eq!(hosts, vec!["a:1"]);

        discovery.set_brokers("orders", vec!["b:2".to_string()]);
        assert_eq!(
            rx.try_recv().unwrap(),
            DiscoveryEvent::NodeChanged {
                path: server_path("orders"),
                children: vec!["b:2".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_publish_bindings_groups_by_topic() {
        let discovery = MemoryDiscovery::new();
        let bindings = vec![
            Binding::new("orders", "pay-succ", "s-mts"),
            Binding::wildcard("trade", "s-mts"),
        ];
        discovery.publish_bindings("s-mts", &bindings).await.unwrap();

        let stored = discovery.bindings_at(&sub_path("orders", "s-mts")).unwrap();
        assert_eq!(stored, vec![bindings[0].clone()]);
        assert!(discovery.bindings_at("/missing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_calls() {
        let discovery = MemoryDiscovery::new();
        discovery.close().await;
        assert!(discovery.brokers_and_watch("orders").await.is_err());
        assert!(
            discovery
                .publish_topics(&["orders".to_string()], "g", "h")
                .await
                .is_err()
        );
    }
}
