//! Discovery service contract.
//!
//! Brokers register under `/brokerlink/server/{topic}` (children are broker
//! addresses). Clients announce topic interest under
//! `/brokerlink/pub/{topic}/{group}/{host}` and publish their bindings under
//! `/brokerlink/sub/{topic}/{group}-bind`. Watches fire `DiscoveryEvent`s on
//! the receivers handed out by `Discovery::subscribe`.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::binding::Binding;
use crate::utils::Result;

pub use memory::MemoryDiscovery;

pub const SERVER_ROOT: &str = "/brokerlink/server";
pub const PUB_ROOT: &str = "/brokerlink/pub";
pub const SUB_ROOT: &str = "/brokerlink/sub";

pub fn server_path(topic: &str) -> String {
    format!("{SERVER_ROOT}/{topic}")
}

pub fn pub_path(topic: &str, group_id: &str, host: &str) -> String {
    format!("{PUB_ROOT}/{topic}/{group_id}/{host}")
}

pub fn sub_path(topic: &str, group_id: &str) -> String {
    format!("{SUB_ROOT}/{topic}/{group_id}-bind")
}

/// Topic named by a broker server path, if `path` is one.
pub fn topic_of_server_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(SERVER_ROOT)?.strip_prefix('/')?;
    match rest.split('/').next() {
        Some(topic) if !topic.is_empty() => Some(topic),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Children of a watched node changed.
    NodeChanged { path: String, children: Vec<String> },
    /// Binding data stored at a node changed.
    DataChanged { path: String, bindings: Vec<Binding> },
}

#[async_trait]
pub trait Discovery: Send + Sync {
    async fn publish_topics(&self, topics: &[String], group_id: &str, host: &str) -> Result<()>;

    /// Current brokers serving `topic`; later membership changes are
    /// reported as `NodeChanged` events.
    async fn brokers_and_watch(&self, topic: &str) -> Result<Vec<String>>;

    async fn publish_bindings(&self, group_id: &str, bindings: &[Binding]) -> Result<()>;

    fn subscribe(&self) -> mpsc::UnboundedReceiver<DiscoveryEvent>;

    async fn close(&self);
}
