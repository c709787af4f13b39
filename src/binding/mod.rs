//! Subscription bindings
//!
//! A `Binding` declares that a subscriber group wants messages of a given
//! type on a topic. Clients publish their bindings to discovery; the broker
//! side resolves delivery targets through a `BindingExchanger`.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Message type that matches every message on the topic.
pub const ANY_MESSAGE_TYPE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub topic: String,
    pub message_type: String,
    pub group_id: String,
    /// Opaque filter expression carried along with the binding.
    #[serde(default)]
    pub filter: String,
}

impl Binding {
    pub fn new(topic: &str, message_type: &str, group_id: &str) -> Self {
        Self {
            topic: topic.to_string(),
            message_type: message_type.to_string(),
            group_id: group_id.to_string(),
            filter: String::new(),
        }
    }

    /// Binds every message type on `topic`.
    pub fn wildcard(topic: &str, group_id: &str) -> Self {
        Self::new(topic, ANY_MESSAGE_TYPE, group_id)
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = filter.to_string();
        self
    }

    pub fn matches(&self, topic: &str, message_type: &str) -> bool {
        self.topic == topic
            && (self.message_type == ANY_MESSAGE_TYPE || self.message_type == message_type)
    }
}

pub trait BindingExchanger: Send + Sync {
    /// Bindings on `topic` matching `message_type`, minus those `exclude`
    /// rejects.
    fn find_bindings(
        &self,
        topic: &str,
        message_type: &str,
        exclude: &dyn Fn(&Binding) -> bool,
    ) -> Vec<Binding>;
}

/// Bindings indexed by topic, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryExchanger {
    topics: RwLock<HashMap<String, Vec<Binding>>>,
}

impl MemoryExchanger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `binding` unless the same group already holds an identical one.
    pub fn bind(&self, binding: Binding) {
        let mut topics = self.topics.write();
        let bindings = topics.entry(binding.topic.clone()).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
    }

    pub fn unbind(&self, topic: &str, group_id: &str) {
        let mut topics = self.topics.write();
        if let Some(bindings) = topics.get_mut(topic) {
            bindings.retain(|b| b.group_id != group_id);
            if bindings.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl BindingExchanger for MemoryExchanger {
    fn find_bindings(
        &self,
        topic: &str,
        message_type: &str,
        exclude: &dyn Fn(&Binding) -> bool,
    ) -> Vec<Binding> {
        self.topics
            .read()
            .get(topic)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|b| b.matches(topic, message_type) && !exclude(b))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
