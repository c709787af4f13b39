use std::path::Path;

use chrono::Utc;
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::persistence::{MessageRecord, MessageStore};
use crate::utils::{LinkError, Result};

const MESSAGES_TREE: &str = "messages";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    messages: Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let messages = db.open_tree(MESSAGES_TREE)?;
        Ok(Self { db, messages })
    }

    /// Drops every record whose message expired before now.
    pub fn remove_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let expired: Vec<_> = self
            .messages
            .iter()
            .filter_map(|res| res.ok())
            .filter_map(|(key, value)| {
                let record: MessageRecord = serde_json::from_slice(&value).ok()?;
                (record.header.expired_time > 0 && record.header.expired_time < now).then_some(key)
            })
            .collect();

        for key in &expired {
            self.messages.remove(key)?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "removed expired messages");
        }
        Ok(expired.len())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl MessageStore for SledStore {
    fn save(&self, record: &MessageRecord) -> Result<()> {
        self.messages
            .insert(record.message_id(), serde_json::to_vec(record)?)?;
        debug!(message_id = record.message_id(), "message saved");
        Ok(())
    }

    fn query(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        match self.messages.get(message_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn record_delivery(&self, message_id: &str, succeeded: &[String], failed: &[String]) -> Result<()> {
        let mut record = self
            .query(message_id)?
            .ok_or_else(|| LinkError::NotFound {
                message_id: message_id.to_string(),
            })?;

        for group in succeeded {
            if !record.succ_groups.contains(group) {
                record.succ_groups.push(group.clone());
            }
        }
        record.fail_groups = failed
            .iter()
            .filter(|group| !record.succ_groups.contains(*group))
            .cloned()
            .collect();
        record.deliver_count += 1;

        self.save(&record)
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("messages", &self.messages.len())
            .finish()
    }
}
