//! The `persistence` module stores messages awaiting delivery.
//!
//! A `MessageRecord` carries the message together with its delivery
//! bookkeeping: which groups already acknowledged it, which failed on the
//! last attempt, and how many attempts were made. The broker-side delivery
//! handlers read records through the `MessageStore` trait.
//!
//! `SledStore` backs the trait with an embedded `sled` tree.

pub mod sled_store;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::transport::{Body, Header, Message};
use crate::utils::Result;

pub use sled_store::SledStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub header: Header,
    pub body: Body,
    pub succ_groups: Vec<String>,
    pub fail_groups: Vec<String>,
    pub deliver_limit: u32,
    pub deliver_count: u32,
    pub created_time: i64,
}

impl MessageRecord {
    pub fn new(message: Message) -> Self {
        let deliver_limit = message.header.deliver_limit;
        Self {
            header: message.header,
            body: message.body,
            succ_groups: Vec::new(),
            fail_groups: Vec::new(),
            deliver_limit,
            deliver_count: 0,
            created_time: Utc::now().timestamp(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.header.message_id
    }
}

pub trait MessageStore: Send + Sync {
    fn save(&self, record: &MessageRecord) -> Result<()>;

    fn query(&self, message_id: &str) -> Result<Option<MessageRecord>>;

    /// Folds one delivery attempt into the record: `succeeded` groups join
    /// the acknowledged set, `failed` replaces the failed set and the attempt
    /// counter grows by one.
    fn record_delivery(&self, message_id: &str, succeeded: &[String], failed: &[String]) -> Result<()>;
}
