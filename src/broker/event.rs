use crate::transport::Packet;

/// One delivery attempt of a stored message.
///
/// Created from the message id alone; the deliver-pre handler fills in the
/// rest from the store and computes the target groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverEvent {
    pub message_id: String,
    pub topic: String,
    pub message_type: String,
    pub expired_time: i64,
    pub succ_groups: Vec<String>,
    pub fail_groups: Vec<String>,
    pub deliver_limit: u32,
    pub deliver_count: u32,
    pub deliver_groups: Vec<String>,
    pub packet: Option<Packet>,
}

impl DeliverEvent {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ..Default::default()
        }
    }
}
