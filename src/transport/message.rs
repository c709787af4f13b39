use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::packet::{CmdType, Packet};
use crate::utils::{LinkError, Result};

/// Routing and delivery metadata carried by every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub message_id: String,
    pub topic: String,
    pub message_type: String,
    /// Unix seconds after which the message is no longer delivered.
    pub expired_time: i64,
    pub deliver_limit: u32,
    pub group_id: String,
    pub commit: bool,
}

/// The two payload kinds the platform understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
}

impl Body {
    pub fn command(&self) -> CmdType {
        match self {
            Body::Bytes(_) => CmdType::BytesMessage,
            Body::Text(_) => CmdType::StringMessage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    pub body: Body,
}

impl Message {
    pub const DEFAULT_DELIVER_LIMIT: u32 = 100;

    /// Builds a committed message with a fresh id that expires `ttl_secs`
    /// from now.
    pub fn new(topic: &str, message_type: &str, group_id: &str, ttl_secs: i64, body: Body) -> Self {
        Self {
            header: Header {
                message_id: Uuid::new_v4().simple().to_string(),
                topic: topic.to_string(),
                message_type: message_type.to_string(),
                expired_time: Utc::now().timestamp() + ttl_secs,
                deliver_limit: Self::DEFAULT_DELIVER_LIMIT,
                group_id: group_id.to_string(),
                commit: true,
            },
            body,
        }
    }

    pub fn text(topic: &str, message_type: &str, group_id: &str, ttl_secs: i64, text: &str) -> Self {
        Self::new(topic, message_type, group_id, ttl_secs, Body::Text(text.to_string()))
    }

    pub fn bytes(topic: &str, message_type: &str, group_id: &str, ttl_secs: i64, data: Vec<u8>) -> Self {
        Self::new(topic, message_type, group_id, ttl_secs, Body::Bytes(data))
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let data = marshal_message(&self.header, &self.body)?;
        Ok(Packet::new(self.body.command(), data))
    }
}

#[derive(Serialize)]
struct WireMessageRef<'a> {
    header: &'a Header,
    body: &'a Body,
}

/// Serializes header and body into the payload of a message packet.
pub fn marshal_message(header: &Header, body: &Body) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&WireMessageRef { header, body })?)
}

/// Decodes the payload of a `BytesMessage` or `StringMessage` packet.
pub fn unmarshal_message(packet: &Packet) -> Result<Message> {
    let message: Message = serde_json::from_slice(&packet.data)?;
    if message.body.command() != packet.cmd {
        return Err(LinkError::invalid_packet(format!(
            "{:?} packet carries a {:?} body",
            packet.cmd,
            message.body.command()
        )));
    }
    Ok(message)
}

/// Handshake request sent by a client on a fresh connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnMeta {
    pub group_id: String,
    pub secret_key: String,
}

/// Broker verdict on a `ConnMeta` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnAuthAck {
    pub status: bool,
    pub feedback: String,
}

/// Client verdict on a delivered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverAck {
    pub message_id: String,
    pub group_id: String,
    pub status: bool,
}
