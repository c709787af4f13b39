//! The `error` module defines the error type shared by every layer of
//! `brokerlink`.
//!
//! Transport and handshake failures are usually local (a route rebuild skips
//! the address), while `NoRoute`, `NotFound` and `InvalidEventType` are
//! returned synchronously to the caller that triggered them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Address resolution or dial failure, or an I/O error on a live socket.
    #[error("transport error on {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial to {address} timed out after {timeout_ms}ms")]
    DialTimeout { address: String, timeout_ms: u64 },

    #[error("handshake rejected by {address}: {feedback}")]
    HandshakeRejected { address: String, feedback: String },

    #[error("request to {address} timed out after {timeout_ms}ms")]
    RequestTimeout { address: String, timeout_ms: u64 },

    #[error("connection to {address} is closed")]
    ConnectionClosed { address: String },

    #[error("no connection registered for {address}")]
    NoConnection { address: String },

    #[error("no route for topic '{topic}'")]
    NoRoute { topic: String },

    #[error("no valid broker for topics {}", topics.join(","))]
    NoValidBroker { topics: Vec<String> },

    #[error("message '{message_id}' not found")]
    NotFound { message_id: String },

    #[error("handler '{handler}' cannot process {event} events")]
    InvalidEventType { handler: String, event: &'static str },

    #[error("invalid packet: {reason}")]
    InvalidPacket { reason: String },

    /// I/O failure surfaced by the packet codec on an open session.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("discovery error: {message}")]
    Discovery { message: String },
}

impl LinkError {
    pub fn transport<S: Into<String>>(address: S, source: std::io::Error) -> Self {
        Self::Transport {
            address: address.into(),
            source,
        }
    }

    pub fn invalid_packet<S: Into<String>>(reason: S) -> Self {
        Self::InvalidPacket {
            reason: reason.into(),
        }
    }

    pub fn discovery<S: Into<String>>(message: S) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Errors a reconnection attempt may recover from by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Io(_)
                | Self::DialTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ConnectionClosed { .. }
        )
    }
}
