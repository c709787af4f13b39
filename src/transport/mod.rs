//! The `transport` module is responsible for the byte-level conversation
//! with brokers.
//!
//! It defines the packet codec and message payloads used on the wire, and
//! implements the TCP session that reads and writes those packets
//! independently, correlating responses with pending requests.

pub mod message;
pub mod packet;
pub mod session;

#[cfg(test)]
mod tests;

pub use message::{Body, ConnAuthAck, ConnMeta, DeliverAck, Header, Message, marshal_message};
pub use packet::{CmdType, MAX_PACKET_LEN, Packet, PacketCodec};
pub use session::{Connector, PacketDispatcher, Session};
