//! Wire packets and their framing.
//!
//! Layout: `opaque (u32 BE) | cmd (u8) | len (u32 BE) | data | "\r\n"`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::utils::{LinkError, Result};

pub const PACKET_HEAD_LEN: usize = 9;
pub const CRLF: [u8; 2] = [b'\r', b'\n'];
pub const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmdType {
    Heartbeat = 0x01,
    ConnMeta = 0x02,
    ConnAuthAck = 0x03,
    MessageStoreAck = 0x04,
    BytesMessage = 0x11,
    StringMessage = 0x12,
    DeliverAck = 0x13,
}

impl CmdType {
    /// Commands that may answer a pending request. They are routed back to
    /// the request waiting on the same opaque; with no such request they go
    /// to the pipeline like any other packet.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            CmdType::Heartbeat
                | CmdType::ConnAuthAck
                | CmdType::MessageStoreAck
                | CmdType::DeliverAck
        )
    }
}

impl TryFrom<u8> for CmdType {
    type Error = LinkError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(CmdType::Heartbeat),
            0x02 => Ok(CmdType::ConnMeta),
            0x03 => Ok(CmdType::ConnAuthAck),
            0x04 => Ok(CmdType::MessageStoreAck),
            0x11 => Ok(CmdType::BytesMessage),
            0x12 => Ok(CmdType::StringMessage),
            0x13 => Ok(CmdType::DeliverAck),
            other => Err(LinkError::invalid_packet(format!(
                "unknown command 0x{other:02x}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opaque: u32,
    pub cmd: CmdType,
    pub data: Vec<u8>,
}

impl Packet {
    /// Creates a packet whose opaque is assigned when it is written.
    pub fn new(cmd: CmdType, data: Vec<u8>) -> Self {
        Self {
            opaque: 0,
            cmd,
            data,
        }
    }

    /// Creates a response that answers the request carrying `opaque`.
    pub fn response(opaque: u32, cmd: CmdType, data: Vec<u8>) -> Self {
        Self { opaque, cmd, data }
    }
}

/// Frames packets on a broker socket.
///
/// Decoding only yields a packet once the fixed header, the declared body and
/// the terminator are all buffered. A bad terminator, an unknown command or
/// an oversized length is an error; the session reading the stream closes on
/// it instead of trying to resynchronise.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < PACKET_HEAD_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[5], src[6], src[7], src[8]]) as usize;
        if len > MAX_PACKET_LEN {
            return Err(LinkError::invalid_packet(format!(
                "length {len} exceeds {MAX_PACKET_LEN}"
            )));
        }

        let total = PACKET_HEAD_LEN + len + CRLF.len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        if src[total - 2..total] != CRLF {
            return Err(LinkError::invalid_packet("missing CRLF terminator"));
        }
        let cmd = CmdType::try_from(src[4])?;

        let mut frame = src.split_to(total);
        let opaque = frame.get_u32();
        frame.advance(PACKET_HEAD_LEN - 4);
        let data = frame[..len].to_vec();

        Ok(Some(Packet { opaque, cmd, data }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = LinkError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let len = packet.data.len();
        if len > MAX_PACKET_LEN {
            return Err(LinkError::invalid_packet(format!(
                "length {len} exceeds {MAX_PACKET_LEN}"
            )));
        }

        dst.reserve(PACKET_HEAD_LEN + len + CRLF.len());
        dst.put_u32(packet.opaque);
        dst.put_u8(packet.cmd as u8);
        dst.put_u32(len as u32);
        dst.extend_from_slice(&packet.data);
        dst.extend_from_slice(&CRLF);
        Ok(())
    }
}
