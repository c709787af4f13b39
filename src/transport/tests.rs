use super::message::unmarshal_message;
use super::*;
use crate::stat::FlowControl;
use crate::utils::LinkError;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder, Framed};

#[derive(Default)]
struct Captured(Mutex<Vec<(String, Packet)>>);

impl PacketDispatcher for Captured {
    fn dispatch(&self, remote: &str, packet: Packet) {
        self.0.lock().push((remote.to_string(), packet));
    }
}

fn encode(packet: Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    PacketCodec.encode(packet, &mut buf).unwrap();
    buf
}

#[test]
fn test_decode_waits_for_complete_packet() {
    let packet = Packet::response(7, CmdType::ConnAuthAck, b"{\"status\":true}".to_vec());
    let encoded = encode(packet.clone());

    let mut buf = BytesMut::from(&encoded[..5]);
    assert!(PacketCodec.decode(&mut buf).unwrap().is_none());
    assert_eq!(buf.len(), 5);

    buf.extend_from_slice(&encoded[5..encoded.len() - 1]);
    assert!(PacketCodec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(b"\n");
    let decoded = PacketCodec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(decoded, packet);
    assert!(buf.is_empty());
}

#[test]
fn test_decode_concatenated_packets() {
    let first = Packet::response(1, CmdType::DeliverAck, b"a\r\nb".to_vec());
    let second = Packet::new(CmdType::Heartbeat, Vec::new());
    let mut buf = encode(first.clone());
    buf.extend_from_slice(&encode(second.clone()));

    assert_eq!(PacketCodec.decode(&mut buf).unwrap().unwrap(), first);
    assert_eq!(PacketCodec.decode(&mut buf).unwrap().unwrap(), second);
    assert!(PacketCodec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_decode_rejects_bad_terminator_and_command() {
    let mut buf = encode(Packet::new(CmdType::Heartbeat, b"xy".to_vec()));
    let last = buf.len() - 1;
    buf[last] = b'!';
    assert!(matches!(
        PacketCodec.decode(&mut buf),
        Err(LinkError::InvalidPacket { .. })
    ));

    let mut buf = encode(Packet::new(CmdType::Heartbeat, Vec::new()));
    buf[4] = 0x7f;
    assert!(matches!(
        PacketCodec.decode(&mut buf),
        Err(LinkError::InvalidPacket { .. })
    ));
}

#[test]
fn test_encode_rejects_oversized_packet() {
    let mut buf = BytesMut::new();
    let oversized = Packet::new(CmdType::BytesMessage, vec![0; MAX_PACKET_LEN + 1]);
    assert!(matches!(
        PacketCodec.encode(oversized, &mut buf),
        Err(LinkError::InvalidPacket { .. })
    ));
    assert!(buf.is_empty());
}

#[test]
fn test_message_packet_command_follows_body_kind() {
    let text = Message::text("orders", "pay-succ", "s-mts", 60, "hello");
    assert_eq!(text.to_packet().unwrap().cmd, CmdType::StringMessage);

    let bytes = Message::bytes("orders", "pay-succ", "s-mts", 60, vec![1, 2, 3]);
    let packet = bytes.to_packet().unwrap();
    assert_eq!(packet.cmd, CmdType::BytesMessage);
    assert_eq!(unmarshal_message(&packet).unwrap(), bytes);
    assert_ne!(text.header.message_id, bytes.header.message_id);
}

#[test]
fn test_unmarshal_rejects_kind_mismatch() {
    let text = Message::text("orders", "pay-succ", "s-mts", 60, "hello");
    let mut packet = text.to_packet().unwrap();
    packet.cmd = CmdType::BytesMessage;
    assert!(unmarshal_message(&packet).is_err());
}

#[tokio::test]
async fn test_session_request_and_dispatch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    // echo every request back as a response, then push one unsolicited packet
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, PacketCodec);
        while let Some(Ok(req)) = framed.next().await {
            let resp = Packet::response(req.opaque, CmdType::ConnAuthAck, req.data);
            framed.send(resp).await.unwrap();
            let push = Packet::response(999, CmdType::StringMessage, b"push".to_vec());
            framed.send(push).await.unwrap();
        }
    });

    let captured = Arc::new(Captured::default());
    let flow = FlowControl::new("session-test");
    let connector = Connector::new(Duration::from_secs(1), captured.clone(), flow.clone());
    let session = connector.connect(&addr).await.unwrap();

    let response = session
        .request(
            Packet::new(CmdType::ConnMeta, b"ping".to_vec()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    assert_eq!(response.cmd, CmdType::ConnAuthAck);
    assert_eq!(response.data, b"ping");

    for _ in 0..50 {
        if !captured.0.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let pushed = captured.0.lock().clone();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].0, addr);
    assert_eq!(pushed[0].1.data, b"push");
    assert!(flow.write.count() >= 1);
    assert!(flow.read.count() >= 2);
}

#[tokio::test]
async fn test_session_closes_on_peer_eof() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let connector = Connector::new(
        Duration::from_secs(1),
        Arc::new(Captured::default()),
        FlowControl::new("eof-test"),
    );
    let session = connector.connect(&addr).await.unwrap();

    for _ in 0..100 {
        if session.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.is_closed());
    assert!(matches!(
        session.write(Packet::new(CmdType::Heartbeat, Vec::new())),
        Err(LinkError::ConnectionClosed { .. })
    ));
}

#[tokio::test]
async fn test_session_closes_on_corrupt_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let mut corrupt = encode(Packet::response(5, CmdType::StringMessage, b"bad".to_vec()));
    let last = corrupt.len() - 1;
    corrupt[last] = b'!';
    let mut valid = BytesMut::new();
    for opaque in 100..122 {
        valid.extend_from_slice(&encode(Packet::response(opaque, CmdType::StringMessage, b"ok".to_vec())));
    }

    let (sent_tx, sent_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        corrupt.extend_from_slice(&valid[..5]);
        stream.write_all(&corrupt).await.unwrap();
        stream.write_all(&valid[5..]).await.unwrap();
        let _ = sent_tx.send(());
        // hold the socket open; only the client may end the session
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let captured = Arc::new(Captured::default());
    let connector = Connector::new(
        Duration::from_secs(1),
        captured.clone(),
        FlowControl::new("corrupt-test"),
    );
    let session = connector.connect(&addr).await.unwrap();
    sent_rx.await.unwrap();

    for _ in 0..100 {
        if session.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(session.is_closed());
    assert!(captured.0.lock().is_empty());
}

#[tokio::test]
async fn test_session_write_rejects_oversized_packet() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let connector = Connector::new(
        Duration::from_secs(1),
        Arc::new(Captured::default()),
        FlowControl::new("oversized-test"),
    );
    let session = connector.connect(&addr).await.unwrap();

    let oversized = Packet::new(CmdType::BytesMessage, vec![0; MAX_PACKET_LEN + 1]);
    assert!(matches!(
        session.write(oversized),
        Err(LinkError::InvalidPacket { .. })
    ));
    assert!(session.write(Packet::new(CmdType::Heartbeat, Vec::new())).is_ok());
    assert!(!session.is_closed());
}

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let connector = Connector::new(
        Duration::from_secs(1),
        Arc::new(Captured::default()),
        FlowControl::new("refused-test"),
    );
    let err = connector.connect(&addr).await.unwrap_err();
    assert!(matches!(err, LinkError::Transport { .. }));
}
