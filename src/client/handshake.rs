use std::time::Duration;

use tracing::debug;

use crate::client::credential::GroupCredential;
use crate::transport::{CmdType, ConnAuthAck, ConnMeta, Connector, Packet, Session};
use crate::utils::{LinkError, Result};

/// Presents `credential` on `session` and waits for the broker's verdict.
pub async fn handshake(
    session: &Session,
    credential: &GroupCredential,
    timeout: Duration,
) -> Result<()> {
    let meta = ConnMeta {
        group_id: credential.group_id().to_string(),
        secret_key: credential.secret_key().to_string(),
    };
    let request = Packet::new(CmdType::ConnMeta, serde_json::to_vec(&meta)?);
    let response = session.request(request, timeout).await?;

    if response.cmd != CmdType::ConnAuthAck {
        return Err(LinkError::invalid_packet(format!(
            "expected ConnAuthAck, got {:?}",
            response.cmd
        )));
    }

    let ack: ConnAuthAck = serde_json::from_slice(&response.data)?;
    if !ack.status {
        return Err(LinkError::HandshakeRejected {
            address: session.address().to_string(),
            feedback: ack.feedback,
        });
    }

    debug!(address = session.address(), group_id = credential.group_id(), "handshake accepted");
    Ok(())
}

/// Dials `address` and authenticates. A rejected or failed handshake shuts
/// the new session down before the error is returned.
pub async fn establish(
    connector: &Connector,
    address: &str,
    credential: &GroupCredential,
    timeout: Duration,
) -> Result<Session> {
    let session = connector.connect(address).await?;
    match handshake(&session, credential, timeout).await {
        Ok(()) => Ok(session),
        Err(e) => {
            session.shutdown();
            Err(e)
        }
    }
}
