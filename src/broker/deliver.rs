use chrono::Utc;
use tracing::info;

use crate::pipeline::{Event, ForwardContext, Handler, RemotingEvent};
use crate::utils::{LinkError, Result};

/// Turns a resolved `Deliver` event into a group-targeted `Remoting` event.
///
/// Nothing is forwarded when no group is left, when the message expired or
/// when the deliver limit is used up.
#[derive(Debug, Default)]
pub struct DeliverHandler;

impl DeliverHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for DeliverHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Deliver(_))
    }

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Deliver(deliver) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "deliver".to_string(),
                event: event.kind(),
            });
        };

        if deliver.deliver_groups.is_empty() {
            info!(message_id = %deliver.message_id, "fully delivered");
            return Ok(());
        }
        if deliver.expired_time > 0 && deliver.expired_time < Utc::now().timestamp() {
            info!(message_id = %deliver.message_id, "message expired, not delivering");
            return Ok(());
        }
        if deliver.deliver_limit > 0 && deliver.deliver_count >= deliver.deliver_limit {
            info!(
                message_id = %deliver.message_id,
                deliver_count = deliver.deliver_count,
                "deliver limit reached"
            );
            return Ok(());
        }

        let Some(packet) = deliver.packet else {
            return Err(LinkError::invalid_packet("deliver event carries no packet"));
        };
        ctx.send_forward(Event::Remoting(RemotingEvent::to_groups(
            deliver.deliver_groups,
            packet,
        )));
        Ok(())
    }
}
