use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::binding::{Binding, BindingExchanger};
use crate::persistence::MessageStore;
use crate::pipeline::{Event, ForwardContext, Handler};
use crate::transport::{Packet, marshal_message};
use crate::utils::{LinkError, Result};

pub type ExcludeFn = dyn Fn(&Binding) -> bool + Send + Sync;

/// Target groups for one attempt: everyone bound plus everyone that failed
/// last time, minus everyone that already acknowledged. Sorted.
pub fn resolve_groups<I>(candidates: I, fail_groups: &[String], succ_groups: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut groups: BTreeSet<String> = candidates.into_iter().collect();
    groups.extend(fail_groups.iter().cloned());
    for group in succ_groups {
        groups.remove(group);
    }
    groups.into_iter().collect()
}

/// Loads the stored message for a `Deliver` event and computes the groups
/// it still has to reach.
pub struct DeliverPreHandler {
    store: Arc<dyn MessageStore>,
    exchanger: Arc<dyn BindingExchanger>,
    exclude: Box<ExcludeFn>,
}

impl DeliverPreHandler {
    pub fn new(store: Arc<dyn MessageStore>, exchanger: Arc<dyn BindingExchanger>) -> Self {
        Self {
            store,
            exchanger,
            exclude: Box::new(|_: &Binding| false),
        }
    }

    /// Installs a predicate that drops matching bindings from the candidates.
    pub fn with_exclude(mut self, exclude: impl Fn(&Binding) -> bool + Send + Sync + 'static) -> Self {
        self.exclude = Box::new(exclude);
        self
    }
}

impl Handler for DeliverPreHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Deliver(_))
    }

    fn process(&self, ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Deliver(mut deliver) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "deliver-pre".to_string(),
                event: event.kind(),
            });
        };

        let Some(record) = self.store.query(&deliver.message_id)? else {
            warn!(message_id = %deliver.message_id, "message not found in store");
            return Err(LinkError::NotFound {
                message_id: deliver.message_id,
            });
        };

        let header = &record.header;
        let bindings = self
            .exchanger
            .find_bindings(&header.topic, &header.message_type, self.exclude.as_ref());
        let groups = resolve_groups(
            bindings.into_iter().map(|binding| binding.group_id),
            &record.fail_groups,
            &record.succ_groups,
        );

        let data = marshal_message(header, &record.body)?;
        deliver.packet = Some(Packet::new(record.body.command(), data));
        deliver.topic = header.topic.clone();
        deliver.message_type = header.message_type.clone();
        deliver.expired_time = header.expired_time;
        deliver.deliver_limit = record.deliver_limit;
        deliver.deliver_count = record.deliver_count;
        deliver.deliver_groups = groups;
        deliver.succ_groups = record.succ_groups;
        deliver.fail_groups = record.fail_groups;

        debug!(
            message_id = %deliver.message_id,
            groups = ?deliver.deliver_groups,
            "delivery groups resolved"
        );
        ctx.send_forward(Event::Deliver(deliver));
        Ok(())
    }
}
