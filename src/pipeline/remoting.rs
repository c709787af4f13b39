use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::client::ConnectionPool;
use crate::pipeline::{Event, ForwardContext, Handler, Targets};
use crate::utils::{LinkError, Result};

/// Terminal handler that writes `Remoting` events to pooled connections.
///
/// Host targets must resolve to a live connection. Group targets pick one
/// live connection per group at random; a group with none is logged and
/// skipped.
pub struct RemotingHandler {
    pool: Arc<ConnectionPool>,
}

impl RemotingHandler {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

impl Handler for RemotingHandler {
    fn accepts(&self, event: &Event) -> bool {
        matches!(event, Event::Remoting(_))
    }

    fn process(&self, _ctx: &mut ForwardContext, event: Event) -> Result<()> {
        let Event::Remoting(remoting) = event else {
            return Err(LinkError::InvalidEventType {
                handler: "remoting".to_string(),
                event: event.kind(),
            });
        };

        match remoting.targets {
            Targets::Hosts(hosts) => {
                for host in hosts {
                    let connection = self
                        .pool
                        .find_by_address(&host)
                        .ok_or_else(|| LinkError::NoConnection {
                            address: host.clone(),
                        })?;
                    if connection.is_closed() {
                        return Err(LinkError::ConnectionClosed { address: host });
                    }
                    connection.write(remoting.packet.clone())?;
                }
            }
            Targets::Groups(groups) => {
                let found = self.pool.find_by_groups(&groups, |_, _| false);
                for group in &groups {
                    let Some(connections) = found.get(group).filter(|c| !c.is_empty()) else {
                        warn!(group_id = %group, "no live connection for group");
                        continue;
                    };
                    let connection = &connections[rand::rng().random_range(0..connections.len())];
                    match connection.write(remoting.packet.clone()) {
                        Ok(()) => {
                            debug!(group_id = %group, address = connection.address(), "packet written")
                        }
                        Err(e) => {
                            warn!(group_id = %group, address = connection.address(), error = %e, "write to group failed")
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
