//! Connection pool
//!
//! Two tables share one lock:
//! - `by_address`: broker address → credential and connection
//! - `by_group`: group id → addresses authenticated with that group
//!
//! Every address listed under a group has a `by_address` entry. Readers that
//! find a closed connection hand it to the reconnect scheduler only after the
//! lock is released, so the scheduler can call back into the pool freely.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::connection::BrokerConnection;
use crate::client::credential::GroupCredential;
use crate::client::reconnect::{ReconnectScheduler, ReconnectTask};

struct Entry {
    credential: Arc<GroupCredential>,
    connection: Arc<BrokerConnection>,
}

type Stale = Vec<(Arc<GroupCredential>, Arc<BrokerConnection>)>;

#[derive(Default)]
struct PoolTables {
    by_address: HashMap<String, Entry>,
    by_group: HashMap<String, Vec<String>>,
}

impl PoolTables {
    fn unlist(&mut self, group_id: &str, address: &str) {
        if let Some(addresses) = self.by_group.get_mut(group_id) {
            addresses.retain(|a| a != address);
            if addresses.is_empty() {
                self.by_group.remove(group_id);
            }
        }
    }

    fn remove(&mut self, address: &str) -> Option<Entry> {
        let entry = self.by_address.remove(address)?;
        self.unlist(entry.credential.group_id(), address);
        Some(entry)
    }

    /// Returns the connection when live, otherwise queues it on `stale`.
    fn live(entry: &Entry, stale: &mut Stale) -> Option<Arc<BrokerConnection>> {
        if entry.connection.is_closed() {
            stale.push((entry.credential.clone(), entry.connection.clone()));
            None
        } else {
            Some(entry.connection.clone())
        }
    }
}

pub struct ConnectionPool {
    tables: RwLock<PoolTables>,
    scheduler: Arc<ReconnectScheduler>,
    me: Weak<ConnectionPool>,
}

impl ConnectionPool {
    pub fn new(scheduler: Arc<ReconnectScheduler>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            tables: RwLock::new(PoolTables::default()),
            scheduler,
            me: me.clone(),
        })
    }

    pub fn is_authenticated(&self, address: &str) -> bool {
        self.tables.read().by_address.contains_key(address)
    }

    /// Registers an authenticated connection.
    ///
    /// Registering the same address again replaces its entry and lists the
    /// address under the group once more.
    pub fn authenticate(&self, credential: Arc<GroupCredential>, connection: Arc<BrokerConnection>) {
        let address = connection.address().to_string();
        let group_id = credential.group_id().to_string();

        let replaced = {
            let mut tables = self.tables.write();
            let previous = tables.by_address.insert(
                address.clone(),
                Entry {
                    credential: credential.clone(),
                    connection: connection.clone(),
                },
            );
            if let Some(previous) = &previous {
                let previous_group = previous.credential.group_id().to_string();
                if previous_group != group_id {
                    tables.unlist(&previous_group, &address);
                }
            }
            tables
                .by_group
                .entry(group_id.clone())
                .or_default()
                .push(address.clone());
            previous
        };

        if let Some(previous) = replaced {
            if !Arc::ptr_eq(&previous.connection, &connection) {
                debug!(address = %address, "replacing pooled connection");
                previous.connection.shutdown();
            }
        }
        info!(address = %address, group_id = %group_id, "connection authenticated");
    }

    /// Every pooled connection, live or not.
    pub fn snapshot_all(&self) -> HashMap<String, Arc<BrokerConnection>> {
        self.tables
            .read()
            .by_address
            .iter()
            .map(|(address, entry)| (address.clone(), entry.connection.clone()))
            .collect()
    }

    /// Removes and shuts down the connections at `addresses`. Unknown
    /// addresses are ignored.
    pub fn evict<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed: Vec<Entry> = {
            let mut tables = self.tables.write();
            addresses
                .into_iter()
                .filter_map(|address| tables.remove(address.as_ref()))
                .collect()
        };

        for entry in removed {
            info!(
                address = entry.connection.address(),
                group_id = entry.credential.group_id(),
                "evicting connection"
            );
            entry.connection.shutdown();
        }
    }

    /// Evicts `address` only while it still maps to connection `id`.
    fn evict_if_current(&self, address: &str, id: Uuid) {
        let removed = {
            let mut tables = self.tables.write();
            match tables.by_address.get(address) {
                Some(entry) if entry.connection.id() == id => tables.remove(address),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            info!(address, "evicting abandoned connection");
            entry.connection.shutdown();
        }
    }

    /// The connection at `address`. A closed one is handed to the reconnect
    /// scheduler and still returned.
    pub fn find_by_address(&self, address: &str) -> Option<Arc<BrokerConnection>> {
        let mut stale = Vec::new();
        let found = {
            let tables = self.tables.read();
            tables.by_address.get(address).map(|entry| {
                PoolTables::live(entry, &mut stale);
                entry.connection.clone()
            })
        };
        self.submit_reconnects(stale);
        found
    }

    /// Live connections for each requested group, minus those `reject`
    /// refuses. Groups with no acceptable connection are absent.
    pub fn find_by_groups<F>(&self, group_ids: &[String], reject: F) -> HashMap<String, Vec<Arc<BrokerConnection>>>
    where
        F: Fn(&str, &BrokerConnection) -> bool,
    {
        let mut stale = Vec::new();
        let mut found: HashMap<String, Vec<Arc<BrokerConnection>>> = HashMap::new();
        {
            let tables = self.tables.read();
            for group_id in group_ids {
                let Some(addresses) = tables.by_group.get(group_id) else {
                    continue;
                };
                for address in addresses {
                    let Some(entry) = tables.by_address.get(address) else {
                        continue;
                    };
                    let Some(connection) = PoolTables::live(entry, &mut stale) else {
                        continue;
                    };
                    if reject(group_id.as_str(), connection.as_ref()) {
                        continue;
                    }
                    found.entry(group_id.clone()).or_default().push(connection);
                }
            }
        }
        self.submit_reconnects(stale);
        found
    }

    /// Number of addresses listed under `group_id`, duplicates included.
    pub fn group_size(&self, group_id: &str) -> usize {
        self.tables
            .read()
            .by_group
            .get(group_id)
            .map_or(0, |addresses| addresses.len())
    }

    /// Closes and forgets every pooled connection.
    pub fn shutdown_all(&self) {
        let drained: Vec<Entry> = {
            let mut tables = self.tables.write();
            tables.by_group.clear();
            tables.by_address.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.connection.shutdown();
        }
        info!(count = drained.len(), "connection pool shut down");
    }

    fn submit_reconnects(&self, stale: Stale) {
        for (credential, connection) in stale {
            let pool = self.me.clone();
            let id = connection.id();
            warn!(address = connection.address(), "connection closed, scheduling reconnect");
            self.scheduler.submit(ReconnectTask::new(
                connection,
                credential,
                move |address: &str| {
                    if let Some(pool) = pool.upgrade() {
                        pool.evict_if_current(address, id);
                    }
                },
            ));
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("ConnectionPool")
            .field("connections", &tables.by_address.len())
            .field("groups", &tables.by_group.len())
            .finish()
    }
}
