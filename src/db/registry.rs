use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::connection::{ConnState, Connection, Context};
use super::dispatch::OwnerToken;
use crate::config::{DatabaseConfig, ProviderSettings};
use crate::error::SqlError;

/// Diagnostic snapshot of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub id: String,
    pub state: ConnState,
    pub busy: bool,
    pub priority_queued: usize,
    pub normal_queued: usize,
}

/// Every configured backend, by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: BTreeMap<String, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, id: &str) -> Result<&mut Connection, SqlError> {
        self.connections
            .get_mut(id)
            .ok_or_else(|| SqlError::BadIdentifier(id.to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    /// Replace every connection with fresh ones built from `databases`.
    ///
    /// Existing connections are closed first; their queued and running
    /// requests are abandoned. When an id appears twice the first record is
    /// used.
    pub fn reload(
        &mut self,
        databases: &[DatabaseConfig],
        settings: &ProviderSettings,
        cx: &mut Context<'_>,
    ) {
        self.close_all(cx);

        for config in databases {
            if self.connections.contains_key(&config.id) {
                warn!(backend = %config.id, "duplicate database id, ignoring later definition");
                continue;
            }
            let conn = Connection::open(config.clone(), settings.clone(), cx);
            self.connections.insert(config.id.clone(), conn);
        }

        debug!("loaded {} database connections", self.connections.len());
    }

    pub fn close_all(&mut self, cx: &mut Context<'_>) {
        for conn in self.connections.values_mut() {
            conn.close(cx);
        }
        self.connections.clear();
    }

    /// Forget `owner` on every connection. Returns how many requests were
    /// removed outright.
    pub fn purge_owner(&mut self, owner: OwnerToken) -> usize {
        self.connections
            .values_mut()
            .map(|conn| conn.purge_owner(owner))
            .sum()
    }

    pub fn status(&self) -> Vec<BackendStatus> {
        self.connections
            .values()
            .map(|conn| {
                let (priority_queued, normal_queued) = conn.queue_sizes();
                BackendStatus {
                    id: conn.id().to_string(),
                    state: conn.state(),
                    busy: conn.is_busy(),
                    priority_queued,
                    normal_queued,
                }
            })
            .collect()
    }
}
