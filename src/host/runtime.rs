//! A host event loop on top of tokio.
//!
//! Background tasks (name lookups, the database driver) never touch the
//! provider. They post a [`HostEvent`] for a handle and the loop in
//! [`drive`] routes it to the backend that watches the handle.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::{Handle, HandleTable, Multiplexer, Readiness};
use crate::error::SqlError;
use crate::provider::SqlProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Readable(Handle),
    Writable(Handle),
    Resolved(Handle, Option<IpAddr>),
}

impl HostEvent {
    pub fn handle(&self) -> Handle {
        match self {
            HostEvent::Readable(handle)
            | HostEvent::Writable(handle)
            | HostEvent::Resolved(handle, _) => *handle,
        }
    }
}

/// Sending half of the event loop, shared with background tasks.
#[derive(Debug, Clone)]
pub struct Notifier {
    next: Arc<AtomicU64>,
    events: UnboundedSender<HostEvent>,
}

impl Notifier {
    /// A handle no one has used yet.
    pub fn allocate(&self) -> Handle {
        Handle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn readable(&self, handle: Handle) {
        self.send(HostEvent::Readable(handle));
    }

    pub fn send(&self, event: HostEvent) {
        // The loop is gone when the receiver is dropped; nothing left to wake.
        let _ = self.events.send(event);
    }
}

pub struct TokioHost {
    table: HandleTable,
    notifier: Notifier,
    runtime: tokio::runtime::Handle,
}

impl TokioHost {
    /// Must be called from inside a tokio runtime.
    pub fn new() -> Result<(Self, UnboundedReceiver<HostEvent>)> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("The event loop must be created inside a tokio runtime")?;
        let (events, rx) = mpsc::unbounded_channel();
        let host = Self {
            table: HandleTable::new(),
            notifier: Notifier {
                next: Arc::new(AtomicU64::new(0)),
                events,
            },
            runtime,
        };
        Ok((host, rx))
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn runtime(&self) -> tokio::runtime::Handle {
        self.runtime.clone()
    }

    pub fn table(&self) -> &HandleTable {
        &self.table
    }

    /// The backend watching the event's handle and what to tell it.
    pub fn route(&self, event: &HostEvent) -> Option<(String, Readiness)> {
        let backend = self.table.backend(event.handle())?.to_string();
        let readiness = match *event {
            HostEvent::Readable(_) => Readiness::Readable,
            HostEvent::Writable(_) => Readiness::Writable,
            HostEvent::Resolved(_, address) => Readiness::Resolved(address),
        };
        Some((backend, readiness))
    }
}

impl Multiplexer for TokioHost {
    fn watch(&mut self, handle: Handle, backend: &str) {
        self.table.insert(handle, backend);
    }

    fn unwatch(&mut self, handle: Handle) {
        self.table.remove(handle);
    }

    fn want_write(&mut self, handle: Handle) {
        // Writes are buffered by the driver tasks, so the handle is always
        // writable.
        self.notifier.send(HostEvent::Writable(handle));
    }

    fn resolve(&mut self, hostname: &str, backend: &str) -> Result<Handle, SqlError> {
        if hostname.is_empty() {
            return Err(SqlError::Resolve("empty host name".to_string()));
        }

        let handle = self.notifier.allocate();
        self.table.insert(handle, backend);

        let notifier = self.notifier.clone();
        let hostname = hostname.to_string();
        self.runtime.spawn(async move {
            let address = match tokio::net::lookup_host((hostname.as_str(), 0)).await {
                Ok(addrs) => {
                    let addrs: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
                    addrs
                        .iter()
                        .find(|ip| ip.is_ipv4())
                        .or_else(|| addrs.first())
                        .copied()
                }
                Err(err) => {
                    debug!("lookup of {} failed: {}", hostname, err);
                    None
                }
            };
            notifier.send(HostEvent::Resolved(handle, address));
        });

        Ok(handle)
    }
}

/// Feed host events to `provider` until `done` says to stop or the event
/// stream ends.
pub async fn drive<F>(
    provider: &mut SqlProvider<TokioHost>,
    events: &mut UnboundedReceiver<HostEvent>,
    mut done: F,
) where
    F: FnMut(&SqlProvider<TokioHost>) -> bool,
{
    while !done(&*provider) {
        let Some(event) = events.recv().await else {
            return;
        };
        match provider.mux().route(&event) {
            Some((backend, readiness)) => provider.on_event(&backend, readiness),
            None => debug!("{:?} for an unwatched handle", event),
        }
    }
}
