//! The host side of the provider: the readiness multiplexer it is driven
//! by, and the feature table it advertises itself in.

pub mod runtime;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use crate::error::SqlError;

/// A transport handle registered with the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the host tells a backend when one of its handles fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    /// A name lookup finished; `None` when it failed.
    Resolved(Option<IpAddr>),
}

/// Readiness registration as offered by the host event loop.
///
/// Handles are tied to the backend id they are watched for, so the host can
/// route each event to `SqlProvider::on_event`.
pub trait Multiplexer {
    fn watch(&mut self, handle: Handle, backend: &str);

    fn unwatch(&mut self, handle: Handle);

    /// Ask for a `Writable` event on `handle`.
    fn want_write(&mut self, handle: Handle);

    /// Start resolving `hostname`. The returned handle is already watched for
    /// `backend` and fires `Readiness::Resolved` once.
    fn resolve(&mut self, hostname: &str, backend: &str) -> Result<Handle, SqlError>;
}

/// Maps watched handles to the backend they belong to.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: HashMap<Handle, String>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: Handle, backend: &str) -> Option<String> {
        self.handles.insert(handle, backend.to_string())
    }

    pub fn remove(&mut self, handle: Handle) -> Option<String> {
        self.handles.remove(&handle)
    }

    pub fn backend(&self, handle: Handle) -> Option<&str> {
        self.handles.get(&handle).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Somewhere to advertise named capabilities so other modules can find the
/// provider.
pub trait FeatureRegistry {
    /// Returns false if `name` is already provided by someone else.
    fn publish_feature(&mut self, name: &str, provider: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct FeatureTable {
    features: HashMap<String, String>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }

    pub fn unpublish(&mut self, name: &str) -> Option<String> {
        self.features.remove(name)
    }
}

impl FeatureRegistry for FeatureTable {
    fn publish_feature(&mut self, name: &str, provider: &str) -> bool {
        if self.features.contains_key(name) {
            return false;
        }
        self.features.insert(name.to_string(), provider.to_string());
        true
    }
}
