use std::collections::VecDeque;
use std::fmt;

use super::dispatch::OwnerToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out request ids. Zero is never issued, even after wrapping.
#[derive(Debug, Default)]
pub struct IdGenerator {
    current: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> RequestId {
        self.current = self.current.wrapping_add(1);
        if self.current == 0 {
            self.current = 1;
        }
        RequestId(self.current)
    }
}

/// What a caller asks for: a template, its parameters, and where to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub backend: String,
    pub template: String,
    pub params: Vec<String>,
    pub priority: bool,
}

impl Query {
    pub fn new(backend: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            template: template.into(),
            params: Vec::new(),
            priority: false,
        }
    }

    pub fn param(mut self, value: impl Into<String>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn params<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self) -> Self {
        self.priority = true;
        self
    }
}

/// A query accepted by a connection and waiting in its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub backend: String,
    pub template: String,
    /// Consumed from the front as placeholders are substituted.
    pub params: VecDeque<String>,
    pub priority: bool,
    /// Cleared when the owner goes away while the request is executing.
    pub owner: Option<OwnerToken>,
}

impl Request {
    pub fn new(id: RequestId, query: Query, owner: Option<OwnerToken>) -> Self {
        Self {
            id,
            backend: query.backend,
            template: query.template,
            params: query.params.into(),
            priority: query.priority,
            owner,
        }
    }

    pub fn kind(&self) -> &'static str {
        if self.priority {
            "priority"
        } else {
            "non-priority"
        }
    }
}
