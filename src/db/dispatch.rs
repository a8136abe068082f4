use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::request::{Request, RequestId};
use super::result::SqlResult;
use crate::error::SqlError;

/// Identifies a caller that submits queries.
///
/// It is only a key into [`ResultDispatcher`]; holding one does not keep
/// the caller alive, and a token whose owner is gone simply resolves to
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerToken(pub u64);

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Receives results for the queries a caller submitted.
pub trait ResultSink {
    fn on_result(&mut self, id: RequestId, outcome: Result<SqlResult, SqlError>);
}

impl<F> ResultSink for F
where
    F: FnMut(RequestId, Result<SqlResult, SqlError>),
{
    fn on_result(&mut self, id: RequestId, outcome: Result<SqlResult, SqlError>) {
        self(id, outcome)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Discarded,
}

/// Registry of live owners and the delivery path to them.
#[derive(Default)]
pub struct ResultDispatcher {
    owners: HashMap<OwnerToken, Box<dyn ResultSink>>,
    next_token: u64,
}

impl ResultDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn ResultSink>) -> OwnerToken {
        self.next_token += 1;
        let token = OwnerToken(self.next_token);
        self.owners.insert(token, sink);
        debug!(%token, "registered result owner");
        token
    }

    /// Returns false if the owner was not registered.
    pub fn unregister(&mut self, token: OwnerToken) -> bool {
        self.owners.remove(&token).is_some()
    }

    pub fn is_live(&self, token: OwnerToken) -> bool {
        self.owners.contains_key(&token)
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Hand `outcome` to the request's owner, or drop it if there is none.
    pub fn deliver(&mut self, req: &Request, outcome: Result<SqlResult, SqlError>) -> Delivery {
        let sink = match req.owner {
            Some(token) => self.owners.get_mut(&token),
            None => None,
        };
        match sink {
            Some(sink) => {
                match &outcome {
                    Ok(result) => debug!(
                        id = %req.id,
                        "delivering result, status {}",
                        result.status().as_str()
                    ),
                    Err(err) => debug!(id = %req.id, "delivering error: {}", err),
                }
                sink.on_result(req.id, outcome);
                Delivery::Delivered
            }
            None => {
                debug!(
                    id = %req.id,
                    "discarding result of a query whose owner went away"
                );
                Delivery::Discarded
            }
        }
    }
}

impl fmt::Debug for ResultDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultDispatcher")
            .field("owners", &self.owners.len())
            .field("next_token", &self.next_token)
            .finish()
    }
}
