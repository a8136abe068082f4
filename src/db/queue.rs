use std::collections::VecDeque;

use tracing::debug;

use super::dispatch::OwnerToken;
use super::request::{Request, RequestId};

/// Which sequence holds the request currently being worked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Priority,
    Normal,
    None,
}

/// Queries waiting to run on one connection.
///
/// Two FIFO sequences are kept: priority queries always run before normal
/// ones. The request returned by [`QueryQueue::front`] stays the same until
/// [`QueryQueue::pop`] is called, even if priority queries arrive while a
/// normal query is executing. Without that pin a query could jump from the
/// head of one sequence to the other halfway through being processed.
#[derive(Debug)]
pub struct QueryQueue {
    priority: VecDeque<Request>,
    normal: VecDeque<Request>,
    active: Active,
}

impl Default for QueryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryQueue {
    pub fn new() -> Self {
        Self {
            priority: VecDeque::new(),
            normal: VecDeque::new(),
            active: Active::None,
        }
    }

    pub fn push(&mut self, req: Request) {
        debug!(
            id = %req.id,
            "adding {} query to queue: {}",
            req.kind(),
            req.template
        );
        if req.priority {
            self.priority.push_back(req);
        } else {
            self.normal.push_back(req);
        }
    }

    /// Remove the active request. Does nothing if no request is active.
    pub fn pop(&mut self) -> Option<Request> {
        let popped = match self.active {
            Active::Priority => self.priority.pop_front(),
            Active::Normal => self.normal.pop_front(),
            Active::None => None,
        };
        self.active = Active::None;
        popped
    }

    /// The active request, choosing one if none is active yet.
    ///
    /// Returns `None` only when the queue is empty.
    pub fn front(&mut self) -> Option<&mut Request> {
        match self.active {
            Active::Priority if !self.priority.is_empty() => return self.priority.front_mut(),
            Active::Normal if !self.normal.is_empty() => return self.normal.front_mut(),
            _ => {}
        }

        if !self.priority.is_empty() {
            self.active = Active::Priority;
            self.priority.front_mut()
        } else if !self.normal.is_empty() {
            self.active = Active::Normal;
            self.normal.front_mut()
        } else {
            self.active = Active::None;
            None
        }
    }

    /// Id of the active request, without choosing one.
    pub fn active_id(&self) -> Option<RequestId> {
        match self.active {
            Active::Priority => self.priority.front().map(|r| r.id),
            Active::Normal => self.normal.front().map(|r| r.id),
            Active::None => None,
        }
    }

    /// (priority, normal)
    pub fn sizes(&self) -> (usize, usize) {
        (self.priority.len(), self.normal.len())
    }

    pub fn total_size(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_size() == 0
    }

    /// Forget every request belonging to `owner`.
    ///
    /// Requests that have not started are removed outright. The active one
    /// has already been sent to the server, so it stays queued with its owner
    /// cleared and its result is thrown away when it arrives.
    pub fn purge_owner(&mut self, owner: OwnerToken) -> usize {
        let active = self.active_id();
        let mut removed = 0;

        for queue in [&mut self.priority, &mut self.normal] {
            queue.retain_mut(|req| {
                if req.owner != Some(owner) {
                    return true;
                }
                if Some(req.id) == active {
                    req.owner = None;
                    true
                } else {
                    removed += 1;
                    false
                }
            });
        }

        removed
    }

    /// Empty the queue, active request first.
    pub fn drain(&mut self) -> Vec<Request> {
        let mut drained = Vec::with_capacity(self.total_size());
        drained.extend(self.pop());
        drained.extend(self.priority.drain(..));
        drained.extend(self.normal.drain(..));
        drained
    }
}
