//! In-memory multiplexer and driver used by the unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::DatabaseConfig;
use crate::db::{RequestId, ResultSet, ResultSink, SqlResult};
use crate::driver::{ConnectParams, Driver, Flush, PollStatus, Session};
use crate::error::{DriverError, SqlError};
use crate::host::{Handle, HandleTable, Multiplexer};

pub fn database(id: &str, hostname: &str) -> DatabaseConfig {
    DatabaseConfig {
        id: id.to_string(),
        hostname: hostname.to_string(),
        port: 5432,
        name: "app".to_string(),
        username: "app".to_string(),
        password: "secret".to_string(),
        ssl: false,
        ca_cert_path: None,
    }
}

pub fn rows(column: &str, values: &[&str]) -> ResultSet {
    ResultSet::tuples(
        vec![column.to_string()],
        values
            .iter()
            .map(|v| vec![Some(v.as_bytes().to_vec())])
            .collect(),
    )
}

#[derive(Debug, Default)]
pub struct FakeMux {
    pub table: HandleTable,
    pub unwatched: Vec<Handle>,
    pub write_requests: Vec<Handle>,
    pub resolves: Vec<(String, Handle)>,
    pub fail_resolve: bool,
    next_handle: u64,
}

impl FakeMux {
    pub fn new() -> Self {
        Self {
            next_handle: 1000,
            ..Self::default()
        }
    }
}

impl Multiplexer for FakeMux {
    fn watch(&mut self, handle: Handle, backend: &str) {
        self.table.insert(handle, backend);
    }

    fn unwatch(&mut self, handle: Handle) {
        self.table.remove(handle);
        self.unwatched.push(handle);
    }

    fn want_write(&mut self, handle: Handle) {
        self.write_requests.push(handle);
    }

    fn resolve(&mut self, hostname: &str, backend: &str) -> Result<Handle, SqlError> {
        if self.fail_resolve {
            return Err(SqlError::Resolve(hostname.to_string()));
        }
        self.next_handle += 1;
        let handle = Handle(self.next_handle);
        self.table.insert(handle, backend);
        self.resolves.push((hostname.to_string(), handle));
        Ok(handle)
    }
}

/// Scriptable state behind one fake session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub params: Option<ConnectParams>,
    pub handle: Option<Handle>,
    /// Handshake steps; `Ok` once exhausted.
    pub polls: VecDeque<PollStatus>,
    pub poll_count: usize,
    pub sent: Vec<String>,
    /// Errors returned by upcoming `send_query` calls, `None` meaning success.
    pub send_errors: VecDeque<Option<String>>,
    pub consume_error: Option<String>,
    pub flush_pending: bool,
    /// Results of the running query, handed over by the next `consume_input`.
    pub finished: Option<Vec<ResultSet>>,
    /// Answer every query immediately with a one-row result echoing its text.
    pub echo: bool,
    in_flight: bool,
    results: VecDeque<ResultSet>,
    pub max_in_flight_violations: usize,
    pub closed: bool,
}

impl SessionState {
    pub fn complete(&mut self, sets: Vec<ResultSet>) {
        self.finished = Some(sets);
    }
}

pub type SharedSession = Rc<RefCell<SessionState>>;

struct FakeSession(SharedSession);

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

impl Session for FakeSession {
    fn handle(&self) -> Option<Handle> {
        self.0.borrow().handle
    }

    fn connect_poll(&mut self) -> PollStatus {
        let mut state = self.0.borrow_mut();
        state.poll_count += 1;
        state.polls.pop_front().unwrap_or(PollStatus::Ok)
    }

    fn escape(&self, raw: &str) -> String {
        raw.replace('\'', "''")
    }

    fn send_query(&mut self, text: &str) -> Result<(), DriverError> {
        let mut state = self.0.borrow_mut();
        if let Some(Some(message)) = state.send_errors.pop_front() {
            return Err(DriverError::new(message));
        }
        if state.in_flight {
            state.max_in_flight_violations += 1;
            return Err(DriverError::new("another command is already in progress"));
        }
        state.sent.push(text.to_string());
        state.in_flight = true;
        if state.echo {
            state.finished = Some(vec![rows("query", &[text])]);
        }
        Ok(())
    }

    fn consume_input(&mut self) -> Result<(), DriverError> {
        let mut state = self.0.borrow_mut();
        if let Some(message) = state.consume_error.clone() {
            return Err(DriverError::new(message));
        }
        if let Some(sets) = state.finished.take() {
            state.results.extend(sets);
            state.in_flight = false;
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.0.borrow().in_flight
    }

    fn next_result(&mut self) -> Option<ResultSet> {
        self.0.borrow_mut().results.pop_front()
    }

    fn flush(&mut self) -> Result<Flush, DriverError> {
        if self.0.borrow().flush_pending {
            Ok(Flush::Pending)
        } else {
            Ok(Flush::Done)
        }
    }

    fn error_message(&self) -> String {
        "fake session error".to_string()
    }
}

/// Hands out fake sessions and keeps a handle on each for the test.
#[derive(Clone, Default)]
pub struct FakeDriver {
    pub sessions: Rc<RefCell<Vec<SharedSession>>>,
    /// Handshake script given to every new session.
    pub polls: Rc<RefCell<Vec<PollStatus>>>,
    pub echo: bool,
    pub fail_start: bool,
    pub no_handle: bool,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, index: usize) -> SharedSession {
        Rc::clone(&self.sessions.borrow()[index])
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }
}

impl Driver for FakeDriver {
    fn connect_start(&self, params: &ConnectParams) -> Result<Box<dyn Session>, DriverError> {
        if self.fail_start {
            return Err(DriverError::new("out of memory"));
        }
        let index = self.sessions.borrow().len() as u64;
        let state = SessionState {
            params: Some(params.clone()),
            handle: if self.no_handle {
                None
            } else {
                Some(Handle(index + 1))
            },
            polls: self.polls.borrow().iter().cloned().collect(),
            echo: self.echo,
            ..SessionState::default()
        };
        let shared = Rc::new(RefCell::new(state));
        self.sessions.borrow_mut().push(Rc::clone(&shared));
        Ok(Box::new(FakeSession(shared)))
    }
}

pub type Received = Rc<RefCell<Vec<(RequestId, Result<SqlResult, SqlError>)>>>;

pub fn recording_sink() -> (Box<dyn ResultSink>, Received) {
    let received: Received = Rc::default();
    let log = Rc::clone(&received);
    let sink = move |id: RequestId, outcome: Result<SqlResult, SqlError>| {
        log.borrow_mut().push((id, outcome));
    };
    (Box::new(sink), received)
}

/// First-column text of a delivered result's first row.
pub fn first_value(outcome: &Result<SqlResult, SqlError>) -> Option<String> {
    let result = outcome.as_ref().ok()?;
    let field = result.value(0, 0).ok()?;
    field.as_str().map(str::to_string)
}
