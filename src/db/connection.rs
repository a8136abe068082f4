use std::net::IpAddr;

use tracing::{debug, info, warn};

use super::dispatch::{OwnerToken, ResultDispatcher};
use super::queue::QueryQueue;
use super::request::{Request, RequestId};
use super::result::{ResultSet, ResultStatus, SqlResult};
use super::substitute::substitute;
use crate::config::{DatabaseConfig, ProviderSettings};
use crate::driver::{ConnectParams, Driver, Flush, PollStatus, Session};
use crate::error::SqlError;
use crate::host::{Handle, Multiplexer, Readiness};

/// The collaborators a connection talks to while handling a callback.
pub struct Context<'a> {
    pub mux: &'a mut dyn Multiplexer,
    pub dispatcher: &'a mut ResultDispatcher,
    pub driver: &'a dyn Driver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the host name lookup.
    Resolving,
    /// Handshake in progress, driver wants to write.
    ConnectingWrite,
    /// Handshake in progress, waiting for the server.
    ConnectingRead,
    /// Connected; queries are executed from the queue.
    Ready,
    /// Failed or shut down. Only a reload brings the backend back.
    Closed,
}

impl ConnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Resolving => "RESOLVING",
            ConnState::ConnectingWrite => "CWRITE",
            ConnState::ConnectingRead => "CREAD",
            ConnState::Ready => "READY",
            ConnState::Closed => "CLOSED",
        }
    }
}

/// One persistent session with a configured backend.
///
/// All work happens inside readiness callbacks: the connection never blocks
/// and has at most one query on the wire at a time.
pub struct Connection {
    config: DatabaseConfig,
    settings: ProviderSettings,
    address: Option<IpAddr>,
    state: ConnState,
    session: Option<Box<dyn Session>>,
    handle: Option<Handle>,
    /// A query was sent and its result has not been consumed yet.
    busy: bool,
    queue: QueryQueue,
}

impl Connection {
    /// Start connecting to `config`, resolving its host name first unless
    /// it is already a numeric address.
    pub fn open(config: DatabaseConfig, settings: ProviderSettings, cx: &mut Context<'_>) -> Self {
        debug!(
            backend = %config.id,
            "creating new connection to database {} on {}:{} ({})",
            config.name,
            config.hostname,
            config.port,
            config.username
        );

        let mut conn = Self {
            config,
            settings,
            address: None,
            state: ConnState::Resolving,
            session: None,
            handle: None,
            busy: false,
            queue: QueryQueue::new(),
        };

        match conn.config.hostname.parse::<IpAddr>() {
            Ok(address) => {
                debug!(backend = %conn.config.id, "no need to resolve {}", address);
                conn.address = Some(address);
                conn.connect(cx);
            }
            Err(_) => {
                debug!(backend = %conn.config.id, "attempting to resolve {}", conn.config.hostname);
                match cx.mux.resolve(&conn.config.hostname, &conn.config.id) {
                    Ok(handle) => conn.handle = Some(handle),
                    Err(err) => {
                        warn!(backend = %conn.config.id, "{}", err);
                        conn.close(cx);
                    }
                }
            }
        }

        conn
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// (priority, normal)
    pub fn queue_sizes(&self) -> (usize, usize) {
        self.queue.sizes()
    }

    /// Queue a request and start it right away if the connection is idle.
    pub fn submit(&mut self, req: Request, cx: &mut Context<'_>) -> Result<RequestId, SqlError> {
        if self.state == ConnState::Closed {
            return Err(SqlError::BadConnection);
        }

        let id = req.id;
        self.queue.push(req);

        if self.state == ConnState::Ready && !self.busy {
            self.dispatch_next(cx);
            self.flush(cx);
        }

        Ok(id)
    }

    /// Drop `owner`'s pending requests; see [`QueryQueue::purge_owner`].
    pub fn purge_owner(&mut self, owner: OwnerToken) -> usize {
        self.queue.purge_owner(owner)
    }

    /// Entry point for the host's callbacks on this connection's handle.
    pub fn on_event(&mut self, readiness: Readiness, cx: &mut Context<'_>) {
        debug!(
            backend = %self.config.id,
            "{:?}: status = {}",
            readiness,
            self.state.as_str()
        );

        match (self.state, readiness) {
            (ConnState::Resolving, Readiness::Resolved(result)) => self.on_resolved(result, cx),
            (
                ConnState::ConnectingWrite | ConnState::ConnectingRead,
                Readiness::Readable | Readiness::Writable,
            ) => self.poll_handshake(cx),
            (ConnState::Ready, Readiness::Readable | Readiness::Writable) => self.pump(cx),
            (state, readiness) => {
                debug!(
                    backend = %self.config.id,
                    "ignoring {:?} in state {}",
                    readiness,
                    state.as_str()
                );
                return;
            }
        }

        self.flush(cx);
    }

    /// Tear the session down. Whatever is still queued is abandoned.
    pub fn close(&mut self, cx: &mut Context<'_>) {
        debug!(backend = %self.config.id, "closing connection");

        if let Some(handle) = self.handle.take() {
            cx.mux.unwatch(handle);
        }
        self.session = None;
        self.state = ConnState::Closed;
        self.busy = false;

        let abandoned = self.queue.drain();
        if abandoned.is_empty() {
            return;
        }
        if self.settings.notify_abandoned {
            for req in &abandoned {
                cx.dispatcher
                    .deliver(req, Err(SqlError::ConnectionLost(self.config.id.clone())));
            }
        } else {
            warn!(
                backend = %self.config.id,
                "abandoning {} queued queries",
                abandoned.len()
            );
        }
    }

    fn on_resolved(&mut self, result: Option<IpAddr>, cx: &mut Context<'_>) {
        if let Some(handle) = self.handle.take() {
            cx.mux.unwatch(handle);
        }

        match result {
            Some(address) => {
                debug!(backend = %self.config.id, "got result: {}", address);
                self.address = Some(address);
                self.connect(cx);
            }
            None => {
                warn!(
                    backend = %self.config.id,
                    "DNS lookup for {} failed",
                    self.config.hostname
                );
                self.close(cx);
            }
        }
    }

    fn connect(&mut self, cx: &mut Context<'_>) {
        let Some(address) = self.address else {
            self.close(cx);
            return;
        };

        let params = ConnectParams::new(&self.config, address, self.settings.connect_timeout());
        debug!(backend = %self.config.id, "connecting: {}", params.redacted());

        let session = match cx.driver.connect_start(&params) {
            Ok(session) => session,
            Err(err) => {
                warn!(backend = %self.config.id, "couldn't start connection: {}", err);
                self.close(cx);
                return;
            }
        };

        let Some(handle) = session.handle() else {
            warn!(
                backend = %self.config.id,
                "driver gave no transport handle: {}",
                session.error_message()
            );
            self.close(cx);
            return;
        };

        cx.mux.watch(handle, &self.config.id);
        self.handle = Some(handle);
        self.session = Some(session);
        self.state = ConnState::ConnectingWrite;

        self.poll_handshake(cx);
    }

    /// Step the handshake until it blocks on a read, fails, or completes.
    fn poll_handshake(&mut self, cx: &mut Context<'_>) {
        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };

            match session.connect_poll() {
                PollStatus::Writing => {
                    debug!(backend = %self.config.id, "connect poll: writing");
                    self.state = ConnState::ConnectingWrite;
                    if let Some(handle) = self.handle {
                        cx.mux.want_write(handle);
                    }
                }
                PollStatus::Reading => {
                    debug!(backend = %self.config.id, "connect poll: reading");
                    self.state = ConnState::ConnectingRead;
                    return;
                }
                PollStatus::Failed(message) => {
                    warn!(backend = %self.config.id, "connection failed: {}", message);
                    self.close(cx);
                    return;
                }
                PollStatus::Ok => {
                    info!(
                        backend = %self.config.id,
                        "connected to {}",
                        self.config.display_string()
                    );
                    self.state = ConnState::Ready;
                    self.pump(cx);
                    return;
                }
            }
        }
    }

    /// Send the active request to the server.
    fn dispatch(&mut self) -> Result<(), SqlError> {
        if self.state != ConnState::Ready || self.busy {
            debug!(backend = %self.config.id, "can't query until connection is complete");
            return Err(SqlError::BadConnection);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(SqlError::BadConnection);
        };
        let Some(req) = self.queue.front() else {
            return Ok(());
        };

        let text = substitute(&req.template, &mut req.params, |raw| session.escape(raw));
        debug!(id = %req.id, "attempting to dispatch query: {}", text);

        match session.send_query(&text) {
            Ok(()) => {
                debug!(id = %req.id, "dispatched query successfully");
                self.busy = true;
                Ok(())
            }
            Err(err) => {
                warn!(id = %req.id, "failed to dispatch query: {}", err);
                Err(SqlError::QuerySendFailed(err.0))
            }
        }
    }

    /// Start queued requests until one is on the wire. Requests the driver
    /// refuses get their error delivered and are dropped.
    fn dispatch_next(&mut self, cx: &mut Context<'_>) {
        while !self.busy && !self.queue.is_empty() {
            match self.dispatch() {
                Ok(()) => {}
                Err(SqlError::BadConnection) => return,
                Err(err) => {
                    if let Some(req) = self.queue.pop() {
                        cx.dispatcher.deliver(&req, Err(err));
                    }
                }
            }
        }
    }

    /// Ready-state work: keep the queue moving and hand out every result
    /// that is already available.
    fn pump(&mut self, cx: &mut Context<'_>) {
        loop {
            self.dispatch_next(cx);

            let Some(session) = self.session.as_mut() else {
                return;
            };

            if let Err(err) = session.consume_input() {
                warn!(backend = %self.config.id, "consuming input failed: {}", err);
                self.close(cx);
                return;
            }

            if session.is_busy() {
                debug!(backend = %self.config.id, "still busy processing command");
                return;
            }
            if !self.busy {
                return;
            }

            // A template may hold several statements; only the last result counts.
            let mut last = session.next_result();
            while let Some(next) = session.next_result() {
                last = Some(next);
            }
            self.busy = false;

            let Some(req) = self.queue.pop() else {
                continue;
            };
            let set = last.unwrap_or_else(ResultSet::empty);
            if set.status == ResultStatus::FatalError {
                debug!(
                    id = %req.id,
                    "query failed: {}",
                    set.error_message.as_deref().unwrap_or("")
                );
            }
            cx.dispatcher.deliver(&req, Ok(SqlResult::new(req.id, set)));
        }
    }

    fn flush(&mut self, cx: &mut Context<'_>) {
        if self.state == ConnState::Closed {
            return;
        }
        let (Some(session), Some(handle)) = (self.session.as_mut(), self.handle) else {
            return;
        };

        match session.flush() {
            Ok(Flush::Done) => {}
            Ok(Flush::Pending) => {
                debug!(backend = %self.config.id, "write queue not drained, waiting for write event");
                cx.mux.want_write(handle);
            }
            Err(err) => warn!(backend = %self.config.id, "error flushing write queue: {}", err),
        }
    }
}
