use tracing::debug;

use crate::config::ProviderConfig;
use crate::db::{
    BackendStatus, ConnectionRegistry, Context, IdGenerator, OwnerToken, Query, Request,
    RequestId, ResultDispatcher, ResultSink,
};
use crate::driver::Driver;
use crate::error::SqlError;
use crate::host::{FeatureRegistry, Multiplexer, Readiness};

/// Capabilities advertised to the rest of the host.
pub const FEATURES: [&str; 2] = ["SQL", "PgSQL"];

pub const PROVIDER_NAME: &str = "pgqueue";

/// The SQL service as the host sees it.
///
/// Callers register as owners, submit queries, and get results through
/// their sink. The host forwards readiness events with
/// [`SqlProvider::on_event`]. Everything runs on the caller's thread.
pub struct SqlProvider<M: Multiplexer> {
    mux: M,
    driver: Box<dyn Driver>,
    registry: ConnectionRegistry,
    dispatcher: ResultDispatcher,
    ids: IdGenerator,
    config: ProviderConfig,
}

impl<M: Multiplexer> SqlProvider<M> {
    pub fn new(mux: M, driver: Box<dyn Driver>, config: ProviderConfig) -> Self {
        let mut provider = Self {
            mux,
            driver,
            registry: ConnectionRegistry::new(),
            dispatcher: ResultDispatcher::new(),
            ids: IdGenerator::new(),
            config: ProviderConfig::default(),
        };
        provider.reload(config);
        provider
    }

    /// Advertise [`FEATURES`] so other modules can find the provider.
    pub fn publish(&self, features: &mut dyn FeatureRegistry) {
        for name in FEATURES {
            let published = features.publish_feature(name, PROVIDER_NAME);
            debug!(
                "{} '{}' feature",
                if published { "Published" } else { "Couldn't publish" },
                name
            );
        }
    }

    pub fn register_owner(&mut self, sink: Box<dyn ResultSink>) -> OwnerToken {
        self.dispatcher.register(sink)
    }

    /// Forget an owner. Its requests that have not started are dropped; one
    /// that is already running finishes and its result is thrown away.
    pub fn remove_owner(&mut self, owner: OwnerToken) {
        self.dispatcher.unregister(owner);
        let removed = self.registry.purge_owner(owner);
        debug!(%owner, "removed owner, purged {} queued queries", removed);
    }

    pub fn submit(&mut self, query: Query, owner: Option<OwnerToken>) -> Result<RequestId, SqlError> {
        debug!(
            "got query: '{}' with {} replacement parameters on id '{}'",
            query.template,
            query.params.len(),
            query.backend
        );

        let conn = self.registry.route(&query.backend)?;
        let req = Request::new(self.ids.next_id(), query, owner);
        let mut cx = Context {
            mux: &mut self.mux,
            dispatcher: &mut self.dispatcher,
            driver: self.driver.as_ref(),
        };
        conn.submit(req, &mut cx)
    }

    /// Readiness callback from the host for one of `backend`'s handles.
    pub fn on_event(&mut self, backend: &str, readiness: Readiness) {
        let Ok(conn) = self.registry.route(backend) else {
            debug!(backend, "event for unknown backend ignored");
            return;
        };
        let mut cx = Context {
            mux: &mut self.mux,
            dispatcher: &mut self.dispatcher,
            driver: self.driver.as_ref(),
        };
        conn.on_event(readiness, &mut cx);
    }

    /// Rebuild every connection from `config`.
    pub fn reload(&mut self, config: ProviderConfig) {
        let mut cx = Context {
            mux: &mut self.mux,
            dispatcher: &mut self.dispatcher,
            driver: self.driver.as_ref(),
        };
        self.registry
            .reload(&config.databases, &config.settings, &mut cx);
        self.config = config;
    }

    /// Close every connection.
    pub fn shutdown(&mut self) {
        let mut cx = Context {
            mux: &mut self.mux,
            dispatcher: &mut self.dispatcher,
            driver: self.driver.as_ref(),
        };
        self.registry.close_all(&mut cx);
    }

    pub fn status(&self) -> Vec<BackendStatus> {
        self.registry.status()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn mux(&self) -> &M {
        &self.mux
    }

    pub fn mux_mut(&mut self) -> &mut M {
        &mut self.mux
    }
}
