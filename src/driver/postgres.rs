//! [`Driver`] backed by tokio-postgres.
//!
//! The client lives in background tasks on the tokio runtime. A session
//! hands their progress to the connection through oneshot channels and
//! wakes it by posting a readable event for its handle, so the connection
//! code never awaits anything.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use postgres_native_tls::MakeTlsConnector;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::{ConnectParams, Driver, Flush, PollStatus, Session};
use crate::db::ResultSet;
use crate::error::DriverError;
use crate::host::runtime::{Notifier, TokioHost};
use crate::host::Handle;

type QueryOutcome = Result<Vec<SimpleQueryMessage>, tokio_postgres::Error>;

pub struct PgDriver {
    runtime: tokio::runtime::Handle,
    notifier: Notifier,
}

impl PgDriver {
    pub fn new(host: &TokioHost) -> Self {
        Self {
            runtime: host.runtime(),
            notifier: host.notifier(),
        }
    }
}

impl Driver for PgDriver {
    fn connect_start(&self, params: &ConnectParams) -> Result<Box<dyn Session>, DriverError> {
        let config = pg_config(params);
        let tls = if params.ssl {
            Some(build_tls_connector(params)?)
        } else {
            None
        };

        let handle = self.notifier.allocate();
        let closed = Arc::new(OnceLock::new());
        let (tx, rx) = oneshot::channel();

        let task = {
            let notifier = self.notifier.clone();
            let closed = Arc::clone(&closed);
            let timeout = params.connect_timeout;
            self.runtime.spawn(async move {
                let outcome = establish(config, tls, timeout, closed, notifier.clone(), handle).await;
                let _ = tx.send(outcome);
                notifier.readable(handle);
            })
        };

        Ok(Box::new(PgSession {
            handle,
            runtime: self.runtime.clone(),
            notifier: self.notifier.clone(),
            connecting: Some(rx),
            connect_task: Some(task),
            client: None,
            query: None,
            query_task: None,
            ready: VecDeque::new(),
            closed,
            last_error: String::new(),
        }))
    }
}

pub struct PgSession {
    handle: Handle,
    runtime: tokio::runtime::Handle,
    notifier: Notifier,
    connecting: Option<oneshot::Receiver<Result<Client, DriverError>>>,
    connect_task: Option<JoinHandle<()>>,
    client: Option<Arc<Client>>,
    query: Option<oneshot::Receiver<QueryOutcome>>,
    query_task: Option<JoinHandle<()>>,
    ready: VecDeque<ResultSet>,
    /// Set by the connection task once the server side is gone.
    closed: Arc<OnceLock<String>>,
    last_error: String,
}

impl Session for PgSession {
    fn handle(&self) -> Option<Handle> {
        Some(self.handle)
    }

    fn connect_poll(&mut self) -> PollStatus {
        if self.client.is_some() {
            return PollStatus::Ok;
        }
        let Some(rx) = self.connecting.as_mut() else {
            return PollStatus::Failed(self.last_error.clone());
        };

        match rx.try_recv() {
            Err(TryRecvError::Empty) => PollStatus::Reading,
            Ok(Ok(client)) => {
                self.connecting = None;
                self.connect_task = None;
                self.client = Some(Arc::new(client));
                PollStatus::Ok
            }
            Ok(Err(err)) => {
                self.connecting = None;
                self.last_error = err.0;
                PollStatus::Failed(self.last_error.clone())
            }
            Err(TryRecvError::Closed) => {
                self.connecting = None;
                self.last_error = "connection attempt was cancelled".to_string();
                PollStatus::Failed(self.last_error.clone())
            }
        }
    }

    fn escape(&self, raw: &str) -> String {
        escape_literal(raw)
    }

    fn send_query(&mut self, text: &str) -> Result<(), DriverError> {
        let Some(client) = self.client.as_ref() else {
            return Err(DriverError::new("no connection to the server"));
        };
        if self.query.is_some() {
            return Err(DriverError::new("another command is already in progress"));
        }
        if let Some(message) = self.closed.get() {
            return Err(DriverError::new(message.clone()));
        }

        let (tx, rx) = oneshot::channel();
        let client = Arc::clone(client);
        let notifier = self.notifier.clone();
        let handle = self.handle;
        let text = text.to_string();
        self.query_task = Some(self.runtime.spawn(async move {
            let outcome = client.simple_query(&text).await;
            let _ = tx.send(outcome);
            notifier.readable(handle);
        }));
        self.query = Some(rx);
        Ok(())
    }

    fn consume_input(&mut self) -> Result<(), DriverError> {
        if let Some(rx) = self.query.as_mut() {
            match rx.try_recv() {
                Ok(outcome) => {
                    self.query = None;
                    self.query_task = None;
                    self.ready.extend(result_sets(outcome));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => {
                    self.query = None;
                    self.last_error = "query was cancelled".to_string();
                    return Err(DriverError::new(self.last_error.clone()));
                }
            }
            return Ok(());
        }

        match self.closed.get() {
            Some(message) => {
                self.last_error = message.clone();
                Err(DriverError::new(message.clone()))
            }
            None => Ok(()),
        }
    }

    fn is_busy(&self) -> bool {
        self.query.is_some()
    }

    fn next_result(&mut self) -> Option<ResultSet> {
        self.ready.pop_front()
    }

    fn flush(&mut self) -> Result<Flush, DriverError> {
        // The client task owns the socket and writes everything it is given.
        Ok(Flush::Done)
    }

    fn error_message(&self) -> String {
        self.last_error.clone()
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.query_task.take() {
            task.abort();
        }
    }
}

/// Double single quotes so `raw` can sit inside a standard string literal.
/// NUL bytes cannot be sent at all and are dropped.
///
/// Backslashes are left alone, which is only safe while
/// `standard_conforming_strings` is on; [`pg_config`] pins it for every
/// session.
pub fn escape_literal(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\0')
        .flat_map(|c| {
            let repeat = if c == '\'' { 2 } else { 1 };
            std::iter::repeat(c).take(repeat)
        })
        .collect()
}

/// Server settings forced at startup so [`escape_literal`] stays correct
/// whatever the database or role defaults are.
const SESSION_OPTIONS: &str = "-c standard_conforming_strings=on";

/// Connection settings for tokio-postgres. Name resolution already happened,
/// so the host is always a numeric address.
pub fn pg_config(params: &ConnectParams) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&params.address.to_string())
        .port(params.port)
        .connect_timeout(params.connect_timeout)
        .application_name("pgqueue")
        .options(SESSION_OPTIONS);
    if !params.dbname.is_empty() {
        config.dbname(&params.dbname);
    }
    if !params.user.is_empty() {
        config.user(&params.user);
    }
    if !params.password.is_empty() {
        config.password(&params.password);
    }
    config.ssl_mode(if params.ssl {
        SslMode::Require
    } else {
        SslMode::Disable
    });
    config
}

/// Build a TLS connector for `sslmode = require`.
///
/// Without a CA file the server certificate is not checked. With one, the
/// certificate must chain to it; the host name is never checked since we
/// connect by address.
fn build_tls_connector(params: &ConnectParams) -> Result<MakeTlsConnector, DriverError> {
    let mut builder = native_tls::TlsConnector::builder();

    match &params.ca_cert_path {
        Some(ca_path) => {
            let pem = std::fs::read(ca_path).map_err(|e| {
                DriverError::new(format!("Failed to read CA certificate file {}: {}", ca_path, e))
            })?;
            let cert = native_tls::Certificate::from_pem(&pem)
                .map_err(|e| DriverError::new(format!("Failed to parse certificate: {}", e)))?;
            builder.add_root_certificate(cert);
            builder.danger_accept_invalid_hostnames(true);
        }
        None => {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
    }

    let connector = builder
        .build()
        .map_err(|e| DriverError::new(format!("Failed to build TLS connector: {}", e)))?;

    Ok(MakeTlsConnector::new(connector))
}

async fn establish(
    config: tokio_postgres::Config,
    tls: Option<MakeTlsConnector>,
    timeout: Duration,
    closed: Arc<OnceLock<String>>,
    notifier: Notifier,
    handle: Handle,
) -> Result<Client, DriverError> {
    let client = match tls {
        None => {
            let (client, connection) = tokio::time::timeout(timeout, config.connect(NoTls))
                .await
                .map_err(|_| DriverError::new("timeout expired"))??;
            tokio::spawn(async move {
                let message = match connection.await {
                    Ok(()) => "server closed the connection".to_string(),
                    Err(e) => DriverError::from(e).0,
                };
                debug!("connection task for {} finished: {}", handle, message);
                let _ = closed.set(message);
                notifier.readable(handle);
            });
            client
        }
        Some(tls) => {
            let (client, connection) = tokio::time::timeout(timeout, config.connect(tls))
                .await
                .map_err(|_| DriverError::new("timeout expired"))??;
            tokio::spawn(async move {
                let message = match connection.await {
                    Ok(()) => "server closed the connection".to_string(),
                    Err(e) => DriverError::from(e).0,
                };
                debug!("connection task for {} finished: {}", handle, message);
                let _ = closed.set(message);
                notifier.readable(handle);
            });
            client
        }
    };

    Ok(client)
}

/// One result set per statement, in order. Server errors become a
/// `FatalError` set carrying the SQLSTATE.
fn result_sets(outcome: QueryOutcome) -> Vec<ResultSet> {
    let messages = match outcome {
        Ok(messages) => messages,
        Err(err) => {
            let sqlstate = err.code().map(|code| code.code().to_string());
            return vec![ResultSet::error(DriverError::from(err).0, sqlstate)];
        }
    };

    let mut sets = Vec::new();
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(description) => {
                columns = Some(description.iter().map(|c| c.name().to_string()).collect());
            }
            SimpleQueryMessage::Row(row) => {
                if columns.is_none() {
                    columns = Some(row.columns().iter().map(|c| c.name().to_string()).collect());
                }
                rows.push(
                    (0..row.len())
                        .map(|i| row.get(i).map(|v| v.as_bytes().to_vec()))
                        .collect(),
                );
            }
            SimpleQueryMessage::CommandComplete(affected) => match columns.take() {
                Some(columns) => sets.push(ResultSet::tuples(columns, std::mem::take(&mut rows))),
                None => sets.push(ResultSet::command(affected)),
            },
            _ => {}
        }
    }

    if sets.is_empty() {
        sets.push(ResultSet::empty());
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tokio_postgres::config::Host;

    fn params(ssl: bool) -> ConnectParams {
        let config = DatabaseConfig {
            id: "main".into(),
            hostname: "db.internal".into(),
            port: 6432,
            name: "app".into(),
            username: "reporter".into(),
            password: "s3cret".into(),
            ssl,
            ca_cert_path: None,
        };
        ConnectParams::new(&config, "10.1.2.3".parse().unwrap(), Duration::from_secs(2))
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("plain"), "plain");
        assert_eq!(escape_literal("o'hara"), "o''hara");
        assert_eq!(escape_literal("'; DROP TABLE x; --"), "''; DROP TABLE x; --");
        assert_eq!(escape_literal("a\0b"), "ab");
        assert_eq!(escape_literal(""), "");
    }

    #[test]
    fn test_backslash_cannot_close_literal() {
        // Backslashes stay literal because every session runs with
        // standard_conforming_strings on.
        let config = pg_config(&params(false));
        assert_eq!(config.get_options(), Some("-c standard_conforming_strings=on"));

        let escaped = escape_literal("\\'; DROP TABLE users; --");
        assert_eq!(escaped, "\\''; DROP TABLE users; --");
        let text = format!("SELECT '{}'", escaped);
        // Inside the literal every quote is doubled, so the only lone quotes
        // are the two delimiters.
        let body = &text["SELECT '".len()..text.len() - 1];
        assert!(!body.replace("''", "").contains('\''));
    }

    #[test]
    fn test_pg_config() {
        let config = pg_config(&params(false));
        assert_eq!(config.get_hosts(), &[Host::Tcp("10.1.2.3".to_string())]);
        assert_eq!(config.get_ports(), &[6432]);
        assert_eq!(config.get_dbname(), Some("app"));
        assert_eq!(config.get_user(), Some("reporter"));
        assert_eq!(config.get_password(), Some(&b"s3cret"[..]));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(2)));
        assert_eq!(config.get_ssl_mode(), SslMode::Disable);
    }

    #[test]
    fn test_pg_config_ssl_and_empty_fields() {
        let mut p = params(true);
        p.password.clear();
        p.user.clear();
        let config = pg_config(&p);
        assert_eq!(config.get_ssl_mode(), SslMode::Require);
        assert_eq!(config.get_password(), None);
        assert_eq!(config.get_user(), None);
    }

    #[test]
    fn test_missing_ca_file_is_an_error() {
        let mut p = params(true);
        p.ca_cert_path = Some("/nonexistent/ca.pem".into());
        let err = build_tls_connector(&p).err().unwrap();
        assert!(err.0.contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn test_no_messages_gives_empty_result() {
        let sets = result_sets(Ok(Vec::new()));
        assert_eq!(sets, vec![ResultSet::empty()]);
    }
}
