//! The database driver as seen by a connection: a non-blocking handshake
//! that is polled step by step, and a one-query-at-a-time protocol whose
//! results are read once the driver stops being busy.

pub mod postgres;

use std::net::IpAddr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::db::ResultSet;
use crate::error::DriverError;
use crate::host::Handle;

/// What the handshake needs next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Wait for the handle to become readable.
    Reading,
    /// The driver wants to write; poll again right away.
    Writing,
    Failed(String),
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    Done,
    /// Output is still buffered; ask for a write event and flush again.
    Pending,
}

/// A single session with a backend.
///
/// Dropping the session closes it.
pub trait Session {
    /// The transport handle to watch, if the session has one.
    fn handle(&self) -> Option<Handle>;

    fn connect_poll(&mut self) -> PollStatus;

    /// Escape `raw` so it can sit inside a single-quoted literal.
    fn escape(&self, raw: &str) -> String;

    /// Start executing `text`. Only one query may be outstanding.
    fn send_query(&mut self, text: &str) -> Result<(), DriverError>;

    /// Read whatever the server has sent. Fails if the session is gone.
    fn consume_input(&mut self) -> Result<(), DriverError>;

    /// True while a result is still being produced.
    fn is_busy(&self) -> bool;

    /// The next result of the last query, one per statement.
    fn next_result(&mut self) -> Option<ResultSet>;

    fn flush(&mut self) -> Result<Flush, DriverError>;

    fn error_message(&self) -> String;
}

pub trait Driver {
    /// Begin connecting. The returned session is polled with
    /// [`Session::connect_poll`] until it reports `Ok` or `Failed`.
    fn connect_start(&self, params: &ConnectParams) -> Result<Box<dyn Session>, DriverError>;
}

/// Everything a driver needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    /// Numeric address; name resolution already happened.
    pub address: IpAddr,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub ca_cert_path: Option<String>,
    pub connect_timeout: Duration,
}

impl ConnectParams {
    pub fn new(config: &DatabaseConfig, address: IpAddr, connect_timeout: Duration) -> Self {
        Self {
            address,
            port: config.port,
            dbname: config.name.clone(),
            user: config.username.clone(),
            password: config.password.clone(),
            ssl: config.ssl,
            ca_cert_path: config.ca_cert_path.clone(),
            connect_timeout,
        }
    }

    /// libpq style `key = 'value'` description of the target with the
    /// password masked, for logs. Empty fields are left out.
    pub fn redacted(&self) -> String {
        let mut parts = vec![
            format!("connect_timeout = '{}'", self.connect_timeout.as_secs()),
            format!("hostaddr = {}", quote_conn_value(&self.address.to_string())),
        ];
        if self.port != 0 {
            parts.push(format!("port = '{}'", self.port));
        }
        if !self.dbname.is_empty() {
            parts.push(format!("dbname = {}", quote_conn_value(&self.dbname)));
        }
        if !self.user.is_empty() {
            parts.push(format!("user = {}", quote_conn_value(&self.user)));
        }
        if !self.password.is_empty() {
            parts.push("password = '********'".to_string());
        }
        if self.ssl {
            parts.push("sslmode = 'require'".to_string());
        }
        parts.join(" ")
    }
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}
