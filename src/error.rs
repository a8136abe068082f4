use thiserror::Error;

/// Errors surfaced to callers of the provider.
///
/// Query failures reported by the server itself are not errors here: they
/// arrive as a delivered result whose status is `FatalError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlError {
    /// No backend is configured under the requested id.
    #[error("no database configured with id '{0}'")]
    BadIdentifier(String),
    /// A query was attempted on a connection that is not ready.
    #[error("can't query until connection is complete")]
    BadConnection,
    /// The driver refused to send the query.
    #[error("failed to dispatch query: {0}")]
    QuerySendFailed(String),
    /// Lookup of a column that the result does not have.
    #[error("no such column: {0}")]
    BadColumnName(String),
    /// The connection closed while the request was still queued or running.
    #[error("connection to '{0}' was lost before the query completed")]
    ConnectionLost(String),
    /// The host refused to start a name lookup.
    #[error("could not resolve host: {0}")]
    Resolve(String),
}

/// Error text reported by the database driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db_err) => Self(db_err.message().to_string()),
            None => Self(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SqlError::BadIdentifier("ghost-db".into()).to_string(),
            "no database configured with id 'ghost-db'"
        );
        assert_eq!(
            SqlError::BadConnection.to_string(),
            "can't query until connection is complete"
        );
        assert_eq!(
            SqlError::QuerySendFailed("broken pipe".into()).to_string(),
            "failed to dispatch query: broken pipe"
        );
        assert_eq!(DriverError::new("boom").to_string(), "boom");
    }
}
