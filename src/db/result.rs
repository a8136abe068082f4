use std::collections::BTreeMap;

use tracing::debug;

use super::request::RequestId;
use crate::error::SqlError;

/// Outcome of one statement, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    /// The statement string was empty.
    EmptyQuery,
    /// A statement that returns no rows completed.
    CommandOk,
    /// A statement that returns rows completed.
    TuplesOk,
    /// The server rejected the statement.
    FatalError,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::EmptyQuery => "EMPTY_QUERY",
            ResultStatus::CommandOk => "COMMAND_OK",
            ResultStatus::TuplesOk => "TUPLES_OK",
            ResultStatus::FatalError => "FATAL_ERROR",
        }
    }
}

/// Rows already fetched by the driver for one statement.
///
/// Values are kept in the server's text format; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    pub status: ResultStatus,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    pub affected_rows: Option<u64>,
    pub error_message: Option<String>,
    /// SQLSTATE code for server errors.
    pub sqlstate: Option<String>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            status: ResultStatus::EmptyQuery,
            columns: vec![],
            rows: vec![],
            affected_rows: None,
            error_message: None,
            sqlstate: None,
        }
    }

    pub fn command(affected_rows: u64) -> Self {
        Self {
            status: ResultStatus::CommandOk,
            affected_rows: Some(affected_rows),
            ..Self::empty()
        }
    }

    pub fn tuples(columns: Vec<String>, rows: Vec<Vec<Option<Vec<u8>>>>) -> Self {
        let affected_rows = Some(rows.len() as u64);
        Self {
            status: ResultStatus::TuplesOk,
            columns,
            rows,
            affected_rows,
            ..Self::empty()
        }
    }

    pub fn error(message: impl Into<String>, sqlstate: Option<String>) -> Self {
        Self {
            status: ResultStatus::FatalError,
            error_message: Some(message.into()),
            sqlstate,
            ..Self::empty()
        }
    }
}

/// One value of a row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Field {
    pub value: Vec<u8>,
    pub is_null: bool,
}

impl Field {
    pub fn new(value: Option<&[u8]>) -> Self {
        match value {
            Some(bytes) => Self {
                value: bytes.to_vec(),
                is_null: false,
            },
            None => Self {
                value: Vec::new(),
                is_null: true,
            },
        }
    }

    /// The value as text, `None` for NULL.
    pub fn as_str(&self) -> Option<&str> {
        if self.is_null {
            None
        } else {
            std::str::from_utf8(&self.value).ok()
        }
    }
}

/// The result delivered to the caller that submitted a query.
///
/// Wraps the driver result without converting it; rows are read either by
/// position or through a cursor that advances one row per call.
#[derive(Debug, Clone)]
pub struct SqlResult {
    id: RequestId,
    set: ResultSet,
    current_row: usize,
}

impl SqlResult {
    pub fn new(id: RequestId, set: ResultSet) -> Self {
        debug!(
            id = %id,
            "created new result; {} rows, {} columns",
            set.rows.len(),
            set.columns.len()
        );
        Self {
            id,
            set,
            current_row: 0,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> ResultStatus {
        self.set.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.set.error_message.as_deref()
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.set.sqlstate.as_deref()
    }

    pub fn affected_rows(&self) -> Option<u64> {
        self.set.affected_rows
    }

    pub fn rows(&self) -> usize {
        self.set.rows.len()
    }

    pub fn cols(&self) -> usize {
        self.set.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.set.columns
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.set.columns.get(column).map(String::as_str)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, SqlError> {
        self.set
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| SqlError::BadColumnName(name.to_string()))
    }

    pub fn value(&self, row: usize, column: usize) -> Result<Field, SqlError> {
        self.set
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|v| Field::new(v.as_deref()))
            .ok_or_else(|| SqlError::BadColumnName(format!("#{} (row {})", column, row)))
    }

    /// Fields of the next row, or an empty list once every row was read.
    pub fn next_row(&mut self) -> Vec<Field> {
        let Some(row) = self.set.rows.get(self.current_row) else {
            return Vec::new();
        };
        let fields = row.iter().map(|v| Field::new(v.as_deref())).collect();
        self.current_row += 1;
        fields
    }

    /// Like [`SqlResult::next_row`], keyed by column name. When two columns
    /// share a name the first one is kept.
    pub fn next_row_map(&mut self) -> BTreeMap<String, Field> {
        let mut map = BTreeMap::new();
        let Some(row) = self.set.rows.get(self.current_row) else {
            return map;
        };
        for (name, value) in self.set.columns.iter().zip(row) {
            map.entry(name.clone())
                .or_insert_with(|| Field::new(value.as_deref()));
        }
        self.current_row += 1;
        map
    }

    pub fn rewind(&mut self) {
        self.current_row = 0;
    }

    pub fn result_set(&self) -> &ResultSet {
        &self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(s: &str) -> Option<Vec<u8>> {
        Some(s.as_bytes().to_vec())
    }

    fn sample() -> SqlResult {
        SqlResult::new(
            RequestId(1),
            ResultSet::tuples(
                vec!["id".into(), "name".into(), "id".into()],
                vec![
                    vec![cell("1"), cell("alice"), cell("x")],
                    vec![cell("2"), None, cell("y")],
                ],
            ),
        )
    }

    #[test]
    fn test_shape() {
        let result = sample();
        assert_eq!(result.id(), RequestId(1));
        assert_eq!(result.status(), ResultStatus::TuplesOk);
        assert_eq!(result.rows(), 2);
        assert_eq!(result.cols(), 3);
        assert_eq!(result.column_name(1), Some("name"));
        assert_eq!(result.column_name(9), None);
        assert_eq!(result.affected_rows(), Some(2));
    }

    #[test]
    fn test_column_index() {
        let result = sample();
        assert_eq!(result.column_index("name"), Ok(1));
        assert_eq!(result.column_index("id"), Ok(0));
        assert_eq!(
            result.column_index("missing"),
            Err(SqlError::BadColumnName("missing".into()))
        );
    }

    #[test]
    fn test_value_by_position() {
        let result = sample();
        assert_eq!(result.value(0, 1).unwrap().as_str(), Some("alice"));
        let null = result.value(1, 1).unwrap();
        assert!(null.is_null);
        assert!(null.value.is_empty());
        assert_eq!(null.as_str(), None);
        assert!(matches!(result.value(5, 0), Err(SqlError::BadColumnName(_))));
        assert!(matches!(result.value(0, 5), Err(SqlError::BadColumnName(_))));
    }

    #[test]
    fn test_row_cursor() {
        let mut result = sample();
        let first = result.next_row();
        assert_eq!(first.len(), 3);
        assert_eq!(first[1].as_str(), Some("alice"));

        let second = result.next_row();
        assert!(second[1].is_null);

        assert!(result.next_row().is_empty());
        assert!(result.next_row().is_empty());

        result.rewind();
        assert_eq!(result.next_row()[0].as_str(), Some("1"));
    }

    #[test]
    fn test_row_map_keeps_first_duplicate() {
        let mut result = sample();
        let map = result.next_row_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["id"].as_str(), Some("1"));
        assert_eq!(map["name"].as_str(), Some("alice"));

        let map = result.next_row_map();
        assert!(map["name"].is_null);
        assert!(result.next_row_map().is_empty());
    }

    #[test]
    fn test_cursor_shared_between_views() {
        let mut result = sample();
        result.next_row_map();
        assert_eq!(result.next_row()[0].as_str(), Some("2"));
    }

    #[test]
    fn test_error_result() {
        let result = SqlResult::new(
            RequestId(3),
            ResultSet::error("relation \"nope\" does not exist", Some("42P01".into())),
        );
        assert_eq!(result.status(), ResultStatus::FatalError);
        assert_eq!(result.status().as_str(), "FATAL_ERROR");
        assert_eq!(result.sqlstate(), Some("42P01"));
        assert!(result.error_message().unwrap().contains("nope"));
        assert_eq!(result.rows(), 0);
    }

    #[test]
    fn test_command_result() {
        let result = SqlResult::new(RequestId(4), ResultSet::command(3));
        assert_eq!(result.status(), ResultStatus::CommandOk);
        assert_eq!(result.affected_rows(), Some(3));
        assert_eq!(result.cols(), 0);
    }
}
