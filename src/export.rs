use unicode_width::UnicodeWidthStr;

use crate::db::{Field, ResultStatus, SqlResult};

const NULL_DISPLAY: &str = "NULL";

pub fn to_csv(result: &SqlResult) -> String {
    let mut output = String::new();

    // Header
    let headers: Vec<String> = result.column_names().iter().map(|c| csv_escape(c)).collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    // Rows
    for row in cells(result) {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| csv_escape(&field_to_text(cell)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

/// Rows as an array of objects keyed by column name. Values are strings or
/// `null`; the text protocol carries no types.
pub fn to_json(result: &SqlResult) -> String {
    let mut rows_json: Vec<serde_json::Value> = Vec::new();

    for row in cells(result) {
        let mut obj = serde_json::Map::new();
        for (i, cell) in row.iter().enumerate() {
            let col_name = result
                .column_name(i)
                .map(str::to_string)
                .unwrap_or_else(|| format!("column_{}", i));
            obj.insert(col_name, field_to_json(cell));
        }
        rows_json.push(serde_json::Value::Object(obj));
    }

    serde_json::to_string_pretty(&rows_json).unwrap_or_else(|_| "[]".to_string())
}

/// Aligned text table followed by a row count, or a one-line summary for
/// results without rows.
pub fn to_table(result: &SqlResult) -> String {
    match result.status() {
        ResultStatus::FatalError => {
            let mut line = format!("ERROR: {}", result.error_message().unwrap_or(""));
            if let Some(code) = result.sqlstate() {
                line.push_str(&format!(" (SQLSTATE {})", code));
            }
            line.push('\n');
            return line;
        }
        ResultStatus::EmptyQuery => return "(empty query)\n".to_string(),
        ResultStatus::CommandOk => {
            return format!("OK, {} rows affected\n", result.affected_rows().unwrap_or(0));
        }
        ResultStatus::TuplesOk => {}
    }

    let headers = result.column_names();
    let rows: Vec<Vec<String>> = cells(result)
        .iter()
        .map(|row| row.iter().map(field_to_display).collect())
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.width());
            }
        }
    }

    let mut output = String::new();
    output.push_str(&format_line(headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&separator.join("-+-"));
    output.push('\n');
    for row in &rows {
        output.push_str(&format_line(row, &widths));
    }

    let count = rows.len();
    output.push_str(&format!(
        "({} {})\n",
        count,
        if count == 1 { "row" } else { "rows" }
    ));
    output
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| pad(cell, *width))
        .collect();
    let mut line = padded.join(" | ").trim_end().to_string();
    line.push('\n');
    line
}

/// Pad by display width so wide characters line up.
fn pad(s: &str, width: usize) -> String {
    let fill = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(fill))
}

fn cells(result: &SqlResult) -> Vec<Vec<Field>> {
    (0..result.rows())
        .map(|row| {
            (0..result.cols())
                .filter_map(|col| result.value(row, col).ok())
                .collect()
        })
        .collect()
}

fn field_to_text(field: &Field) -> String {
    if field.is_null {
        return String::new();
    }
    field
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&field.value).into_owned())
}

fn field_to_display(field: &Field) -> String {
    if field.is_null {
        NULL_DISPLAY.to_string()
    } else {
        field_to_text(field)
    }
}

fn field_to_json(field: &Field) -> serde_json::Value {
    if field.is_null {
        serde_json::Value::Null
    } else {
        serde_json::Value::String(field_to_text(field))
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
