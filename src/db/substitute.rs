use std::collections::VecDeque;

use tracing::debug;

/// Build the text sent to the server from a template and its parameters.
///
/// Each `?` is replaced by the next parameter, escaped with `escape`, in
/// order. Parameters are taken off the front of `params`. When a `?` is
/// reached with no parameter left, substitution stops and the rest of the
/// template, that `?` included, is copied unchanged. Surplus parameters are
/// left in `params`.
pub fn substitute<F>(template: &str, params: &mut VecDeque<String>, escape: F) -> String
where
    F: Fn(&str) -> String,
{
    // Escaping at most doubles every parameter.
    let param_len: usize = params.iter().map(String::len).sum();
    let mut query = String::with_capacity(template.len() + param_len * 2);

    for (pos, ch) in template.char_indices() {
        if ch != '?' {
            query.push(ch);
            continue;
        }

        match params.pop_front() {
            Some(param) => {
                let escaped = escape(&param);
                debug!("appended {} bytes of escaped string onto the query", escaped.len());
                query.push_str(&escaped);
            }
            None => {
                debug!("found a substitution location but no parameter to substitute");
                query.push_str(&template[pos..]);
                break;
            }
        }
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_escape(raw: &str) -> String {
        raw.replace('\'', "''")
    }

    fn params(values: &[&str]) -> VecDeque<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_all_placeholders_replaced_in_order() {
        let mut p = params(&["alice", "42"]);
        let text = substitute(
            "SELECT * FROM users WHERE name = '?' AND age = ?",
            &mut p,
            quote_escape,
        );
        assert_eq!(text, "SELECT * FROM users WHERE name = 'alice' AND age = 42");
        assert!(p.is_empty());
    }

    #[test]
    fn test_parameters_are_escaped() {
        let mut p = params(&["O'Brien'; DROP TABLE users; --"]);
        let text = substitute("SELECT '?'", &mut p, quote_escape);
        assert_eq!(text, "SELECT 'O''Brien''; DROP TABLE users; --'");
    }

    #[test]
    fn test_missing_parameters_leave_remainder_verbatim() {
        let mut p = params(&["1"]);
        let text = substitute("SELECT ?, ?, '?' FROM t", &mut p, quote_escape);
        assert_eq!(text, "SELECT 1, ?, '?' FROM t");
    }

    #[test]
    fn test_no_parameters_at_all() {
        let mut p = VecDeque::new();
        let text = substitute("SELECT ? WHERE x = ?", &mut p, quote_escape);
        assert_eq!(text, "SELECT ? WHERE x = ?");
    }

    #[test]
    fn test_surplus_parameters_are_left() {
        let mut p = params(&["a", "b", "c"]);
        let text = substitute("VALUES ('?')", &mut p, quote_escape);
        assert_eq!(text, "VALUES ('a')");
        assert_eq!(p, params(&["b", "c"]));
    }

    #[test]
    fn test_template_without_placeholders() {
        let mut p = params(&["unused"]);
        let text = substitute("SELECT now()", &mut p, quote_escape);
        assert_eq!(text, "SELECT now()");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_multibyte_text_is_preserved() {
        let mut p = params(&["naïve"]);
        let text = substitute("SELECT 'ü?ß'", &mut p, quote_escape);
        assert_eq!(text, "SELECT 'ünaïveß'");
    }

    #[test]
    fn test_worst_case_escaping_fits() {
        let mut p = params(&["''''"]);
        let text = substitute("?", &mut p, quote_escape);
        assert_eq!(text, "''''''''");
        assert!(text.capacity() >= text.len());
    }
}
