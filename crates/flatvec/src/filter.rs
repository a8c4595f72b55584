//! MongoDB-shaped predicate documents translated to SQL WHERE clauses.
//!
//! A predicate is a JSON object whose keys are metadata field paths and
//! whose values are either bare scalars (shorthand equality), operator
//! objects (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$exists`, `$in`,
//! `$nin`), or nested objects extending the field path. Clauses compose
//! with `AND` and the emitted string always starts with `1=1`, so it is
//! safe to append to a `WHERE`.
//!
//! An unparseable predicate degrades to the always-true clause: the engine
//! then scans everything, which callers can detect by comparing the result
//! cardinality against the store size.

use serde_json::Value;
use tracing::warn;

/// Translate a predicate document (textual form) to a WHERE clause.
#[must_use]
pub fn to_where_clause(predicate: &str) -> String {
    match serde_json::from_str::<Value>(predicate) {
        Ok(value) => where_clause_from_value(&value),
        Err(e) => {
            warn!(error = %e, "predicate did not parse, falling back to match-all");
            "1=1".to_string()
        }
    }
}

/// Translate an already-parsed predicate document to a WHERE clause.
#[must_use]
pub fn where_clause_from_value(predicate: &Value) -> String {
    let mut out = String::from("1=1");
    if let Value::Object(map) = predicate {
        for (key, value) in map {
            process_field(key, value, &mut out);
        }
    }
    out
}

fn process_field(field_path: &str, value: &Value, out: &mut String) {
    let obj = match value {
        Value::Object(map) if !map.is_empty() => map,
        // Bare scalar (or empty object): shorthand equality.
        _ => {
            out.push_str(" AND ");
            push_extract(out, field_path);
            out.push_str(" = ");
            push_value(out, value);
            return;
        }
    };

    let mut has_operators = false;
    for (key, operand) in obj {
        if key.starts_with('$') {
            has_operators = true;
            process_comparison(field_path, key, operand, out);
        }
    }

    // No operators: a nested object extending the path with '.'
    if !has_operators {
        for (key, nested) in obj {
            let nested_path = format!("{}.{}", field_path, key);
            process_field(&nested_path, nested, out);
        }
    }
}

fn process_comparison(field_path: &str, op: &str, value: &Value, out: &mut String) {
    match op {
        "$in" => push_membership(field_path, value, out, false),
        "$nin" => push_membership(field_path, value, out, true),
        "$exists" => {
            out.push_str(" AND ");
            push_extract(out, field_path);
            if value == &Value::Bool(true) {
                out.push_str(" IS NOT NULL");
            } else {
                out.push_str(" IS NULL");
            }
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            out.push_str(" AND ");
            push_extract(out, field_path);
            out.push_str(match op {
                "$eq" => " = ",
                "$ne" => " != ",
                "$gt" => " > ",
                "$gte" => " >= ",
                "$lt" => " < ",
                _ => " <= ",
            });
            push_value(out, value);
        }
        // Unknown operators contribute nothing.
        _ => {}
    }
}

/// Emit `$in` / `$nin` over an array of candidate values.
///
/// Strings compare against the extracted value directly; non-strings go
/// through `json_each` so membership also works when the stored field is
/// itself an array. The first element decides which form is used.
/// Empty `$in` can match nothing; empty `$nin` excludes nothing.
fn push_membership(field_path: &str, value: &Value, out: &mut String, negated: bool) {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            out.push_str(if negated { " AND 1" } else { " AND 0" });
            return;
        }
    };

    let string_form = items[0].is_string();
    let joiner = if negated { " AND " } else { " OR " };

    out.push_str(" AND (");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(joiner);
        }
        if string_form {
            push_extract(out, field_path);
            out.push_str(if negated { " != " } else { " = " });
            push_value(out, item);
        } else {
            if negated {
                out.push_str("NOT ");
            }
            out.push_str("EXISTS (SELECT 1 FROM json_each(");
            push_extract(out, field_path);
            out.push_str(") WHERE value = ");
            push_value(out, item);
            out.push(')');
        }
    }
    out.push(')');
}

fn push_extract(out: &mut String, field_path: &str) {
    out.push_str("json_extract(payload, '$.");
    push_escaped(out, field_path);
    out.push_str("')");
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => {
            out.push('\'');
            push_escaped(out, s);
            out.push('\'');
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                out.push_str(&n.as_f64().unwrap_or(0.0).to_string());
            }
        }
        Value::Bool(b) => out.push_str(if *b { "1" } else { "0" }),
        Value::Null => out.push_str("NULL"),
        // Arrays/objects have no scalar SQL form; NULL never equals anything.
        _ => out.push_str("NULL"),
    }
}

/// SQL string-literal escaping: embedded quotes double up.
fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if c == '\'' {
            out.push_str("''");
        } else {
            out.push(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_equality() {
        assert_eq!(
            to_where_clause(r#"{"name":"alice"}"#),
            "1=1 AND json_extract(payload, '$.name') = 'alice'"
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            to_where_clause(r#"{"age":{"$gt":25}}"#),
            "1=1 AND json_extract(payload, '$.age') > 25"
        );
        assert_eq!(
            to_where_clause(r#"{"age":{"$lte":3.5}}"#),
            "1=1 AND json_extract(payload, '$.age') <= 3.5"
        );
        assert_eq!(
            to_where_clause(r#"{"name":{"$ne":"bob"}}"#),
            "1=1 AND json_extract(payload, '$.name') != 'bob'"
        );
    }

    #[test]
    fn test_exists() {
        assert_eq!(
            to_where_clause(r#"{"email":{"$exists":true}}"#),
            "1=1 AND json_extract(payload, '$.email') IS NOT NULL"
        );
        assert_eq!(
            to_where_clause(r#"{"email":{"$exists":false}}"#),
            "1=1 AND json_extract(payload, '$.email') IS NULL"
        );
    }

    #[test]
    fn test_in_strings_is_disjunction() {
        assert_eq!(
            to_where_clause(r#"{"tag":{"$in":["a","b"]}}"#),
            "1=1 AND (json_extract(payload, '$.tag') = 'a' OR json_extract(payload, '$.tag') = 'b')"
        );
    }

    #[test]
    fn test_in_numbers_uses_json_each() {
        assert_eq!(
            to_where_clause(r#"{"n":{"$in":[1,2]}}"#),
            "1=1 AND (EXISTS (SELECT 1 FROM json_each(json_extract(payload, '$.n')) WHERE value = 1) \
             OR EXISTS (SELECT 1 FROM json_each(json_extract(payload, '$.n')) WHERE value = 2))"
        );
    }

    #[test]
    fn test_nin_strings() {
        assert_eq!(
            to_where_clause(r#"{"tag":{"$nin":["a","b"]}}"#),
            "1=1 AND (json_extract(payload, '$.tag') != 'a' AND json_extract(payload, '$.tag') != 'b')"
        );
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        assert_eq!(to_where_clause(r#"{"tag":{"$in":[]}}"#), "1=1 AND 0");
        assert_eq!(to_where_clause(r#"{"tag":{"$nin":[]}}"#), "1=1 AND 1");
    }

    #[test]
    fn test_nested_object_composes_path() {
        assert_eq!(
            to_where_clause(r#"{"user":{"profile":{"age":{"$gte":18}}}}"#),
            "1=1 AND json_extract(payload, '$.user.profile.age') >= 18"
        );
    }

    #[test]
    fn test_multiple_fields_and_composition() {
        let clause = to_where_clause(r#"{"a":1,"b":{"$lt":5}}"#);
        assert!(clause.starts_with("1=1"));
        assert!(clause.contains("json_extract(payload, '$.a') = 1"));
        assert!(clause.contains("json_extract(payload, '$.b') < 5"));
    }

    #[test]
    fn test_quote_escaping() {
        assert_eq!(
            to_where_clause(r#"{"name":"o'brien"}"#),
            "1=1 AND json_extract(payload, '$.name') = 'o''brien'"
        );
    }

    #[test]
    fn test_bool_and_null_values() {
        assert_eq!(
            to_where_clause(r#"{"active":true}"#),
            "1=1 AND json_extract(payload, '$.active') = 1"
        );
        assert_eq!(
            to_where_clause(r#"{"gone":null}"#),
            "1=1 AND json_extract(payload, '$.gone') = NULL"
        );
    }

    #[test]
    fn test_parse_failure_is_match_all() {
        assert_eq!(to_where_clause("not json at all"), "1=1");
        assert_eq!(to_where_clause(""), "1=1");
    }

    #[test]
    fn test_empty_predicate_is_match_all() {
        assert_eq!(to_where_clause("{}"), "1=1");
    }
}
