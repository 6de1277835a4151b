//! JSON query dialect -> SQL compiler. Not a general SQL translator — only
//! the documented `where`/`aggregate`/`return`/`group`/`sort`/`timebucket`/
//! `limit`/`skip` grammar, plus the insert/update/delete payload shapes.
//!
//! The JSON dialect is inherently dynamic, so this builds SQL text (values
//! literalised inline) rather than binding typed parameters — see
//! [`crate::sql::SqlBuffer`].

use serde_json::{Map, Value as JsonValue};

use super::error::StorageError;

const TS_FORMAT: &str = "YYYY-MM-DD HH24:MI:SS.US";

/// If the column identifier parses as a numeric literal it's emitted
/// unquoted (enables `WHERE 1 = 1`); otherwise it's double-quoted.
fn quote_column(name: &str) -> String {
    if name.parse::<f64>().is_ok() {
        name.to_string()
    } else {
        format!("\"{name}\"")
    }
}

pub(crate) fn looks_like_function_call(s: &str) -> bool {
    let Some(first) = s.chars().next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    let Some(paren) = s.find('(') else {
        return false;
    };
    s.ends_with(')') && s[..paren].chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Literalises a JSON value for direct inline SQL text: strings that look
/// like a function call (`identifier(...)`) pass through unquoted, other
/// strings are single-quoted with `'` doubled, numbers/bools are literal,
/// nested objects become quoted JSON text.
pub fn literalize_value(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) if looks_like_function_call(s) => s.clone(),
        JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => "NULL".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn json_path(json_spec: &JsonValue) -> Result<(String, String), StorageError> {
    let obj = json_spec
        .as_object()
        .ok_or_else(|| StorageError::Parse("json selector must be an object".into()))?;
    let column = obj
        .get("column")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("json selector missing column".into()))?;
    let props: Vec<String> = match obj.get("properties") {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => return Err(StorageError::Schema("json selector missing properties".into())),
    };
    let last = props.last().cloned().unwrap_or_default();
    let mut path = quote_column(column);
    for p in &props {
        path = format!("{path}->'{p}'");
    }
    let existence = format!("{} ? '{}'", quote_column(column), last);
    Ok((path, existence))
}

/// Compiles a recursive `where` node: `{column, condition, value, and?, or?}`.
pub fn compile_where(node: &JsonValue) -> Result<String, StorageError> {
    let obj = node
        .as_object()
        .ok_or_else(|| StorageError::Parse("where clause must be an object".into()))?;
    let column = obj
        .get("column")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("where clause missing column".into()))?;
    let condition = obj
        .get("condition")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("where clause missing condition".into()))?;
    let value = obj.get("value");
    let col_sql = quote_column(column);

    let mut clause = match condition {
        "=" | "<" | ">" | "<=" | ">=" | "!=" => {
            let v = value.ok_or_else(|| StorageError::Schema("where clause missing value".into()))?;
            format!("{col_sql} {condition} {}", literalize_value(v))
        }
        "older" => {
            let n = value
                .and_then(JsonValue::as_i64)
                .ok_or_else(|| StorageError::Schema("\"older\" value must be an integer".into()))?;
            format!("{col_sql} < now() - interval '{n} seconds'")
        }
        "newer" => {
            let n = value
                .and_then(JsonValue::as_i64)
                .ok_or_else(|| StorageError::Schema("\"newer\" value must be an integer".into()))?;
            format!("{col_sql} > now() - interval '{n} seconds'")
        }
        "in" | "not in" => {
            let arr = value
                .and_then(JsonValue::as_array)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| {
                    StorageError::Schema(
                        "The \"value\" of a \"in\" condition must be an array and must not be empty.".into(),
                    )
                })?;
            let items: Vec<String> = arr.iter().map(literalize_value).collect();
            let op = if condition == "in" { "IN" } else { "NOT IN" };
            format!("{col_sql} {op} ({})", items.join(", "))
        }
        other => return Err(StorageError::Schema(format!("unsupported where condition: {other}"))),
    };

    if let Some(and_node) = obj.get("and") {
        clause = format!("({clause} AND {})", compile_where(and_node)?);
    }
    if let Some(or_node) = obj.get("or") {
        clause = format!("({clause} OR {})", compile_where(or_node)?);
    }
    Ok(clause)
}

fn compile_return_item(
    item: &JsonValue,
    readings: bool,
    where_extra: &mut Vec<String>,
) -> Result<String, StorageError> {
    match item {
        JsonValue::String(col) => {
            if readings && (col == "user_ts" || col == "ts") {
                Ok(format!("to_char({col}, '{TS_FORMAT}') AS \"{col}\""))
            } else {
                Ok(quote_column(col))
            }
        }
        JsonValue::Object(obj) => {
            let alias = obj.get("alias").and_then(JsonValue::as_str);

            if let Some(json_spec) = obj.get("json") {
                let (path, existence) = json_path(json_spec)?;
                where_extra.push(existence.clone());
                let last_key = existence
                    .rsplit('\'')
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let alias_name = alias.unwrap_or(&last_key);
                return Ok(format!("{path} AS \"{alias_name}\""));
            }

            let column = obj
                .get("column")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| StorageError::Schema("return object missing column".into()))?;

            let sql = if let Some(fmt) = obj.get("format").and_then(JsonValue::as_str) {
                format!("to_char({}, '{fmt}')", quote_column(column))
            } else if let Some(tz) = obj.get("timezone").and_then(JsonValue::as_str) {
                format!("{} AT TIME ZONE '{tz}'", quote_column(column))
            } else if readings && (column == "user_ts" || column == "ts") {
                format!("to_char({}, '{TS_FORMAT}')", quote_column(column))
            } else {
                quote_column(column)
            };

            let forced_alias = if readings && (column == "user_ts" || column == "ts") {
                Some(alias.unwrap_or(column))
            } else {
                alias
            };

            Ok(match forced_alias {
                Some(a) => format!("{sql} AS \"{a}\""),
                None => sql,
            })
        }
        _ => Err(StorageError::Parse("return entries must be strings or objects".into())),
    }
}

fn compile_aggregate_item(item: &JsonValue, readings: bool) -> Result<String, StorageError> {
    let obj = item
        .as_object()
        .ok_or_else(|| StorageError::Parse("aggregate entries must be objects".into()))?;
    let op = obj
        .get("operation")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("aggregate missing operation".into()))?;
    let alias = obj.get("alias").and_then(JsonValue::as_str);

    if let Some(json_spec) = obj.get("json") {
        let (path, _existence) = json_path(json_spec)?;
        let alias_name = alias.map_or_else(|| format!("{op}_json"), str::to_string);
        return Ok(format!("{op}({path}) AS \"{alias_name}\""));
    }

    let column = obj.get("column").and_then(JsonValue::as_str).unwrap_or("*");
    let expr = if op.eq_ignore_ascii_case("count") {
        column.to_string()
    } else if readings && column == "user_ts" {
        format!("to_char(user_ts, '{TS_FORMAT}')")
    } else if column == "*" {
        "*".to_string()
    } else {
        quote_column(column)
    };
    let alias_name = alias.map_or_else(|| format!("{op}_{column}"), str::to_string);
    Ok(format!("{op}({expr}) AS \"{alias_name}\""))
}

fn compile_group(group: &JsonValue) -> Result<(String, String), StorageError> {
    match group {
        JsonValue::String(col) => {
            let q = quote_column(col);
            Ok((q.clone(), q))
        }
        JsonValue::Object(obj) => {
            let column = obj
                .get("column")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| StorageError::Schema("group missing column".into()))?;
            let alias = obj.get("alias").and_then(JsonValue::as_str).unwrap_or(column);
            let q = quote_column(column);
            let expr = obj
                .get("format")
                .and_then(JsonValue::as_str)
                .map_or_else(|| q.clone(), |fmt| format!("to_char({q}, '{fmt}')"));
            Ok((format!("{expr} AS \"{alias}\""), expr))
        }
        _ => Err(StorageError::Parse("group must be a string or object".into())),
    }
}

/// Returns `(select_expr, group_by_expr, order_by_expr)`.
fn compile_timebucket(tb: &JsonValue) -> Result<(String, String, String), StorageError> {
    let obj = tb
        .as_object()
        .ok_or_else(|| StorageError::Parse("timebucket must be an object".into()))?;
    let ts_col = obj
        .get("timestamp")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("timebucket missing timestamp".into()))?;
    let size = obj.get("size").and_then(JsonValue::as_i64).unwrap_or(1);
    let alias = obj.get("alias").and_then(JsonValue::as_str).unwrap_or("timestamp");
    let floor_expr = format!("floor(extract(epoch from {})/{size})", quote_column(ts_col));
    let bucket_expr = format!("to_timestamp({size} * {floor_expr})");
    let projected = obj.get("format").and_then(JsonValue::as_str).map_or_else(
        || format!("{bucket_expr} AS \"{alias}\""),
        |fmt| format!("to_char({bucket_expr}, '{fmt}') AS \"{alias}\""),
    );
    Ok((projected, floor_expr.clone(), floor_expr))
}

fn compile_sort_item(item: &JsonValue) -> Result<String, StorageError> {
    let obj = item
        .as_object()
        .ok_or_else(|| StorageError::Parse("sort entries must be objects".into()))?;
    let column = obj
        .get("column")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| StorageError::Schema("sort missing column".into()))?;
    let dir = obj.get("direction").and_then(JsonValue::as_str).unwrap_or("ASC");
    Ok(format!("{} {}", quote_column(column), dir))
}

pub fn readings_canonical_projection() -> String {
    format!(
        "id, asset_code, read_key, reading, to_char(user_ts, '{TS_FORMAT}') AS \"user_ts\", to_char(ts, '{TS_FORMAT}') AS \"ts\""
    )
}

/// Compiles a `retrieve`/`retrieveReadings` condition document into a full
/// `SELECT`.
pub fn compile_select(table: &str, condition: &JsonValue) -> Result<String, StorageError> {
    let readings = table == "readings";
    let empty = Map::new();
    let obj = condition.as_object().unwrap_or(&empty);

    if obj.contains_key("sort") && obj.contains_key("timebucket") {
        return Err(StorageError::SortAndTimebucket);
    }
    if obj.contains_key("aggregate") && obj.contains_key("return") {
        return Err(StorageError::Schema(
            "aggregate and return are mutually exclusive".into(),
        ));
    }

    let mut where_extra = Vec::new();
    let mut select_items = Vec::new();
    let mut group_by = Vec::new();
    let mut order_by = Vec::new();

    if let Some(agg) = obj.get("aggregate") {
        let items: Vec<JsonValue> = match agg {
            JsonValue::Array(a) => a.clone(),
            other => vec![other.clone()],
        };
        for item in &items {
            select_items.push(compile_aggregate_item(item, readings)?);
        }
    } else if let Some(ret) = obj.get("return") {
        let items = ret
            .as_array()
            .ok_or_else(|| StorageError::Parse("return must be an array".into()))?;
        for item in items {
            select_items.push(compile_return_item(item, readings, &mut where_extra)?);
        }
    } else if readings {
        select_items.push(readings_canonical_projection());
    } else {
        select_items.push("*".to_string());
    }

    if let Some(group) = obj.get("group") {
        let (select_expr, group_expr) = compile_group(group)?;
        select_items.push(select_expr);
        group_by.push(group_expr);
    }

    if let Some(tb) = obj.get("timebucket") {
        let (select_expr, group_expr, order_expr) = compile_timebucket(tb)?;
        select_items.push(select_expr);
        group_by.push(group_expr);
        order_by.push(format!("{order_expr} DESC"));
    }

    let mut sql = format!("SELECT {} FROM {table}", select_items.join(", "));

    let mut where_clauses = Vec::new();
    if let Some(where_node) = obj.get("where") {
        where_clauses.push(compile_where(where_node)?);
    }
    where_clauses.extend(where_extra);
    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }

    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }

    if let Some(sort) = obj.get("sort") {
        let items: Vec<JsonValue> = match sort {
            JsonValue::Array(a) => a.clone(),
            other => vec![other.clone()],
        };
        for item in &items {
            order_by.push(compile_sort_item(item)?);
        }
    }
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    }

    if let Some(limit) = obj.get("limit") {
        let n = limit
            .as_i64()
            .ok_or_else(|| StorageError::Schema("limit must be an integer".into()))?;
        sql.push_str(&format!(" LIMIT {n}"));
    }
    if let Some(skip) = obj.get("skip") {
        let n = skip
            .as_i64()
            .ok_or_else(|| StorageError::Schema("skip must be an integer".into()))?;
        sql.push_str(&format!(" OFFSET {n}"));
    }

    Ok(sql)
}

/// Compiles a flat-object `insert` payload.
pub fn compile_insert(table: &str, row: &JsonValue) -> Result<String, StorageError> {
    let obj = row
        .as_object()
        .ok_or_else(|| StorageError::Parse("insert payload must be an object".into()))?;
    let mut cols = Vec::with_capacity(obj.len());
    let mut vals = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        cols.push(quote_column(k));
        vals.push(literalize_value(v));
    }
    Ok(format!("INSERT INTO {table} ({}) VALUES ({})", cols.join(", "), vals.join(", ")))
}

/// Compiles `update` (`{updates: [Update, ...]}`, a single `Update`, or a
/// bare `Update` with no wrapper at all) into one `UPDATE` statement per
/// entry.
pub fn compile_update(table: &str, payload: &JsonValue) -> Result<Vec<String>, StorageError> {
    let updates: Vec<JsonValue> = match payload.get("updates") {
        Some(JsonValue::Array(a)) => a.clone(),
        Some(single) => vec![single.clone()],
        None => vec![payload.clone()],
    };
    updates.iter().map(|u| compile_one_update(table, u)).collect()
}

fn compile_one_update(table: &str, update: &JsonValue) -> Result<String, StorageError> {
    let obj = update
        .as_object()
        .ok_or_else(|| StorageError::Parse("update entry must be an object".into()))?;
    let mut sets = Vec::new();

    if let Some(values) = obj.get("values").and_then(JsonValue::as_object) {
        for (k, v) in values {
            sets.push(format!("{} = {}", quote_column(k), literalize_value(v)));
        }
    }
    if let Some(exprs) = obj.get("expressions").and_then(JsonValue::as_array) {
        for e in exprs {
            let eo = e
                .as_object()
                .ok_or_else(|| StorageError::Parse("expression entry must be an object".into()))?;
            let column = eo
                .get("column")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| StorageError::Schema("expression missing column".into()))?;
            let operator = eo
                .get("operator")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| StorageError::Schema("expression missing operator".into()))?;
            let value = eo
                .get("value")
                .ok_or_else(|| StorageError::Schema("expression missing value".into()))?;
            // Right-hand column reference is double-quoted inconsistently
            // with the left-hand reference, reproduced as-is rather than
            // silently normalised.
            sets.push(format!(
                "{} = \"{column}\" {operator} {}",
                quote_column(column),
                literalize_value(value)
            ));
        }
    }
    if let Some(jprops) = obj.get("json_properties").and_then(JsonValue::as_array) {
        for jp in jprops {
            let jo = jp
                .as_object()
                .ok_or_else(|| StorageError::Parse("json_properties entry must be an object".into()))?;
            let column = jo
                .get("column")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| StorageError::Schema("json_properties missing column".into()))?;
            let path = jo
                .get("path")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| StorageError::Schema("json_properties missing path".into()))?;
            let path_parts: Vec<String> = path.iter().filter_map(|p| p.as_str().map(str::to_string)).collect();
            let value = jo
                .get("value")
                .ok_or_else(|| StorageError::Schema("json_properties missing value".into()))?;
            sets.push(format!(
                "{} = jsonb_set({}, '{{{}}}', {})",
                quote_column(column),
                quote_column(column),
                path_parts.join(","),
                literalize_value(value)
            ));
        }
    }

    if sets.is_empty() {
        return Err(StorageError::Schema(
            "update must specify at least one of values/expressions/json_properties".into(),
        ));
    }

    let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
    if let Some(w) = obj.get("condition").or_else(|| obj.get("where")) {
        sql.push_str(" WHERE ");
        sql.push_str(&compile_where(w)?);
    }
    Ok(sql)
}

/// Compiles a `delete` condition; a missing `where` is an error.
pub fn compile_delete(table: &str, condition: &JsonValue) -> Result<String, StorageError> {
    let where_node = condition.get("where").ok_or(StorageError::MissingWhere)?;
    Ok(format!("DELETE FROM {table} WHERE {}", compile_where(where_node)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn select_star_when_no_selector_and_not_readings() {
        let sql = compile_select("common_table", &json!({})).unwrap();
        assert_eq!(sql, "SELECT * FROM common_table");
    }

    #[test]
    fn readings_default_projection() {
        let sql = compile_select("readings", &json!({})).unwrap();
        assert!(sql.contains("to_char(user_ts, 'YYYY-MM-DD HH24:MI:SS.US') AS \"user_ts\""));
    }

    #[test]
    fn sort_and_timebucket_conflict() {
        let err = compile_select(
            "readings",
            &json!({"sort": {"column":"id"}, "timebucket": {"timestamp":"user_ts"}}),
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::SortAndTimebucket));
    }

    #[test]
    fn aggregate_avg_user_ts_wraps_to_char() {
        let sql = compile_select(
            "readings",
            &json!({"aggregate": {"operation":"avg", "column":"user_ts"}}),
        )
        .unwrap();
        assert!(sql.contains("avg(to_char(user_ts, 'YYYY-MM-DD HH24:MI:SS.US')) AS \"avg_user_ts\""));
    }

    #[test]
    fn in_condition_rejects_empty_array() {
        let err = compile_where(&json!({"column":"c","condition":"in","value":[]})).unwrap_err();
        match err {
            StorageError::Schema(msg) => assert_eq!(
                msg,
                "The \"value\" of a \"in\" condition must be an array and must not be empty."
            ),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn numeric_column_identifier_is_unquoted() {
        let sql = compile_where(&json!({"column":"1","condition":"=","value":1})).unwrap();
        assert_eq!(sql, "1 = 1");
    }

    #[test]
    fn delete_without_where_is_error() {
        let err = compile_delete("t", &json!({})).unwrap_err();
        assert!(matches!(err, StorageError::MissingWhere));
    }

    #[test]
    fn insert_quotes_plain_strings_and_passes_function_calls() {
        let sql = compile_insert("t", &json!({"name": "O'Brien", "created": "now()"})).unwrap();
        assert!(sql.contains("'O''Brien'"));
        assert!(sql.contains("now()"));
    }

    #[test]
    fn update_requires_at_least_one_mutation() {
        let err = compile_update("t", &json!({})).unwrap_err();
        assert!(matches!(err, StorageError::Schema(_)));
    }
}
