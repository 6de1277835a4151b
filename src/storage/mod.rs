//! Storage engine: JSON-dialect -> SQL compiler plus the append/fetch/purge
//! operations the ingest and north sides depend on.
//!
//! Built on `sqlx::PgPool`, with `PgPoolOptions` for pool setup and
//! `sqlx::migrate!()` to apply migrations on connect.

pub mod dialect;
pub mod error;
pub mod resultset;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use error::{ErrorSink, StorageError, TracingErrorSink};
pub use resultset::QueryResult;

use crate::model;
use crate::sql::SqlBuffer;

#[tracing::instrument(skip(url), err)]
pub async fn connect(url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(StorageError::from_sqlx)?;
    tracing::info!("connected to postgres");

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("migrations applied");

    Ok(pool)
}

pub struct StorageEngine {
    pool: PgPool,
    error_sink: Arc<dyn ErrorSink>,
    last_conn_failure: Mutex<Option<Instant>>,
}

impl StorageEngine {
    pub fn new(pool: PgPool) -> Self {
        Self::with_error_sink(pool, Arc::new(TracingErrorSink))
    }

    pub fn with_error_sink(pool: PgPool, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            pool,
            error_sink,
            last_conn_failure: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Routes a storage error through the injected `ErrorSink`.
    /// Connection-failure logging is rate-limited to one line per 5 minutes
    /// so a dead database doesn't flood the log on every query.
    fn note_failure(&self, op: &str, err: StorageError) -> StorageError {
        let is_connection_failure = matches!(
            &err,
            StorageError::Db(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
        );
        if is_connection_failure {
            let mut last = self.last_conn_failure.lock().expect("lock poisoned");
            let now = Instant::now();
            let should_log = last.is_none_or(|t| now.duration_since(t) >= Duration::from_secs(300));
            if should_log {
                self.error_sink.record(op, &err.to_string(), true);
                *last = Some(now);
            }
        } else {
            self.error_sink.record(op, &err.to_string(), false);
        }
        err
    }

    #[tracing::instrument(skip(self, condition), err)]
    pub async fn retrieve(&self, table: &str, condition: &JsonValue) -> Result<QueryResult, StorageError> {
        let sql = dialect::compile_select(table, condition)?;
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.note_failure("retrieve", StorageError::from_sqlx(e)))?;
        QueryResult::from_rows(rows)
    }

    pub async fn retrieve_readings(&self, condition: &JsonValue) -> Result<QueryResult, StorageError> {
        self.retrieve("readings", condition).await
    }

    #[tracing::instrument(skip(self, row), err)]
    pub async fn insert(&self, table: &str, row: &JsonValue) -> Result<i64, StorageError> {
        let sql = dialect::compile_insert(table, row)?;
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| self.note_failure("insert", StorageError::from_sqlx(e)))?;
        Ok(i64::try_from(result.rows_affected()).unwrap_or(i64::MAX))
    }

    #[tracing::instrument(skip(self, payload), err)]
    pub async fn update(&self, table: &str, payload: &JsonValue) -> Result<i64, StorageError> {
        let statements = dialect::compile_update(table, payload)?;
        let mut affected = 0i64;
        for sql in statements {
            let result = sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| self.note_failure("update", StorageError::from_sqlx(e)))?;
            affected += i64::try_from(result.rows_affected()).unwrap_or(0);
        }
        Ok(affected)
    }

    #[tracing::instrument(skip(self, condition), err)]
    pub async fn delete(&self, table: &str, condition: &JsonValue) -> Result<i64, StorageError> {
        let sql = dialect::compile_delete(table, condition)?;
        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| self.note_failure("delete", StorageError::from_sqlx(e)))?;
        Ok(i64::try_from(result.rows_affected()).unwrap_or(i64::MAX))
    }

    /// Batch-appends readings. Invalid rows (bad `user_ts`, missing
    /// required fields) are logged and skipped; the rest of the batch still
    /// commits.
    #[tracing::instrument(skip(self, payload), err)]
    pub async fn append_readings(&self, payload: &JsonValue) -> Result<i64, StorageError> {
        let readings = payload
            .get("readings")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| StorageError::Schema("payload.readings must be an array".into()))?;

        let mut rows_sql = Vec::with_capacity(readings.len());
        for (idx, row) in readings.iter().enumerate() {
            match literalize_reading_row(row) {
                Some(sql) => rows_sql.push(sql),
                None => tracing::error!(index = idx, "invalid reading, skipping row"),
            }
        }

        if rows_sql.is_empty() {
            return Ok(0);
        }

        let mut buf = SqlBuffer::new();
        buf.push_str("INSERT INTO readings (asset_code, user_ts, read_key, reading) VALUES ")
            .push_str(&rows_sql.join(", "));
        let sql = buf.coalesce();

        let result = sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| self.note_failure("appendReadings", StorageError::from_sqlx(e)))?;
        Ok(i64::try_from(result.rows_affected()).unwrap_or(i64::MAX))
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn fetch_readings(&self, from_id: i64, block_size: i64) -> Result<QueryResult, StorageError> {
        let sql = format!(
            "SELECT {} FROM readings WHERE id > {from_id} ORDER BY id LIMIT {block_size}",
            dialect::readings_canonical_projection()
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.note_failure("fetchReadings", StorageError::from_sqlx(e)))?;
        QueryResult::from_rows(rows)
    }

    /// `age == 0` is replaced with `round((now - oldest(user_ts)) / 360)` —
    /// this computes hours/10, not hours, despite the name. Preserved
    /// exactly rather than silently corrected, since existing callers already
    /// compensate for it.
    #[tracing::instrument(skip(self), err)]
    pub async fn purge_readings(&self, age_hours: i64, flags: i32, sent_id: i64) -> Result<JsonValue, StorageError> {
        let age = if age_hours == 0 {
            let computed: Option<f64> =
                sqlx::query_scalar("SELECT round(extract(epoch from (now() - min(user_ts)))/360) FROM readings")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| self.note_failure("purgeReadings", StorageError::from_sqlx(e)))?;
            computed.unwrap_or(0.0) as i64
        } else {
            age_hours
        };

        let unsent_purged: i64 = if flags & 1 == 0 {
            sqlx::query_scalar(&format!(
                "SELECT count(*) FROM readings WHERE user_ts < now() - interval '{age} hours' AND id > {sent_id}"
            ))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.note_failure("purgeReadings", StorageError::from_sqlx(e)))?
        } else {
            0
        };

        let mut delete_sql = format!("DELETE FROM readings WHERE user_ts < now() - interval '{age} hours'");
        if flags & 1 != 0 {
            delete_sql.push_str(&format!(" AND id < {sent_id}"));
        }
        let result = sqlx::query(&delete_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| self.note_failure("purgeReadings", StorageError::from_sqlx(e)))?;
        let removed = i64::try_from(result.rows_affected()).unwrap_or(i64::MAX);

        let unsent_retained: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM readings WHERE id > {sent_id}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.note_failure("purgeReadings", StorageError::from_sqlx(e)))?;
        let readings_remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM readings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.note_failure("purgeReadings", StorageError::from_sqlx(e)))?;

        Ok(serde_json::json!({
            "removed": removed,
            "unsentPurged": unsent_purged,
            "unsentRetained": unsent_retained,
            "readings": readings_remaining,
        }))
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn table_size(&self, table: &str) -> Result<i64, StorageError> {
        sqlx::query_scalar("SELECT pg_total_relation_size($1::regclass)")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.note_failure("tableSize", StorageError::from_sqlx(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink(AtomicUsize);

    impl ErrorSink for CountingSink {
        fn record(&self, _op: &str, _reason: &str, _retriable: bool) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn engine_with_sink(sink: Arc<CountingSink>) -> StorageEngine {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/doesnotmatter")
            .expect("lazy pool construction does not touch the network");
        StorageEngine::with_error_sink(pool, sink)
    }

    #[test]
    fn connection_failures_are_logged_at_most_once_per_window() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let engine = engine_with_sink(sink.clone());

        engine.note_failure("retrieve", StorageError::Db(sqlx::Error::PoolClosed));
        engine.note_failure("retrieve", StorageError::Db(sqlx::Error::PoolClosed));
        assert_eq!(sink.0.load(Ordering::Relaxed), 1);

        *engine.last_conn_failure.lock().expect("lock poisoned") =
            Some(Instant::now() - Duration::from_secs(301));
        engine.note_failure("retrieve", StorageError::Db(sqlx::Error::PoolClosed));
        assert_eq!(sink.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn non_connection_failures_are_always_logged() {
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let engine = engine_with_sink(sink.clone());

        engine.note_failure("insert", StorageError::Schema("bad row".into()));
        engine.note_failure("insert", StorageError::Schema("bad row".into()));
        assert_eq!(sink.0.load(Ordering::Relaxed), 2);
    }
}

fn literalize_reading_row(row: &JsonValue) -> Option<String> {
    let obj = row.as_object()?;
    let asset_code = obj.get("asset_code").and_then(JsonValue::as_str)?;
    let user_ts_raw = obj.get("user_ts").and_then(JsonValue::as_str)?;
    let reading = obj.get("reading")?;

    let user_ts_sql = if dialect::looks_like_function_call(user_ts_raw) {
        user_ts_raw.to_string()
    } else {
        let normalized = model::normalize_timestamp(user_ts_raw)?;
        format!("'{normalized}'")
    };

    let read_key_sql = match obj.get("read_key").and_then(JsonValue::as_str) {
        Some(k) if k != "None" => format!("'{}'", k.replace('\'', "''")),
        _ => "NULL".to_string(),
    };

    let reading_sql = format!("'{}'", reading.to_string().replace('\'', "''"));

    Some(format!(
        "('{}', {user_ts_sql}, {read_key_sql}, {reading_sql})",
        asset_code.replace('\'', "''")
    ))
}
