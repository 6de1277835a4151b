//! North process: fetches unsent readings and forwards them through the OMF
//! emitter on a single fetch-and-emit task that issues HTTP requests in
//! sequence rather than fanning them out.

pub mod emitter;
pub mod error;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

pub use emitter::Emitter;
pub use error::{NorthError, TransportError};
pub use transport::{HttpTransport, ReqwestTransport};

use crate::storage::StorageEngine;

/// Runs the fetch -> emit -> send -> advance cycle until `shutdown` fires.
/// Tracks `last_id`/`sent_id` in-process only; a restart replays from the
/// last persisted checkpoint rather than resuming mid-batch.
#[allow(clippy::too_many_arguments)]
pub async fn run_fetch_loop(
    storage: Arc<StorageEngine>,
    transport: Arc<dyn HttpTransport>,
    prefix: String,
    containers_path: String,
    values_path: String,
    headers: Vec<(String, String)>,
    block_size: i64,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<()>,
) {
    let mut emitter = Emitter::new();
    let mut last_id: i64 = 0;
    let header_pairs: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(poll_interval) => {}
        }

        match storage.fetch_readings(last_id, block_size).await {
            Ok(result) => {
                if result.rows.is_empty() {
                    continue;
                }
                let mut value_records = Vec::new();
                let mut max_id = last_id;
                for row in &result.rows {
                    let Some(reading) = reading_from_row(row) else {
                        tracing::error!("skipping malformed readings row in north fetch");
                        continue;
                    };
                    if let Some(id) = row.get("id").and_then(JsonValue::as_i64) {
                        max_id = max_id.max(id);
                    }
                    let hints = row
                        .get("reading")
                        .and_then(JsonValue::as_object)
                        .and_then(|r| r.get("OMFHint"))
                        .and_then(JsonValue::as_object);
                    value_records.extend(emitter.process_reading(&reading, &prefix, hints));
                }

                let containers_ok = emitter.flush_containers(transport.as_ref(), &containers_path, &header_pairs).await;
                if !containers_ok {
                    tracing::warn!("container flush failed, skipping this batch's value send");
                    continue;
                }

                if !value_records.is_empty() {
                    match send_values(transport.as_ref(), &values_path, &header_pairs, &value_records).await {
                        Ok(()) => last_id = max_id,
                        Err(err) => tracing::error!(error = %err, "failed to send value batch"),
                    }
                } else {
                    last_id = max_id;
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to fetch readings for north forwarding"),
        }
    }
}

async fn send_values(
    transport: &dyn HttpTransport,
    path: &str,
    headers: &[(&str, &str)],
    records: &[JsonValue],
) -> Result<(), NorthError> {
    let body = serde_json::to_vec(records)?;
    let (status, _) = transport.send("POST", path, headers, body.into()).await?;
    if !(200..300).contains(&status) {
        return Err(NorthError::Transport(TransportError::Status(status)));
    }
    Ok(())
}

fn reading_from_row(row: &serde_json::Map<String, JsonValue>) -> Option<crate::model::Reading> {
    let asset_code = row.get("asset_code")?.as_str()?;
    let user_ts = row.get("user_ts")?.as_str()?;
    let reading_obj = row.get("reading")?.as_object()?;
    let datapoints = reading_obj
        .iter()
        .filter(|(k, _)| k.as_str() != "OMFHint")
        .map(|(k, v)| (k.clone(), json_to_model_value(v)))
        .collect();
    crate::model::Reading::new(asset_code, user_ts, datapoints).ok()
}

fn json_to_model_value(v: &JsonValue) -> crate::model::Value {
    match v {
        JsonValue::String(s) => crate::model::Value::String(s.clone()),
        JsonValue::Number(n) if n.is_i64() => crate::model::Value::Integer(n.as_i64().unwrap_or_default()),
        JsonValue::Number(n) => crate::model::Value::Float(n.as_f64().unwrap_or_default()),
        other => crate::model::Value::Json(other.clone()),
    }
}
