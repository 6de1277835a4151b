//! OMF linked-data emitter: incremental, idempotent container/asset/link
//! emission interleaved with value records.
//!
//! Memoisation tables are instance fields rather than process-globals — the
//! emitter is owned by a single fetch loop, so there's no need to share the
//! `containers`/memoisation sets across threads.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde_json::json;

use crate::model::{Reading, Value};

use super::transport::HttpTransport;

const ASSET_TYPE: &str = "FledgeAsset";
const OMF_HINT_DATAPOINT: &str = "OMFHint";
const ASSET_NAME_HINT: &str = "OMFTagNameHint";
const ASSET_TAG_HINT: &str = "OMFTagHint";

pub struct Emitter {
    asset_sent: HashSet<String>,
    container_sent: HashMap<String, &'static str>,
    link_sent: HashSet<String>,
    containers: Vec<serde_json::Value>,
}

impl Emitter {
    pub fn new() -> Self {
        Self {
            asset_sent: HashSet::new(),
            container_sent: HashMap::new(),
            link_sent: HashSet::new(),
            containers: Vec::new(),
        }
    }

    /// Builds the value-record fragment for one reading, memoising
    /// asset/container/link definitions as a side effect. `hints` is the
    /// reading's own `OMFHint` object, if present, keyed by datapoint name.
    pub fn process_reading(
        &mut self,
        reading: &Reading,
        prefix: &str,
        hints: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Vec<serde_json::Value> {
        let asset_name = hints
            .and_then(|h| h.get(ASSET_NAME_HINT).or_else(|| h.get(ASSET_TAG_HINT)))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| format!("{prefix}{}", reading.asset_code), str::to_string);

        let mut records = Vec::new();

        if self.asset_sent.insert(asset_name.clone()) {
            records.push(json!({
                "typeid": ASSET_TYPE,
                "values": [{"AssetId": asset_name, "Name": asset_name}],
            }));
        }

        let user_time = format!("{}Z", reading.formatted_user_time());

        for (name, value) in reading.datapoints() {
            if name == OMF_HINT_DATAPOINT {
                continue;
            }
            let Some(base_type) = value.omf_base_type() else {
                continue;
            };

            let link = format!("{asset_name}_{name}");
            if !self.container_sent.contains_key(&link) {
                self.send_container(&link, name, base_type);
            }

            if self.link_sent.insert(link.clone()) {
                records.push(json!({
                    "typeid": "__Link",
                    "values": [{
                        "source": {"typeid": ASSET_TYPE, "index": asset_name},
                        "target": {"containerid": link},
                    }],
                }));
            }

            records.push(omf_value_record(&link, base_type, value, &user_time));
        }

        records
    }

    fn send_container(&mut self, link: &str, dp_name: &str, base_type: &'static str) {
        self.container_sent.insert(link.to_string(), base_type);
        self.containers.push(json!({
            "id": link,
            "typeid": base_type,
            "name": dp_name,
            "datasource": "Fledge",
        }));
    }

    /// POSTs the accumulated container definitions and empties the buffer
    /// on success. A 400 is a non-fatal rejection (warn, `false`); any other
    /// failure is an error (`false`). `true` leaves the buffer empty and
    /// lets the caller proceed with the value batch.
    pub async fn flush_containers(
        &mut self,
        transport: &dyn HttpTransport,
        path: &str,
        headers: &[(&str, &str)],
    ) -> bool {
        if self.containers.is_empty() {
            return true;
        }
        let body = match serde_json::to_vec(&self.containers) {
            Ok(b) => Bytes::from(b),
            Err(err) => {
                tracing::error!(error = %err, "failed to serialise container batch");
                return false;
            }
        };
        match transport.send("POST", path, headers, body).await {
            Ok((status, _)) if (200..300).contains(&status) => {
                self.containers.clear();
                true
            }
            Ok((400, _)) => {
                tracing::warn!("north endpoint rejected container batch (400)");
                false
            }
            Ok((status, _)) => {
                tracing::error!(status, "container batch send failed");
                false
            }
            Err(err) => {
                tracing::error!(error = %err, "container batch send failed");
                false
            }
        }
    }

    /// Clears all memoisation state; call on connection reset or when the
    /// remote signals schema loss.
    pub fn invalidate(&mut self) {
        self.asset_sent.clear();
        self.container_sent.clear();
        self.link_sent.clear();
        self.containers.clear();
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

fn omf_value_record(link: &str, base_type: &str, value: &Value, user_time: &str) -> serde_json::Value {
    let scalar = match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        _ => serde_json::Value::Null,
    };
    json!({
        "containerid": link,
        "values": [{base_type: scalar, "Time": user_time}],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(asset: &str, dp_name: &str, value: Value) -> Reading {
        Reading::new(asset, "2024-01-02 03:04:05.100000+00:00", vec![(dp_name.into(), value)]).unwrap()
    }

    #[test]
    fn first_call_emits_asset_container_and_link_second_does_not() {
        let mut emitter = Emitter::new();
        let r = reading("sensor", "temp", Value::Float(21.5));

        let first = emitter.process_reading(&r, "", None);
        assert!(first.iter().any(|v| v["typeid"] == "FledgeAsset"));
        assert!(first.iter().any(|v| v["typeid"] == "__Link"));
        assert_eq!(emitter.containers.len(), 1);
        assert_eq!(emitter.containers[0]["id"], "sensor_temp");
        assert_eq!(emitter.containers[0]["typeid"], "Double");

        let second = emitter.process_reading(&r, "", None);
        assert!(!second.iter().any(|v| v["typeid"] == "FledgeAsset"));
        assert!(!second.iter().any(|v| v["typeid"] == "__Link"));
        assert!(second.iter().any(|v| v["containerid"] == "sensor_temp"));
        assert_eq!(emitter.containers.len(), 1);
    }

    #[test]
    fn reserved_hint_datapoint_is_skipped() {
        let mut emitter = Emitter::new();
        let r = reading("sensor", OMF_HINT_DATAPOINT, Value::String("x".into()));
        let records = emitter.process_reading(&r, "", None);
        assert!(records.iter().all(|v| v["typeid"] == "FledgeAsset"));
    }

    #[test]
    fn unsupported_value_tag_emits_nothing_for_that_datapoint() {
        let mut emitter = Emitter::new();
        let r = reading("sensor", "blob", Value::Buffer(vec![1, 2, 3]));
        let records = emitter.process_reading(&r, "", None);
        assert!(records.iter().all(|v| v["typeid"] == "FledgeAsset"));
        assert!(emitter.containers.is_empty());
    }

    #[test]
    fn invalidate_clears_all_memoisation() {
        let mut emitter = Emitter::new();
        let r = reading("sensor", "temp", Value::Integer(1));
        emitter.process_reading(&r, "", None);
        emitter.invalidate();
        assert!(emitter.asset_sent.is_empty());
        assert!(emitter.container_sent.is_empty());
        assert!(emitter.link_sent.is_empty());
        assert!(emitter.containers.is_empty());
    }
}
