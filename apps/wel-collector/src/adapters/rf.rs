//! RF sensor readings, shared through memcached.
//!
//! The `rtl-bridge` binary decodes `rtl_433` JSON lines, averages them over
//! a window and publishes an [`RfSnapshot`]. The collector side reads the
//! latest snapshot through [`RfCacheAdapter`] and never waits for fresh
//! radio data.

use super::{AdapterError, SensorAdapter};
use crate::field::{self, Field};
use crate::telemetry::{FieldValue, Readings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEFAULT_CACHE_KEY: &str = "rtl";

#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError>;

    async fn set(&self, key: &str, value: &str, expiry: Duration) -> Result<(), AdapterError>;
}

/// memcached client. Connects on first use and again after a failed
/// operation; all I/O runs on the blocking pool and is bounded by
/// `io_timeout`.
pub struct MemcacheCache {
    url: String,
    io_timeout: Duration,
    client: Arc<Mutex<Option<Arc<memcache::Client>>>>,
}

impl MemcacheCache {
    pub fn new(url: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            url: connect_url(&url.into(), io_timeout),
            io_timeout,
            client: Arc::new(Mutex::new(None)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T, AdapterError>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let url = self.url.clone();
        let io_timeout = Some(self.io_timeout);
        let slot = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let client = {
                let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                match guard.as_ref() {
                    Some(client) => client.clone(),
                    None => {
                        let client = memcache::Client::connect(url.as_str())
                            .and_then(|client| {
                                client.set_read_timeout(io_timeout)?;
                                client.set_write_timeout(io_timeout)?;
                                Ok(client)
                            })
                            .map_err(|err| AdapterError::Cache(err.to_string()))?;
                        let client = Arc::new(client);
                        *guard = Some(client.clone());
                        client
                    }
                }
            };
            op(&client).map_err(|err| {
                if let Ok(mut guard) = slot.lock() {
                    *guard = None;
                }
                AdapterError::Cache(err.to_string())
            })
        })
        .await
        .map_err(|err| AdapterError::Cache(err.to_string()))?
    }
}

/// Adds a socket `timeout` (whole seconds, at least 1) to a memcache URL
/// that does not already carry one.
fn connect_url(url: &str, io_timeout: Duration) -> String {
    if url.contains("timeout=") {
        return url.to_string();
    }
    let secs = io_timeout.as_secs() + u64::from(io_timeout.subsec_nanos() > 0);
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}timeout={}", secs.max(1))
}

#[async_trait]
impl SnapshotCache for MemcacheCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
        let key = key.to_string();
        self.with_client(move |client| client.get::<String>(&key))
            .await
    }

    async fn set(&self, key: &str, value: &str, expiry: Duration) -> Result<(), AdapterError> {
        let key = key.to_string();
        let value = value.to_string();
        let expiry_secs = u32::try_from(expiry.as_secs()).unwrap_or(u32::MAX);
        self.with_client(move |client| client.set(&key, value.as_str(), expiry_secs))
            .await
    }
}

/// Averaged RF readings as published by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfSnapshot {
    pub captured_at: DateTime<Utc>,
    pub readings: BTreeMap<String, f64>,
}

pub struct RfCacheAdapter {
    cache: Arc<dyn SnapshotCache>,
    key: String,
    max_age: Duration,
}

impl RfCacheAdapter {
    pub fn new(cache: Arc<dyn SnapshotCache>, key: impl Into<String>, max_age: Duration) -> Self {
        Self {
            cache,
            key: key.into(),
            max_age,
        }
    }
}

#[async_trait]
impl SensorAdapter for RfCacheAdapter {
    fn name(&self) -> &'static str {
        "rf"
    }

    async fn fetch(&self) -> Result<Readings, AdapterError> {
        let Some(raw) = self.cache.get(&self.key).await? else {
            tracing::warn!(key = %self.key, "no RF snapshot cached");
            return Ok(Readings::new());
        };
        let snapshot: RfSnapshot =
            serde_json::from_str(&raw).map_err(|err| AdapterError::Payload(err.to_string()))?;

        let age = Utc::now().signed_duration_since(snapshot.captured_at);
        let stale = chrono::Duration::from_std(self.max_age).is_ok_and(|max_age| age > max_age);
        if stale {
            tracing::warn!(
                key = %self.key,
                captured_at = %snapshot.captured_at,
                age_secs = age.num_seconds(),
                "RF snapshot is stale; ignoring"
            );
            return Ok(Readings::new());
        }

        Ok(snapshot_readings(&snapshot))
    }
}

fn snapshot_readings(snapshot: &RfSnapshot) -> Readings {
    let mut readings = Readings::new();
    for (name, value) in &snapshot.readings {
        match field::rf_field(name) {
            Some(field) => {
                readings.insert(field, FieldValue::Number(*value));
            }
            None => tracing::warn!(name = %name, "dropping unknown RF field"),
        }
    }
    readings
}

/// Decodes one `rtl_433 -F json` line. Returns `None` for lines that are not
/// sensor JSON or come from a sensor id outside the table.
pub fn decode_line(line: &str) -> Option<Vec<(Field, f64)>> {
    let message: JsonValue = match serde_json::from_str(line.trim()) {
        Ok(value @ JsonValue::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::debug!(line, "skipping non-sensor output");
            return None;
        }
    };

    let id = match message.get("id") {
        Some(JsonValue::Number(num)) => num.to_string(),
        Some(JsonValue::String(text)) => text.clone(),
        _ => {
            tracing::debug!(line, "sensor message without id");
            return None;
        }
    };
    let sensor_id = match message.get("message_type").and_then(JsonValue::as_i64) {
        Some(message_type) => format!("{id}_{message_type}"),
        None => id,
    };

    let Some(sensor) = field::rf_sensor(&sensor_id) else {
        tracing::warn!(
            sensor_id = %sensor_id,
            model = message.get("model").and_then(JsonValue::as_str).unwrap_or("unknown"),
            "unknown RF sensor id"
        );
        return None;
    };

    Some(
        sensor
            .fields
            .iter()
            .filter_map(|(key, field)| {
                message
                    .get(*key)
                    .and_then(JsonValue::as_f64)
                    .map(|value| (*field, value))
            })
            .collect(),
    )
}

/// Running per-field sums for one averaging window.
#[derive(Debug, Default)]
pub struct RfWindow {
    sums: BTreeMap<Field, (f64, u32)>,
}

impl RfWindow {
    pub fn push(&mut self, values: impl IntoIterator<Item = (Field, f64)>) {
        for (field, value) in values {
            let entry = self.sums.entry(field).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Averages the window into a snapshot and starts a new window.
    pub fn take_snapshot(&mut self, captured_at: DateTime<Utc>) -> RfSnapshot {
        let readings = std::mem::take(&mut self.sums)
            .into_iter()
            .map(|(field, (sum, count))| (field.name().to_string(), sum / f64::from(count)))
            .collect();
        RfSnapshot {
            captured_at,
            readings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{D_ROOM_T, WEATHER_STATION_R};

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<BTreeMap<String, String>>,
        fail: bool,
    }

    #[async_trait]
    impl SnapshotCache for MemoryCache {
        async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
            if self.fail {
                return Err(AdapterError::Cache("connection refused".to_string()));
            }
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _expiry: Duration) -> Result<(), AdapterError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    async fn adapter_with(snapshot: Option<RfSnapshot>) -> RfCacheAdapter {
        let cache = Arc::new(MemoryCache::default());
        if let Some(snapshot) = snapshot {
            cache
                .set(
                    DEFAULT_CACHE_KEY,
                    &serde_json::to_string(&snapshot).unwrap(),
                    Duration::from_secs(60),
                )
                .await
                .unwrap();
        }
        RfCacheAdapter::new(cache, DEFAULT_CACHE_KEY, Duration::from_secs(120))
    }

    fn snapshot_at(captured_at: DateTime<Utc>) -> RfSnapshot {
        RfSnapshot {
            captured_at,
            readings: BTreeMap::from([
                ("D_room_T".to_string(), 19.5),
                ("weather_station_R".to_string(), 12.7),
                ("bogus_T".to_string(), 1.0),
            ]),
        }
    }

    #[test]
    fn cache_url_gets_a_socket_timeout() {
        let cache = MemcacheCache::new("memcache://127.0.0.1:11211", Duration::from_millis(5000));
        assert_eq!(cache.url(), "memcache://127.0.0.1:11211?timeout=5");
        assert_eq!(
            connect_url("memcache://cache:11211?tcp_nodelay=true", Duration::from_millis(2500)),
            "memcache://cache:11211?tcp_nodelay=true&timeout=3"
        );
        assert_eq!(
            connect_url("memcache://cache:11211?timeout=9", Duration::from_secs(1)),
            "memcache://cache:11211?timeout=9"
        );
        assert_eq!(
            connect_url("memcache://cache:11211", Duration::from_millis(10)),
            "memcache://cache:11211?timeout=1"
        );
    }

    #[test]
    fn decodes_known_sensor_lines() {
        let line = r#"{"time":"2024-01-05 12:00:01","model":"Acurite-Tower","id":2669,"channel":"A","battery_ok":1,"temperature_C":19.4,"humidity":41}"#;
        let values = decode_line(line).unwrap();
        assert!(values.contains(&(D_ROOM_T, 19.4)));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn message_type_selects_the_station_variant() {
        let line = r#"{"model":"Acurite-5n1","id":450,"message_type":56,"wind_avg_km_h":3.0}"#;
        assert!(decode_line(line).is_none());

        let line = r#"{"model":"Acurite-5n1","id":450,"message_type":6,"wind_avg_km_h":3.0,"wind_dir_deg":180.0,"rain_mm":12.7}"#;
        let values = decode_line(line).unwrap();
        assert!(values.contains(&(WEATHER_STATION_R, 12.7)));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn unknown_ids_and_noise_are_dropped() {
        assert!(decode_line(r#"{"model":"Neighbour-TPMS","id":999999,"temperature_C":3.0}"#).is_none());
        assert!(decode_line("rtl_433 version 23.11 branch master").is_none());
        assert!(decode_line("").is_none());
    }

    #[test]
    fn window_averages_each_field() {
        let mut window = RfWindow::default();
        window.push([(D_ROOM_T, 19.0)]);
        window.push([(D_ROOM_T, 20.0), (WEATHER_STATION_R, 5.0)]);
        let ts = Utc::now();

        let snapshot = window.take_snapshot(ts);
        assert_eq!(snapshot.readings["D_room_T"], 19.5);
        assert_eq!(snapshot.readings["weather_station_R"], 5.0);
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn fresh_snapshot_maps_known_fields() {
        let adapter = adapter_with(Some(snapshot_at(Utc::now()))).await;
        let readings = adapter.fetch().await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings.get(&D_ROOM_T), Some(&FieldValue::Number(19.5)));
    }

    #[tokio::test]
    async fn missing_or_stale_snapshot_is_empty() {
        let adapter = adapter_with(None).await;
        assert!(adapter.fetch().await.unwrap().is_empty());

        let stale = Utc::now() - chrono::Duration::minutes(10);
        let adapter = adapter_with(Some(snapshot_at(stale))).await;
        assert!(adapter.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_outage_is_transient() {
        let cache = Arc::new(MemoryCache {
            fail: true,
            ..MemoryCache::default()
        });
        let adapter = RfCacheAdapter::new(cache, DEFAULT_CACHE_KEY, Duration::from_secs(120));
        let err = adapter.fetch().await.unwrap_err();
        assert!(err.is_transient());
    }
}
