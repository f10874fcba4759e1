use super::{AdapterError, SensorAdapter};
use crate::field::CIRCUIT_TABLE;
use crate::telemetry::{FieldValue, Readings};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value as JsonValue;

pub const DEFAULT_API_BASE: &str = "https://api.emporiaenergy.com";
const DEFAULT_SCALE: &str = "1S";
const ENERGY_UNIT_KWH: &str = "KilowattHours";

#[derive(Deserialize)]
struct DeviceListUsagesEnvelope {
    #[serde(rename = "deviceListUsages")]
    device_list_usages: DeviceListUsages,
}

#[derive(Deserialize)]
struct DeviceListUsages {
    #[serde(default)]
    devices: Vec<UsageDevice>,
}

#[derive(Deserialize)]
struct UsageDevice {
    #[serde(rename = "deviceGid")]
    device_gid: JsonValue,
    #[serde(rename = "channelUsages", default)]
    channel_usages: Vec<ChannelUsage>,
}

#[derive(Deserialize)]
struct ChannelUsage {
    #[serde(rename = "channelNum")]
    channel_num: String,
    usage: Option<f64>,
    name: Option<String>,
    #[serde(rename = "nestedDevices", default)]
    nested_devices: Vec<UsageDevice>,
}

#[derive(Debug, Clone)]
struct Channel {
    device_gid: String,
    channel_num: String,
    name: Option<String>,
    usage_kwh: Option<f64>,
}

fn flatten_channels(devices: &[UsageDevice], out: &mut Vec<Channel>) {
    for device in devices {
        let device_gid =
            parse_device_gid(&device.device_gid).unwrap_or_else(|| "unknown".to_string());
        for channel in &device.channel_usages {
            let name = channel
                .name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            out.push(Channel {
                device_gid: device_gid.clone(),
                channel_num: channel.channel_num.trim().to_string(),
                name,
                usage_kwh: channel.usage,
            });
            flatten_channels(&channel.nested_devices, out);
        }
    }
}

/// Whole-home power meter read through the vendor's cloud usage API.
pub struct PowerMeterAdapter {
    http: Client,
    api_base: String,
    token: String,
    device_gids: Vec<String>,
}

impl PowerMeterAdapter {
    pub fn new(
        http: Client,
        api_base: impl Into<String>,
        token: impl Into<String>,
        device_gids: Vec<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            device_gids,
        }
    }
}

#[async_trait]
impl SensorAdapter for PowerMeterAdapter {
    fn name(&self) -> &'static str {
        "power_meter"
    }

    async fn fetch(&self) -> Result<Readings, AdapterError> {
        let url = format!("{}/AppAPI", self.api_base);
        let instant = Utc::now().trunc_subsecs(0).to_rfc3339();
        let joined_gids = self.device_gids.join("+");
        let body = self
            .http
            .get(url)
            .query(&[
                ("apiMethod", "getDeviceListUsages"),
                ("deviceGids", joined_gids.as_str()),
                ("instant", instant.as_str()),
                ("scale", DEFAULT_SCALE),
                ("energyUnit", ENERGY_UNIT_KWH),
            ])
            .header("authtoken", &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_usage_response(&body)
    }
}

/// Maps a `getDeviceListUsages` body onto the circuit table. Circuits the
/// response does not cover read as 0 W.
pub fn parse_usage_response(body: &str) -> Result<Readings, AdapterError> {
    let envelope: DeviceListUsagesEnvelope =
        serde_json::from_str(body).map_err(|err| AdapterError::Payload(err.to_string()))?;
    let mut channels = Vec::new();
    flatten_channels(&envelope.device_list_usages.devices, &mut channels);

    let mut readings = Readings::new();
    for (label, field) in CIRCUIT_TABLE {
        let usage = channels
            .iter()
            .find(|channel| matches_circuit(channel, label))
            .and_then(|channel| channel.usage_kwh);
        let watts = match usage {
            Some(kwh) => usage_to_average_power_w(kwh),
            None => {
                tracing::warn!(circuit = %field, label, "no usage reported for circuit; recording 0 W");
                0.0
            }
        };
        readings.insert(*field, FieldValue::Number(watts));
    }

    let unmatched: Vec<String> = channels
        .iter()
        .filter(|channel| !CIRCUIT_TABLE.iter().any(|(label, _)| matches_circuit(channel, label)))
        .map(|channel| format!("{}:{}", channel.device_gid, channel.channel_num))
        .collect();
    if !unmatched.is_empty() {
        tracing::debug!(channels = ?unmatched, "ignoring unmapped meter channels");
    }
    Ok(readings)
}

fn matches_circuit(channel: &Channel, label: &str) -> bool {
    if label == "main" && is_main_channel(&channel.channel_num) {
        return true;
    }
    channel
        .name
        .as_deref()
        .is_some_and(|name| name.to_lowercase().contains(label))
}

fn usage_to_average_power_w(usage_kwh: f64) -> f64 {
    // scale=1S reports kWh for a one second interval.
    usage_kwh * 3_600_000.0
}

fn is_main_channel(channel_num: &str) -> bool {
    let channel_num = channel_num.trim();
    if channel_num.eq_ignore_ascii_case("main") || channel_num.to_lowercase().starts_with("mains") {
        return true;
    }
    // Mains legs are reported together as "1,2,3".
    let parts: Vec<&str> = channel_num
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|part| matches!(part.parse::<u8>(), Ok(num) if (1..=3).contains(&num)))
}

fn parse_device_gid(value: &JsonValue) -> Option<String> {
    if let Some(num) = value.as_i64() {
        return Some(num.to_string());
    }
    value.as_str().map(str::to_string)
}
