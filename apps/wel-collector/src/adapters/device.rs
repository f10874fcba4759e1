use super::{AdapterError, SensorAdapter};
use crate::field;
use crate::telemetry::{FieldValue, Readings};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

/// Device-clock metadata carried next to the channels.
const CLOCK_ENTRIES: [&str; 2] = ["Date", "Time"];

#[derive(Debug, Deserialize)]
struct Devices {
    #[serde(rename = "Device", default)]
    entries: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "@Value", default)]
    value: String,
}

/// Polls the WEL logger's `data.xml` snapshot.
pub struct DeviceAdapter {
    http: Client,
    url: String,
}

impl DeviceAdapter {
    pub fn new(http: Client, ip: &str, port: u16) -> Self {
        Self::with_url(http, format!("http://{ip}:{port}/data.xml"))
    }

    pub fn with_url(http: Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SensorAdapter for DeviceAdapter {
    fn name(&self) -> &'static str {
        "device"
    }

    async fn fetch(&self) -> Result<Readings, AdapterError> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_device_xml(&body)
    }
}

/// Maps a `<Devices><Device Name=".." Value=".."/>…</Devices>` document onto
/// device-table fields.
pub fn parse_device_xml(body: &str) -> Result<Readings, AdapterError> {
    let devices: Devices =
        quick_xml::de::from_str(body).map_err(|err| AdapterError::Payload(err.to_string()))?;

    let mut readings = Readings::new();
    let mut unknown = Vec::new();
    for entry in devices.entries {
        let name = entry.name.trim();
        if CLOCK_ENTRIES.contains(&name) {
            continue;
        }
        match field::device_field(name) {
            Some(field) => {
                readings.insert(field, FieldValue::parse(&entry.value));
            }
            None => unknown.push(name.to_string()),
        }
    }
    if !unknown.is_empty() {
        tracing::warn!(names = ?unknown, "dropping unrecognized device channels");
    }
    Ok(readings)
}
