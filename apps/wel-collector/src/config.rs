use crate::adapters::power_meter::DEFAULT_API_BASE;
use crate::adapters::rf::DEFAULT_CACHE_KEY;
use crate::adapters::RetryPolicy;
use crate::daylight::Location;
use crate::derive::CopConstants;
use anyhow::{Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/wel-collector/config.json";
const DEFAULT_DEVICE_IP: &str = "192.168.68.107";
const DEFAULT_TIMEZONE: &str = "America/New_York";
const DEFAULT_LOG_BASE_URL: &str = "http://www.welserver.com/WEL1060";

fn setup_config_path() -> PathBuf {
    if let Ok(path) = env::var("WEL_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

/// Site settings written by the installer. Explicit environment variables
/// win over anything in here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    device_ip: Option<String>,
    #[serde(default)]
    device_port: Option<u16>,
    #[serde(default)]
    poll_interval_secs: Option<u64>,
    #[serde(default)]
    cache_url: Option<String>,
    #[serde(default)]
    emporia_token: Option<String>,
    #[serde(default)]
    emporia_device_gids: Option<Vec<String>>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
}

pub fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    let mut bytes = contents.into_bytes();
    match simd_json::serde::from_slice(&mut bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub device_ip: String,
    pub device_port: u16,
    pub source_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub poll_interval_secs: u64,
    pub cache_url: Option<String>,
    pub rf_cache_key: String,
    pub rf_max_age_secs: u64,
    pub emporia_api_base: String,
    pub emporia_token: Option<String>,
    pub emporia_device_gids: Vec<String>,
    /// Directory holding the logger's monthly `WEL_log_YYYY_MM.xls` files.
    pub log_base_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
    pub cop: CopConstants,
    pub rolling_hours: f64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let setup_overrides = load_setup_config_overrides(&setup_config_path());
        Self::from_lookup(|key| env::var(key).ok(), setup_overrides.as_ref())
    }

    /// Builds the config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F, setup: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let setup = setup.cloned().unwrap_or_default();
        let setup_str = |value: Option<String>| {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = var("WEL_DATABASE_URL")
            .or_else(|| var("DATABASE_URL"))
            .or_else(|| setup_str(setup.database_url.clone()));

        let device_ip = var("WEL_DEVICE_IP")
            .or_else(|| setup_str(setup.device_ip.clone()))
            .unwrap_or_else(|| DEFAULT_DEVICE_IP.to_string());
        let device_port = parse_var(&var, "WEL_DEVICE_PORT")?
            .or(setup.device_port.filter(|v| *v != 0))
            .unwrap_or(5150);

        let source_timeout_ms = parse_var(&var, "WEL_SOURCE_TIMEOUT_MS")?.unwrap_or(5_000);
        let retry_backoff_ms = parse_var(&var, "WEL_RETRY_BACKOFF_MS")?.unwrap_or(10_000);
        let poll_interval_secs = parse_var(&var, "WEL_POLL_INTERVAL_SECS")?
            .or(setup.poll_interval_secs.filter(|v| *v != 0))
            .unwrap_or(30);

        let cache_url = var("WEL_CACHE_URL").or_else(|| setup_str(setup.cache_url.clone()));
        let rf_cache_key = var("WEL_RF_CACHE_KEY").unwrap_or_else(|| DEFAULT_CACHE_KEY.to_string());
        let rf_max_age_secs = parse_var(&var, "WEL_RF_MAX_AGE_SECS")?.unwrap_or(120);

        let emporia_api_base =
            var("WEL_EMPORIA_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let emporia_token =
            var("WEL_EMPORIA_TOKEN").or_else(|| setup_str(setup.emporia_token.clone()));
        let emporia_device_gids = match var("WEL_EMPORIA_DEVICE_GIDS") {
            Some(raw) => split_list(&raw),
            None => setup
                .emporia_device_gids
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|gid| gid.trim().to_string())
                .filter(|gid| !gid.is_empty())
                .collect(),
        };

        let log_base_url = var("WEL_LOG_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_LOG_BASE_URL.to_string());

        let latitude = parse_var(&var, "WEL_LATITUDE")?
            .or(setup.latitude)
            .unwrap_or(42.485557);
        let longitude = parse_var(&var, "WEL_LONGITUDE")?
            .or(setup.longitude)
            .unwrap_or(-71.433445);
        anyhow::ensure!(
            (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude),
            "site coordinates out of range: {latitude}, {longitude}"
        );
        let timezone_name = var("WEL_TIMEZONE")
            .or_else(|| setup_str(setup.timezone.clone()))
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("WEL_TIMEZONE {timezone_name:?} is not an IANA zone"))?;

        let defaults = CopConstants::default();
        let cop = CopConstants {
            air_density: parse_var(&var, "WEL_COP_AIR_DENSITY")?.unwrap_or(defaults.air_density),
            duct_area: parse_var(&var, "WEL_COP_DUCT_AREA")?.unwrap_or(defaults.duct_area),
            air_specific_heat: parse_var(&var, "WEL_COP_AIR_SPECIFIC_HEAT")?
                .unwrap_or(defaults.air_specific_heat),
            loop_gpm: parse_var(&var, "WEL_COP_LOOP_GPM")?.unwrap_or(defaults.loop_gpm),
            gpm_to_lps: parse_var(&var, "WEL_COP_GPM_TO_LPS")?.unwrap_or(defaults.gpm_to_lps),
            water_specific_heat: parse_var(&var, "WEL_COP_WATER_SPECIFIC_HEAT")?
                .unwrap_or(defaults.water_specific_heat),
            ceiling: parse_var(&var, "WEL_COP_CEILING")?.unwrap_or(defaults.ceiling),
        };
        let rolling_hours = parse_var(&var, "WEL_ROLLING_HOURS")?.unwrap_or(3.0);

        let db_pool_size = parse_var(&var, "WEL_DB_POOL_SIZE")?.unwrap_or(5);
        let otlp_endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database_url,
            db_pool_size,
            device_ip,
            device_port,
            source_timeout_ms,
            retry_backoff_ms,
            poll_interval_secs,
            cache_url,
            rf_cache_key,
            rf_max_age_secs,
            emporia_api_base,
            emporia_token,
            emporia_device_gids,
            log_base_url,
            latitude,
            longitude,
            timezone,
            cop,
            rolling_hours,
            otlp_endpoint,
        })
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url.as_deref().context(
            "WEL_DATABASE_URL or DATABASE_URL is required (or present as database_url in the setup config)",
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.source_timeout_ms),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rf_max_age(&self) -> Duration {
        Duration::from_secs(self.rf_max_age_secs)
    }

    pub fn location(&self) -> Location {
        Location {
            latitude: self.latitude,
            longitude: self.longitude,
            zone: self.timezone,
        }
    }

    /// Power-meter polling needs both a token and at least one device.
    pub fn power_meter_enabled(&self) -> bool {
        self.emporia_token.is_some() && !self.emporia_device_gids.is_empty()
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(None),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '+'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}
