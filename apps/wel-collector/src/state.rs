use crate::adapters::device::DeviceAdapter;
use crate::adapters::power_meter::PowerMeterAdapter;
use crate::adapters::rf::{MemcacheCache, RfCacheAdapter, SnapshotCache};
use crate::adapters::SensorAdapter;
use crate::config::Config;
use crate::derive::BatchOptions;
use crate::scheduler::{PollScheduler, SchedulerOptions};
use crate::store::{build_pool, MemoryStore, PersistenceWriter, PgStore, RecordStore};
use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;

/// Records a dry run keeps in memory; a day at the default interval.
pub const DRY_RUN_RETENTION: usize = 2_880;

/// Connections shared by the collector, built once at startup.
#[derive(Clone)]
pub struct CollectorState {
    pub config: Config,
    pub http: Client,
    pub store: Arc<dyn RecordStore>,
    pub cache: Option<Arc<dyn SnapshotCache>>,
}

impl CollectorState {
    /// Connects to Postgres (or an in-memory store for dry runs) and makes
    /// sure the schema exists.
    pub async fn connect(config: Config, dry_run: bool) -> Result<Self> {
        let store: Arc<dyn RecordStore> = if dry_run {
            tracing::info!(
                retention = DRY_RUN_RETENTION,
                "dry run: records are kept in memory only"
            );
            Arc::new(MemoryStore::with_retention(DRY_RUN_RETENTION))
        } else {
            let pool = build_pool(config.database_url()?, config.db_pool_size)
                .await
                .context("failed to connect to the telemetry database")?;
            Arc::new(PgStore::new(pool))
        };
        store
            .ensure_schema()
            .await
            .context("failed to create the telemetry schema")?;

        let cache = config.cache_url.as_deref().map(|url| {
            tracing::info!(url, key = %config.rf_cache_key, "RF snapshots read from cache");
            Arc::new(MemcacheCache::new(url, config.retry_policy().timeout)) as Arc<dyn SnapshotCache>
        });

        Self::from_parts(config, store, cache)
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        cache: Option<Arc<dyn SnapshotCache>>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.retry_policy().timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            http,
            store,
            cache,
        })
    }

    /// Adapters in invocation order: device, RF cache, power meter. Sources
    /// without configuration are left out.
    pub fn adapters(&self) -> Vec<Box<dyn SensorAdapter>> {
        let mut adapters: Vec<Box<dyn SensorAdapter>> = vec![Box::new(DeviceAdapter::new(
            self.http.clone(),
            &self.config.device_ip,
            self.config.device_port,
        ))];

        match &self.cache {
            Some(cache) => adapters.push(Box::new(RfCacheAdapter::new(
                cache.clone(),
                self.config.rf_cache_key.clone(),
                self.config.rf_max_age(),
            ))),
            None => tracing::info!("WEL_CACHE_URL not set; RF sensors disabled"),
        }

        match (&self.config.emporia_token, self.config.power_meter_enabled()) {
            (Some(token), true) => adapters.push(Box::new(PowerMeterAdapter::new(
                self.http.clone(),
                self.config.emporia_api_base.clone(),
                token.clone(),
                self.config.emporia_device_gids.clone(),
            ))),
            _ => tracing::info!("power meter token or device gids not set; power meter disabled"),
        }

        adapters
    }

    pub fn scheduler(&self) -> PollScheduler {
        PollScheduler::new(
            self.adapters(),
            PersistenceWriter::new(self.store.clone()),
            SchedulerOptions {
                interval: self.config.poll_interval(),
                retry: self.config.retry_policy(),
                location: self.config.location(),
                constants: self.config.cop,
            },
        )
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            constants: self.config.cop,
            rolling_hours: self.config.rolling_hours,
            zone: self.config.timezone,
        }
    }
}
