//! `rtl-bridge` loop: decode decoder lines, average them per window and
//! publish each window to the snapshot cache.

use crate::adapters::rf::{decode_line, RfWindow, SnapshotCache};
use anyhow::{Context, Result};
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub key: String,
    pub window: Duration,
    /// Cache lifetime of each published snapshot.
    pub expiry: Duration,
}

/// Runs until `shutdown` resolves (`Ok`) or the decoder output ends or
/// fails (`Err`).
pub async fn run_bridge<R, F>(
    reader: R,
    cache: &dyn SnapshotCache,
    options: &BridgeOptions,
    shutdown: F,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut lines = reader.lines();
    let mut window = RfWindow::default();
    let mut ticker = tokio::time::interval(options.window);
    ticker.tick().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read decoder output")? {
                    Some(line) => {
                        if let Some(values) = decode_line(&line) {
                            window.push(values);
                        }
                    }
                    None => {
                        tracing::error!("decoder exited");
                        anyhow::bail!("decoder output ended");
                    }
                }
            }
            _ = ticker.tick() => publish(&mut window, cache, options).await?,
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

async fn publish(
    window: &mut RfWindow,
    cache: &dyn SnapshotCache,
    options: &BridgeOptions,
) -> Result<()> {
    if window.is_empty() {
        tracing::warn!("no RF readings during window");
        return Ok(());
    }
    let snapshot = window.take_snapshot(Utc::now());
    let payload = serde_json::to_string(&snapshot)?;
    match cache.set(&options.key, &payload, options.expiry).await {
        Ok(()) => tracing::info!(fields = snapshot.readings.len(), "published RF snapshot"),
        Err(err) => tracing::warn!(error = %err, "failed to publish RF snapshot"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rf::RfSnapshot;
    use crate::adapters::AdapterError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio::io::{AsyncWriteExt, BufReader};

    const TOWER_LINE: &str = r#"{"model":"Acurite-Tower","id":2669,"channel":"A","temperature_C":19.0,"humidity":40}"#;

    #[derive(Default)]
    struct RecordingCache {
        entries: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl SnapshotCache for RecordingCache {
        async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
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

    fn options() -> BridgeOptions {
        BridgeOptions {
            key: "rtl".to_string(),
            window: Duration::from_millis(40),
            expiry: Duration::from_secs(120),
        }
    }

    #[tokio::test]
    async fn shutdown_is_a_clean_exit() {
        let (mut decoder, output) = tokio::io::duplex(1024);
        let cache = RecordingCache::default();
        decoder
            .write_all(format!("{TOWER_LINE}\nnoise\n").as_bytes())
            .await
            .unwrap();

        let result = run_bridge(
            BufReader::new(output),
            &cache,
            &options(),
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await;

        assert!(result.is_ok(), "{result:?}");
        let payload = cache.get("rtl").await.unwrap().expect("snapshot published");
        let snapshot: RfSnapshot = serde_json::from_str(&payload).unwrap();
        assert_eq!(snapshot.readings["D_room_T"], 19.0);
        drop(decoder);
    }

    #[tokio::test]
    async fn decoder_exit_is_an_error() {
        let cache = RecordingCache::default();
        let input: &[u8] = b"noise\n";

        let result = run_bridge(input, &cache, &options(), std::future::pending::<()>()).await;

        assert!(result.is_err());
        assert!(cache.entries.lock().unwrap().is_empty());
    }
}
