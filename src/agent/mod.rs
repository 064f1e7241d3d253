use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::ingest;
use crate::publish::Publisher;
use crate::rollup::scheduler;
use crate::store::tags::TagRegistry;
use crate::store::Store;

/// Agent wires config, storage, the tag registry, and the two worker loops
/// (ingestion and aggregation) together.
pub struct Agent {
    cfg: Config,
    registry: Arc<TagRegistry>,
    sample_tx: mpsc::Sender<Vec<u8>>,
    sample_rx: Option<mpsc::Receiver<Vec<u8>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Agent {
    pub fn new(cfg: Config) -> Self {
        let (sample_tx, sample_rx) = mpsc::channel(cfg.ingest.queue_size);

        Self {
            cfg,
            registry: Arc::new(TagRegistry::new()),
            sample_tx,
            sample_rx: Some(sample_rx),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// Sender the transport uses to hand raw sample payloads to the agent.
    pub fn sample_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.sample_tx.clone()
    }

    /// Open storage and start the worker loops.
    ///
    /// Ingestion and aggregation each get their own connection over the
    /// same WAL database file so neither blocks the other.
    pub async fn start(&mut self, publisher: Publisher) -> Result<()> {
        let Some(sample_rx) = self.sample_rx.take() else {
            bail!("agent already started");
        };

        let db_path = Path::new(&self.cfg.storage.path);

        let ingest_store = Store::open(db_path).context("opening ingestion store")?;
        let scheduler_store = Store::open(db_path).context("opening aggregation store")?;

        let warmed = self
            .registry
            .warm(&ingest_store)
            .context("warming tag registry")?;
        info!(tags = warmed, "tag registry warmed");

        self.tasks.push(tokio::spawn(ingest::run(
            ingest_store,
            Arc::clone(&self.registry),
            sample_rx,
            self.cancel.child_token(),
        )));

        self.tasks.push(tokio::spawn(scheduler::run(
            scheduler_store,
            Arc::clone(&self.registry),
            publisher,
            self.cfg.aggregation.interval,
            self.cfg.aggregation.retention,
            self.cancel.child_token(),
        )));

        info!("agent started");

        Ok(())
    }

    /// Gracefully stop both loops. An in-flight aggregation cycle finishes
    /// before this returns.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "worker task panicked");
            }
        }

        info!("agent stopped");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::publish::{ChannelPublisher, Publisher};
    use std::time::Duration;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            storage: StorageConfig {
                path: dir
                    .path()
                    .join("telemetry.db")
                    .to_string_lossy()
                    .into_owned(),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_agent_ingests_after_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config(&dir);
        let db_path = dir.path().join("telemetry.db");

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let publisher = Publisher::Channel(ChannelPublisher::new("aggregates", tx));

        let mut agent = Agent::new(cfg);
        agent.start(publisher).await.expect("start");

        agent
            .sample_sender()
            .send(br#"{"tag":"temp","timestamp":"2024-05-01T10:00:05Z","value":1.5}"#.to_vec())
            .await
            .expect("send");

        // The ingest loop runs on its own task; poll until the row lands.
        let verify = Store::open(&db_path).expect("verify open");
        let mut tag_id = None;
        for _ in 0..50 {
            tag_id = verify.lookup_tag("temp").expect("lookup");
            if tag_id.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(tag_id.is_some(), "sample was not ingested");

        agent.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_agent_double_start_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut agent = Agent::new(test_config(&dir));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        agent
            .start(Publisher::Channel(ChannelPublisher::new("aggregates", tx)))
            .await
            .expect("first start");

        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        let err = agent
            .start(Publisher::Channel(ChannelPublisher::new("aggregates", tx2)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already started"));

        agent.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_agent_stop_joins_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut agent = Agent::new(test_config(&dir));

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        agent
            .start(Publisher::Channel(ChannelPublisher::new("aggregates", tx)))
            .await
            .expect("start");

        agent.stop().await.expect("stop");
        assert!(agent.tasks.is_empty());
    }
}
