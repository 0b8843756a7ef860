use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use common::{Clock, ExchangeClient, ProgressEvent, Result, RunSnapshot, RunSummary, TwapPlan};

use crate::run::{TwapHandle, TwapRun};

/// Finished runs kept for inspection before the oldest are dropped.
pub const DEFAULT_FINISHED_RETENTION: usize = 100;

struct RunEntry {
    /// Launch order; ties on timestamps are common under a manual clock.
    seq: u64,
    handle: TwapHandle,
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    runs: HashMap<String, RunEntry>,
}

/// Launches TWAP runs as tasks and keeps their handles for the dashboard.
///
/// Runs are independent; the only thing they share is the exchange client
/// (and therefore its rate budget). Active runs are always kept; finished
/// ones are evicted oldest first once more than `retain_finished` exist.
#[derive(Clone)]
pub struct TwapManager {
    client: Arc<dyn ExchangeClient>,
    clock: Arc<dyn Clock>,
    registry: Arc<RwLock<Registry>>,
    progress_tx: broadcast::Sender<ProgressEvent>,
    retain_finished: usize,
}

impl TwapManager {
    pub fn new(client: Arc<dyn ExchangeClient>, clock: Arc<dyn Clock>) -> Self {
        let (progress_tx, _) = broadcast::channel(1024);
        Self {
            client,
            clock,
            registry: Arc::new(RwLock::new(Registry::default())),
            progress_tx,
            retain_finished: DEFAULT_FINISHED_RETENTION,
        }
    }

    pub fn with_retention(mut self, retain_finished: usize) -> Self {
        self.retain_finished = retain_finished;
        self
    }

    /// Subscribe to progress events from every run launched by this manager.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Validate and start a run in the background.
    pub async fn launch(&self, plan: TwapPlan) -> Result<TwapHandle> {
        let (run, handle) = TwapRun::start(
            plan,
            self.client.clone(),
            self.clock.clone(),
            Arc::new(self.progress_tx.clone()),
        )?;

        let run_id = handle.run_id().to_string();
        {
            let mut registry = self.registry.write().await;
            self.prune_finished(&mut registry);
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.runs.insert(
                run_id.clone(),
                RunEntry {
                    seq,
                    handle: handle.clone(),
                },
            );
        }

        info!(run_id = %run_id, "TWAP run launched");
        tokio::spawn(run.run());
        Ok(handle)
    }

    fn prune_finished(&self, registry: &mut Registry) {
        let mut finished: Vec<(u64, String)> = registry
            .runs
            .iter()
            .filter(|(_, e)| e.handle.state().is_terminal())
            .map(|(id, e)| (e.seq, id.clone()))
            .collect();
        if finished.len() <= self.retain_finished {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.retain_finished;
        for (_, id) in finished.into_iter().take(excess) {
            debug!(run_id = %id, "Evicting finished run");
            registry.runs.remove(&id);
        }
    }

    pub async fn get(&self, run_id: &str) -> Option<TwapHandle> {
        self.registry
            .read()
            .await
            .runs
            .get(run_id)
            .map(|e| e.handle.clone())
    }

    /// Handles in launch order.
    async fn handles(&self) -> Vec<TwapHandle> {
        let registry = self.registry.read().await;
        let mut entries: Vec<&RunEntry> = registry.runs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.handle.clone()).collect()
    }

    /// Snapshots of every known run, oldest first.
    pub async fn list(&self) -> Vec<RunSnapshot> {
        let handles = self.handles().await;
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots
    }

    /// Request cancellation of one run. Returns `false` for an unknown id.
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.get(run_id).await {
            Some(handle) => {
                info!(run_id = %run_id, "Cancellation requested");
                handle.cancel();
                true
            }
            None => {
                warn!(run_id = %run_id, "Cancel requested for unknown run");
                false
            }
        }
    }

    /// Cancel every run that has not finished yet.
    pub async fn cancel_all(&self) {
        for handle in self.handles().await {
            if !handle.state().is_terminal() && !handle.is_cancel_requested() {
                info!(run_id = %handle.run_id(), "Cancelling run");
                handle.cancel();
            }
        }
    }

    /// Wait for every known run to reach a terminal state.
    ///
    /// In-flight submissions finish first, so call this before shutting the
    /// runtime down.
    pub async fn wait_all(&self) -> Vec<RunSummary> {
        let mut summaries = Vec::new();
        for handle in self.handles().await {
            summaries.push(handle.wait().await);
        }
        summaries
    }
}
