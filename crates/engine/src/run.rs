use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use common::{
    Clock, Error, ExchangeClient, ExchangeOrderStatus, OrderAck, OrderIntent, OrderType,
    ProgressEvent, ProgressSink, Result, RunSnapshot, RunState, RunSummary, SliceError,
    SliceResult, SliceStatus, TwapPlan,
};

use crate::cancel::CancelFlag;
use crate::schedule::schedule_offsets;
use crate::slicer::slice_quantity;

/// Cloneable read/cancel handle for a run, given to the CLI and dashboard.
#[derive(Clone)]
pub struct TwapHandle {
    run_id: String,
    cancel: CancelFlag,
    snapshot: Arc<RwLock<RunSnapshot>>,
    state_rx: watch::Receiver<RunState>,
}

impl TwapHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation. Takes effect at the run's next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn summary(&self) -> RunSummary {
        self.snapshot.read().await.summary()
    }

    /// Wait until the run reaches a terminal state and return its summary.
    pub async fn wait(&self) -> RunSummary {
        let mut rx = self.state_rx.clone();
        // A closed channel means the run task is gone; the snapshot is final either way.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.summary().await
    }
}

/// A single TWAP execution. Owns its slices; only `run()` mutates them.
pub struct TwapRun {
    run_id: String,
    plan: TwapPlan,
    offsets: Vec<Duration>,
    slices: Vec<SliceResult>,
    cursor: usize,
    state: RunState,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    client: Arc<dyn ExchangeClient>,
    clock: Arc<dyn Clock>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
    shared: Arc<RwLock<RunSnapshot>>,
    state_tx: watch::Sender<RunState>,
}

impl TwapRun {
    /// Validate `plan`, build the pending slices and move the run to `Running`.
    ///
    /// Fails with `Error::InvalidPlan` before anything is submitted.
    pub fn start(
        plan: TwapPlan,
        client: Arc<dyn ExchangeClient>,
        clock: Arc<dyn Clock>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<(Self, TwapHandle)> {
        let quantities = validate_plan(&plan)?;
        let offsets = schedule_offsets(plan.total_duration, plan.slice_count);

        let run_id = uuid::Uuid::new_v4().to_string();
        let tag: String = run_id.chars().take(8).collect();
        let slices = quantities
            .into_iter()
            .enumerate()
            .map(|(index, quantity)| {
                let intent = match (plan.order_type, plan.limit_price) {
                    (OrderType::Limit, Some(price)) => {
                        OrderIntent::limit(&plan.symbol, plan.side, quantity, price)
                    }
                    _ => OrderIntent::market(&plan.symbol, plan.side, quantity),
                }
                .with_client_id(format!("twap-{tag}-{index}"));
                SliceResult::pending(index, intent)
            })
            .collect::<Vec<_>>();

        let started_at = clock.now();
        let snapshot = RunSnapshot {
            run_id: run_id.clone(),
            plan: plan.clone(),
            state: RunState::Running,
            cursor: 0,
            slices: slices.clone(),
            started_at: Some(started_at),
            finished_at: None,
        };
        let shared = Arc::new(RwLock::new(snapshot));
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let cancel = CancelFlag::new();

        let handle = TwapHandle {
            run_id: run_id.clone(),
            cancel: cancel.clone(),
            snapshot: shared.clone(),
            state_rx,
        };

        let mut run = TwapRun {
            run_id,
            plan,
            offsets,
            slices,
            cursor: 0,
            state: RunState::Idle,
            started_at,
            finished_at: None,
            client,
            clock,
            progress,
            cancel,
            shared,
            state_tx,
        };
        run.transition(RunState::Running);

        Ok((run, handle))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the run to a terminal state. Call from `tokio::spawn`.
    pub async fn run(mut self) -> RunSummary {
        info!(
            run_id = %self.run_id,
            symbol = %self.plan.symbol,
            side = %self.plan.side,
            total = %self.plan.total_quantity,
            slices = self.plan.slice_count,
            duration = ?self.plan.total_duration,
            clock = self.clock.name(),
            "TWAP run started"
        );
        self.publish_snapshot().await;

        while self.cursor < self.slices.len() {
            let index = self.cursor;
            if !self.wait_for_slot(self.offsets[index]).await {
                info!(run_id = %self.run_id, next_slice = index, "TWAP run cancelled");
                self.cancel_remaining().await;
                return self.finish(RunState::Cancelled).await;
            }

            self.execute_slice(index).await;
            self.cursor += 1;
            self.publish_snapshot().await;
        }

        let outcome = if self.slices.iter().any(|s| s.status.is_success()) {
            RunState::Completed
        } else {
            RunState::Failed
        };
        self.finish(outcome).await
    }

    /// Suspend until `offset` after run start. Returns `false` if cancelled.
    async fn wait_for_slot(&self, offset: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let elapsed = (self.clock.now() - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = offset.saturating_sub(elapsed);
        if !remaining.is_zero() {
            debug!(run_id = %self.run_id, wait = ?remaining, "Waiting for next slice");
            tokio::select! {
                _ = self.clock.sleep(remaining) => {}
                _ = self.cancel.cancelled() => {}
            }
        }
        !self.cancel.is_cancelled()
    }

    async fn execute_slice(&mut self, index: usize) {
        self.slices[index].submitted_at = Some(self.clock.now());
        self.set_slice_status(index, SliceStatus::Submitted, None)
            .await;

        let intent = self.slices[index].intent.clone();
        info!(
            run_id = %self.run_id,
            slice = index,
            symbol = %intent.symbol,
            side = %intent.side,
            qty = %intent.quantity,
            client_id = %intent.client_id,
            "Submitting TWAP slice"
        );

        // The call is never aborted: a cancel issued now applies to the next slice.
        let (status, error) = match self.client.submit_order(&intent).await {
            Ok(ack) => {
                let (status, error) = ack_outcome(&ack);
                let slice = &mut self.slices[index];
                slice.exchange_order_id = Some(ack.exchange_order_id.clone());
                slice.filled_quantity = ack.executed_quantity;
                slice.average_price = ack.average_price;
                info!(
                    run_id = %self.run_id,
                    slice = index,
                    order_id = %ack.exchange_order_id,
                    exchange_status = %ack.status,
                    executed = %ack.executed_quantity,
                    "TWAP slice acknowledged"
                );
                (status, error)
            }
            Err(e) => {
                warn!(run_id = %self.run_id, slice = index, error = %e, "TWAP slice failed");
                let status = if e.kind.is_transport() {
                    SliceStatus::Error
                } else {
                    SliceStatus::Rejected
                };
                (status, Some(SliceError::from(e)))
            }
        };

        self.set_slice_status(index, status, error).await;
    }

    async fn cancel_remaining(&mut self) {
        for index in self.cursor..self.slices.len() {
            if self.slices[index].status == SliceStatus::Pending {
                self.set_slice_status(index, SliceStatus::Cancelled, None)
                    .await;
            }
        }
    }

    async fn finish(mut self, outcome: RunState) -> RunSummary {
        self.finished_at = Some(self.clock.now());
        self.transition(outcome);
        self.publish_snapshot().await;
        let _ = self.state_tx.send(outcome);

        let summary = self.snapshot().summary();
        info!(
            run_id = %self.run_id,
            state = %summary.state,
            filled = summary.filled_count,
            accepted = summary.accepted_count,
            rejected = summary.rejected_count,
            errors = summary.error_count,
            cancelled = summary.cancelled_count,
            filled_qty = %summary.total_filled_quantity,
            "TWAP run finished"
        );
        summary
    }

    async fn set_slice_status(
        &mut self,
        index: usize,
        to: SliceStatus,
        error: Option<SliceError>,
    ) {
        let slice = &mut self.slices[index];
        let from = slice.status;
        slice.status = to;
        slice.error = error.clone();

        self.progress.publish(ProgressEvent::SliceUpdated {
            run_id: self.run_id.clone(),
            slice_index: index,
            from,
            to,
            error,
            timestamp: self.clock.now(),
        });
        self.publish_snapshot().await;
    }

    fn transition(&mut self, to: RunState) {
        let from = self.state;
        self.state = to;
        debug!(run_id = %self.run_id, %from, %to, "TWAP run state change");
        self.progress.publish(ProgressEvent::RunStateChanged {
            run_id: self.run_id.clone(),
            from,
            to,
            timestamp: self.clock.now(),
        });
        if !to.is_terminal() {
            let _ = self.state_tx.send(to);
        }
    }

    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            plan: self.plan.clone(),
            state: self.state,
            cursor: self.cursor,
            slices: self.slices.clone(),
            started_at: Some(self.started_at),
            finished_at: self.finished_at,
        }
    }

    async fn publish_snapshot(&self) {
        let snapshot = self.snapshot();
        *self.shared.write().await = snapshot;
    }
}

/// Check a plan and return its slice quantities.
pub fn validate_plan(plan: &TwapPlan) -> Result<Vec<Decimal>> {
    if plan.symbol.trim().is_empty() {
        return Err(Error::InvalidPlan("symbol must not be empty".into()));
    }
    match (plan.order_type, plan.limit_price) {
        (OrderType::Limit, None) => {
            return Err(Error::InvalidPlan("limit orders need a price".into()));
        }
        (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => {
            return Err(Error::InvalidPlan(format!(
                "limit price must be positive, got {price}"
            )));
        }
        (OrderType::Market, Some(_)) => {
            return Err(Error::InvalidPlan(
                "market orders do not take a price".into(),
            ));
        }
        _ => {}
    }
    slice_quantity(
        plan.total_quantity,
        plan.slice_count,
        plan.quantity_precision,
    )
}

fn ack_outcome(ack: &OrderAck) -> (SliceStatus, Option<SliceError>) {
    match ack.status {
        ExchangeOrderStatus::Filled | ExchangeOrderStatus::PartiallyFilled => {
            (SliceStatus::Filled, None)
        }
        ExchangeOrderStatus::New
        | ExchangeOrderStatus::PendingNew
        | ExchangeOrderStatus::PendingCancel => (SliceStatus::Accepted, None),
        ExchangeOrderStatus::Canceled
        | ExchangeOrderStatus::Rejected
        | ExchangeOrderStatus::Expired
        | ExchangeOrderStatus::ExpiredInMatch => (
            SliceStatus::Rejected,
            Some(SliceError {
                kind: common::ErrorKind::ExchangeRejected,
                message: format!("exchange reported order status {}", ack.status),
            }),
        ),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
