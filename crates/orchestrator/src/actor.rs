use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::commands::{PipelineCommand, PipelineState};
use crate::handle::PipelineHandle;
use crate::pipeline::{Pipeline, SignalOutcome};

const COMMAND_BUFFER: usize = 256;

/// Owns the command loop around a [`Pipeline`].
///
/// Signals and ticks are processed on their own tasks so a slow broker
/// never holds up control commands. Background tasks (queue worker,
/// reconciliation sweep, catalog refresh) run until shutdown.
pub struct PipelineActor {
    pipeline: Arc<Pipeline>,
    rx: mpsc::Receiver<PipelineCommand>,
    state_tx: watch::Sender<PipelineState>,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
    work: JoinSet<()>,
}

impl PipelineActor {
    #[must_use]
    pub fn new(
        pipeline: Arc<Pipeline>,
        rx: mpsc::Receiver<PipelineCommand>,
        state_tx: watch::Sender<PipelineState>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            pipeline,
            rx,
            state_tx,
            shutdown_tx,
            background: Vec::new(),
            work: JoinSet::new(),
        }
    }

    /// Spawns the actor and returns a handle to it.
    #[must_use]
    pub fn spawn(pipeline: Arc<Pipeline>) -> (PipelineHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(PipelineState::Running);
        let actor = Self::new(pipeline, rx, state_tx);
        let task = tokio::spawn(actor.run());
        (PipelineHandle::new(tx, state_rx), task)
    }

    fn start_background(&mut self) {
        let ctx = Arc::clone(self.pipeline.context());
        self.background.push(
            Arc::clone(&self.pipeline).spawn_queue_worker(self.shutdown_tx.subscribe()),
        );
        self.background.push(
            Arc::clone(&self.pipeline).spawn_reconciler(self.shutdown_tx.subscribe()),
        );
        self.background.push(Arc::clone(&ctx.resolver).spawn_refresh(
            Arc::clone(&ctx.gateway),
            self.shutdown_tx.subscribe(),
        ));
    }

    fn set_state(&self, state: PipelineState) {
        let _ = self.state_tx.send(state);
    }

    fn spawn_work<F>(&mut self, work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Reap finished tasks so the set does not grow without bound
        while self.work.try_join_next().is_some() {}
        self.work.spawn(work);
    }

    /// Runs the command loop until [`PipelineCommand::Shutdown`] or every
    /// handle is dropped.
    ///
    /// # Errors
    /// Returns an error if a background task panicked.
    pub async fn run(mut self) -> Result<()> {
        info!("Pipeline actor starting");
        self.start_background();

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                PipelineCommand::RawSignal(raw) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    self.spawn_work(async move {
                        log_outcome(&pipeline.process_raw(&raw).await);
                    });
                }
                PipelineCommand::Signal(signal) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    self.spawn_work(async move {
                        log_outcome(&pipeline.process_signal(*signal).await);
                    });
                }
                PipelineCommand::Tick(tick) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    self.spawn_work(async move {
                        for outcome in pipeline.on_tick(tick).await {
                            log_outcome(&outcome);
                        }
                    });
                }
                PipelineCommand::Close {
                    key,
                    quantity,
                    reason,
                } => {
                    let pipeline = Arc::clone(&self.pipeline);
                    self.spawn_work(async move {
                        match pipeline.close_position(&key, quantity, reason).await {
                            Some(outcome) => log_outcome(&outcome),
                            None => {
                                warn!(key = %key, "Close requested for unknown or exiting key");
                            }
                        }
                    });
                }
                PipelineCommand::Flatten(reason) => {
                    for outcome in self.pipeline.flatten(reason).await {
                        log_outcome(&outcome);
                    }
                }
                PipelineCommand::Reconcile => {
                    self.pipeline.reconcile_pending().await;
                }
                PipelineCommand::Stop(reply) => {
                    let report = self.pipeline.stop().await;
                    self.set_state(PipelineState::Stopped);
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                }
                PipelineCommand::Resume => {
                    self.pipeline.resume();
                    self.set_state(PipelineState::Running);
                }
                PipelineCommand::ResetSession => self.pipeline.reset_session(),
                PipelineCommand::GetStatus(reply) => {
                    let _ = reply.send(self.pipeline.status());
                }
                PipelineCommand::Shutdown => {
                    info!("Pipeline actor received shutdown");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> Result<()> {
        self.set_state(PipelineState::ShuttingDown);
        while self.work.join_next().await.is_some() {}

        let report = self.pipeline.stop().await;
        let _ = self.shutdown_tx.send(true);
        for task in self.background.drain(..) {
            task.await?;
        }

        let orphaned = self.pipeline.context().limiter.drain_queued();
        if !orphaned.is_empty() {
            debug!(count = orphaned.len(), "Discarded cancelled orders left in the queue");
        }
        info!(
            cancelled = report.cancelled_queued + report.cancelled_live,
            open_positions = self.pipeline.context().positions.len(),
            "Pipeline actor stopped"
        );
        Ok(())
    }
}

fn log_outcome(outcome: &SignalOutcome) {
    match outcome {
        SignalOutcome::Completed(order) => debug!(
            order_id = %order.order_id,
            key = %order.key,
            state = %order.state,
            "Signal completed"
        ),
        SignalOutcome::Queued(order) | SignalOutcome::Pending(order) => debug!(
            order_id = %order.order_id,
            key = %order.key,
            state = %order.state,
            "Order outstanding"
        ),
        other => debug!(reason = other.reason().unwrap_or_default(), "Signal produced no order"),
    }
}
