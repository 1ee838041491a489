use anyhow::Result;
use tokio::sync::{mpsc, oneshot, watch};
use tradeflow_core::{OrderKey, PriceTick, Signal};
use tradeflow_positions::CloseReason;

use crate::commands::{PipelineCommand, PipelineState, PipelineStatus};
use crate::pipeline::StopReport;

/// Cloneable sender side of a running [`crate::PipelineActor`]. Every
/// strategy producer holds one.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineCommand>,
    state: watch::Receiver<PipelineState>,
}

impl PipelineHandle {
    #[must_use]
    pub const fn new(
        tx: mpsc::Sender<PipelineCommand>,
        state: watch::Receiver<PipelineState>,
    ) -> Self {
        Self { tx, state }
    }

    /// Sends a raw JSON signal record.
    ///
    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn submit_raw(&self, raw: impl Into<String>) -> Result<()> {
        self.tx.send(PipelineCommand::RawSignal(raw.into())).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn submit(&self, signal: Signal) -> Result<()> {
        self.tx.send(PipelineCommand::Signal(Box::new(signal))).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn tick(&self, tick: PriceTick) -> Result<()> {
        self.tx.send(PipelineCommand::Tick(tick)).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn close(
        &self,
        key: OrderKey,
        quantity: Option<u32>,
        reason: CloseReason,
    ) -> Result<()> {
        self.tx
            .send(PipelineCommand::Close {
                key,
                quantity,
                reason,
            })
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn flatten(&self, reason: CloseReason) -> Result<()> {
        self.tx.send(PipelineCommand::Flatten(reason)).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn reconcile(&self) -> Result<()> {
        self.tx.send(PipelineCommand::Reconcile).await?;
        Ok(())
    }

    /// Stops new positions and waits for outstanding orders to be cancelled.
    ///
    /// # Errors
    /// Returns an error if the command cannot be sent or the reply is lost.
    pub async fn stop(&self) -> Result<StopReport> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(PipelineCommand::Stop(Some(tx))).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn resume(&self) -> Result<()> {
        self.tx.send(PipelineCommand::Resume).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the actor has stopped.
    pub async fn reset_session(&self) -> Result<()> {
        self.tx.send(PipelineCommand::ResetSession).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the command cannot be sent or the reply is lost.
    pub async fn get_status(&self) -> Result<PipelineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(PipelineCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// # Errors
    /// Returns an error if the actor has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(PipelineCommand::Shutdown).await?;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Watches control-state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }
}
