//! Event sinks for pipeline audit events.

use std::sync::Arc;

use tokio::sync::broadcast;
use tradeflow_core::{EventSink, PipelineEvent};

/// Writes every event to the log as structured JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &PipelineEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                tracing::info!(
                    target: "tradeflow::audit",
                    kind = event.kind(),
                    %json,
                    "Pipeline event"
                );
            }
            Err(e) => {
                tracing::warn!(kind = event.kind(), error = %e, "Unserialisable pipeline event");
            }
        }
    }
}

/// Forwards events to broadcast subscribers. Lagging or absent receivers
/// never block the pipeline.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<PipelineEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &PipelineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Publishes to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}
