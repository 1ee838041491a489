//! Wires the pipeline components together.
//!
//! [`TradingContext`] owns every component; [`Pipeline`] runs a signal
//! through them; [`PipelineActor`] and [`PipelineHandle`] put the pipeline
//! behind a command channel shared by concurrent strategy producers.

pub mod actor;
pub mod commands;
pub mod context;
pub mod handle;
pub mod pipeline;
pub mod sinks;

pub use actor::PipelineActor;
pub use commands::{PipelineCommand, PipelineState, PipelineStatus};
pub use context::TradingContext;
pub use handle::PipelineHandle;
pub use pipeline::{Pipeline, PipelineStats, SignalOutcome, StopReport};
pub use sinks::{ChannelSink, FanoutSink, TracingSink};
