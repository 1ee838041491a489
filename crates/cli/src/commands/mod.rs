mod check_config;
mod feed;
mod replay;
mod run;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use replay::{run_replay, ReplayArgs};
pub use run::{run_pipeline, RunArgs};
