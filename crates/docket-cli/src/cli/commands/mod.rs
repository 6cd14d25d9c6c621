//! CLI command handlers, one file per command.

mod cancel;
mod create;
mod link;
mod list;
mod retry;
mod run;
mod show;
mod skip;
mod stats;

pub use cancel::run_cancel;
pub use create::{run_create, CreateArgs};
pub use link::run_link;
pub use list::run_list;
pub use retry::run_retry;
pub use run::run_workers;
pub use show::run_show;
pub use skip::run_skip;
pub use stats::run_stats;
