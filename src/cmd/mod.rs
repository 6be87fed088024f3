//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled        |
//! |-------------|-------------------------|
//! | `status`    | `Status`, `Reconcile`   |
//! | `run`       | `Run`                   |
//! | `output`    | `Snapshot`, `Clean`     |
//! | `config`    | `Config`                |

pub mod config;
pub mod output;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use output::{cmd_clean, cmd_snapshot};
pub use run::cmd_run;
pub use status::{cmd_reconcile, cmd_status};
