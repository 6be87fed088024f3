pub mod audit;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod layout;
pub mod pipeline;
pub mod planner;
pub mod reconcile;
pub mod registry;
pub mod scanner;
pub mod snapshot;
pub mod twin_config;
pub mod ui;
pub mod worker_summary;
