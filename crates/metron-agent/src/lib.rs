//! The metron agent: polls metric providers on one interval and delivers
//! the merged snapshot to a collector on another.

pub mod app;
pub mod collector;
pub mod config;
pub mod reporter;
pub mod sender;
pub mod worker_pool;

pub use app::App;
pub use config::AgentConfig;
