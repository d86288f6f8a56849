pub mod config;
pub mod error;
pub mod k8s;
pub mod scan;
pub mod transmitter;
pub mod workload;

pub use error::{AgentError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
