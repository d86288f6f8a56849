pub mod reader;
pub mod resolver;
pub mod router;
pub mod watcher;

pub use reader::{KubeWorkloadReader, WorkloadReader};
pub use watcher::{WatchOrchestrator, WatchScope};
