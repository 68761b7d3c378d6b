pub mod driver;
pub mod progress;
pub mod store;

pub use driver::ScanDriver;
pub use progress::{ScanCheckpoint, ScanConfig, ScanCounters, ScanProgress, ScanStatus};
pub use store::{CheckpointStore, InMemoryCheckpointStore, JsonFileCheckpointStore};
