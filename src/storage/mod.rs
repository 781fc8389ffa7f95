mod export;
mod layout;
mod manager;

pub use layout::ChunkStore;
pub use manager::{CleanupStats, StorageManager, StorageStats};
