pub mod decay;
pub mod dream;
pub mod manifest;
pub mod memory;
pub mod reforge;
pub mod stats;

pub use decay::DecayCommand;
pub use dream::DreamCommand;
pub use manifest::ManifestCommand;
pub use memory::MemoryCommand;
pub use reforge::ReforgeCommand;
pub use stats::StatsCommand;
