pub mod config;
pub mod crawl;
pub mod executor;
pub mod harvest;
pub mod history;
pub mod model;
pub mod sink;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;
