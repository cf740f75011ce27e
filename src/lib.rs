pub mod classifier;
pub mod config;
pub mod debounce;
pub mod machine;
pub mod monitor;
pub mod registry;
pub mod system;
pub mod types;

pub use monitor::*;
pub use types::*;
