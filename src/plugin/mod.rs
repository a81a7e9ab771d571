pub mod manager;
pub mod wrapper;

pub use manager::PluginRegistry;
pub use wrapper::{PluginWrapper, config_key};
