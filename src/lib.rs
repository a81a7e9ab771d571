pub mod apps;
pub mod channel;
pub mod config;
pub mod executor;
pub mod history;
pub mod host;
pub mod logger;
pub mod menu;
pub mod plugin;
pub mod schema;
pub mod settings;
pub mod text_summary;
