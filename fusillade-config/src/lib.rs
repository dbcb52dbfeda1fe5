// fusillade-config: Run configuration management
// YAML/JSON config files with environment variable overrides

pub mod config;
pub mod env;
pub mod schema;

pub use config::{load_config, load_from_file, validate_config};
pub use env::apply_env_overrides;
pub use schema::*;
