// Keymapper Config API
// TOML configuration for key maps and timing

pub mod parser;

pub use parser::{Config, ConfigError, ConfigToml};
