//! Runtime tunables and optional TOML config layering.
//!
//! Every knob has a built-in default; a config file (via `--config`) overrides
//! defaults field by field. CLI flags that overlap (port, host) always win and
//! are applied by the caller after loading.

mod loader;
mod types;


pub use loader::load_config;
pub use types::{ConfigFile, NodeConfig};
