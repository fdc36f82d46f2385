mod cli;
mod parsers;
mod types;


pub use cli::SwarmArgs;
pub use parsers::parse_bootstrap_list;
pub use types::{BindMode, BootstrapAddr, PositiveF64, PositiveU64, PositiveUsize, ScenarioSpec};
