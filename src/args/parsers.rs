use crate::error::AppResult;

use super::types::BootstrapAddr;

/// Parse a comma-separated bootstrap list. The flag may repeat, so each
/// occurrence goes through this parser and the results are flattened.
pub fn parse_bootstrap_list(value: &str) -> AppResult<Vec<BootstrapAddr>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}
