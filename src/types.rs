use std::str::FromStr;

use serde::Deserialize;

/// Where build cache entries are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildCacheMode {
    /// No build cache; every node runs.
    #[default]
    None,
    /// Entries live in memory for the lifetime of the process.
    Memory,
    /// One file per entry under `[config].cache_dir`.
    File,
}

impl FromStr for BuildCacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(BuildCacheMode::None),
            "memory" => Ok(BuildCacheMode::Memory),
            "file" => Ok(BuildCacheMode::File),
            other => Err(format!(
                "invalid cache mode: {other} (expected \"none\", \"memory\" or \"file\")"
            )),
        }
    }
}
