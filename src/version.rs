//! Generator version embedded in artifacts and the compatibility floor for cached ones.

use anyhow::{Context, Result};
use semver::Version;

/// Version stamped into every snapshot/tree this crate creates.
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Oldest generator whose artifact schema is still trusted from cache.
pub const MIN_COMPATIBLE_VERSION: &str = "1.12.0-dev";

/// Parsed compatibility floor.
#[derive(Clone, Debug)]
pub struct VersionFloor {
    floor: Version,
}

impl VersionFloor {
    pub fn new(floor: &str) -> Result<Self> {
        let floor = Version::parse(floor)
            .with_context(|| format!("parse compatibility floor [{}]", floor))?;
        Ok(Self { floor })
    }

    pub fn default_floor() -> Result<Self> {
        Self::new(MIN_COMPATIBLE_VERSION)
    }

    /// Ok(true) if `version` >= floor; Err if `version` is not a semantic version.
    pub fn accepts(&self, version: &str) -> Result<bool> {
        let v = Version::parse(version.trim_start_matches('v'))
            .with_context(|| format!("parse artifact version [{}]", version))?;
        Ok(v >= self.floor)
    }

    pub fn floor(&self) -> &Version {
        &self.floor
    }
}
