use std::path::Path;

use anyhow::Context;
use attestation::policy::{Policy, PolicyConfig};

/// Policy YAML on disk, validated into a [`Policy`] on load.
pub struct PolicyFile;

impl PolicyFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Policy> {
        let contents = std::fs::read_to_string(path).context("failed to read policy file")?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Policy> {
        let config = PolicyConfig::from_yaml(contents)?;
        let policy = Policy::try_from(config).context("validate policy")?;
        Ok(policy)
    }
}
