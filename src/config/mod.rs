//! Configuration management for sharegroup
//!
//! Settings are loaded from a TOML file. Every section is optional and
//! falls back to its defaults, so an empty file is a valid configuration.

use crate::capabilities::Capabilities;
use crate::drawable::SurfaceDescriptor;
use crate::logging::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharegroupConfig {
    /// Sharing registry tuning
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Capabilities requested for every context the soak run creates
    #[serde(default)]
    pub capabilities: Capabilities,

    /// Drawable every soak target renders into
    #[serde(default)]
    pub surface: SurfaceDescriptor,

    /// Soak scenario shape
    #[serde(default)]
    pub soak: SoakConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Departed context ids remembered so that joining one reports
    /// "destroyed" instead of "not found"
    #[serde(default = "RegistryConfig::default_departed_history")]
    pub departed_history: usize,
}

/// Order in which the soak run destroys a group's targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownOrder {
    /// Master first, then dependents in join order
    #[default]
    Creation,
    /// Last joined first, master last
    Reverse,
    /// Seeded random permutation
    Shuffled,
}

impl TeardownOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownOrder::Creation => "creation",
            TeardownOrder::Reverse => "reverse",
            TeardownOrder::Shuffled => "shuffled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoakConfig {
    /// Independent sharing groups per iteration
    pub groups: usize,

    /// Targets per group, master included
    pub members_per_group: usize,

    /// Frames each target renders before teardown
    pub frames_per_member: u32,

    pub iterations: u32,

    pub teardown_order: TeardownOrder,

    /// Move one dependent's state to a fresh target mid-run
    pub transplant: bool,

    /// Seed for shuffled teardown; random when unset
    pub seed: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            departed_history: Self::default_departed_history(),
        }
    }
}

impl RegistryConfig {
    fn default_departed_history() -> usize {
        4096
    }
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            groups: 4,
            members_per_group: 4,
            frames_per_member: 3,
            iterations: 10,
            teardown_order: TeardownOrder::Creation,
            transplant: true,
            seed: None,
        }
    }
}

impl SharegroupConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let expanded_path = expand_home(path.as_ref())?;

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: SharegroupConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.registry.departed_history == 0 {
            anyhow::bail!("Invalid departed_history: must be at least 1");
        }

        self.surface
            .validate()
            .context("Invalid [surface] section")?;

        if self.soak.members_per_group == 0 {
            anyhow::bail!("Invalid members_per_group: a group needs at least its master");
        }

        if self.soak.transplant && self.soak.members_per_group < 2 {
            anyhow::bail!("Invalid soak: transplant needs at least one dependent per group");
        }

        if self.capabilities.color_bits == 0 {
            anyhow::bail!("Invalid color_bits: must be non-zero");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

/// Expands a leading `~` to `$HOME`.
fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
