//! Migration configuration.
//!
//! [`MigrationConfig`] is the single value object every component reads
//! its parameters from. It is assembled from command-line arguments and an
//! optional TOML file:
//!
//! ```toml
//! [bridge]
//! name = "br0"
//! ageing_time = 300
//! forward_delay = 0
//! stp = false
//! mcast_snooping = true
//!
//! [port]
//! hairpin = false
//! flood = true
//! mcast_flood = true
//! neigh_suppress = false
//! learning = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use brmigrate_common::{BridgeTuning, MigrateError, MigrateResult, PortFlags};

use crate::gate::ExecMode;

/// Bridge name used when neither CLI nor file names one
pub const DEFAULT_BRIDGE_NAME: &str = "br0";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
pub const MAX_IFNAME_LEN: usize = 15;

/// Kernel bounds for bridge ageing time, in seconds
const AGEING_TIME_RANGE: std::ops::RangeInclusive<u32> = 10..=1_000_000;

/// Kernel bounds for STP forward delay, in seconds
const FORWARD_DELAY_MAX: u32 = 30;

/// `[bridge]` section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeSection {
    /// Bridge name
    #[serde(default)]
    pub name: Option<String>,

    /// FDB ageing time in seconds
    #[serde(default = "default_ageing_time")]
    pub ageing_time: u32,

    /// Forward delay in seconds
    #[serde(default)]
    pub forward_delay: u32,

    /// Spanning tree
    #[serde(default)]
    pub stp: bool,

    /// Multicast snooping
    #[serde(default = "default_true")]
    pub mcast_snooping: bool,
}

/// `[port]` section of the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortSection {
    /// Send frames back out the port they arrived on
    #[serde(default)]
    pub hairpin: bool,

    /// Flood unknown unicast to this port
    #[serde(default = "default_true")]
    pub flood: bool,

    /// Flood unknown multicast to this port
    #[serde(default = "default_true")]
    pub mcast_flood: bool,

    /// Answer ARP/ND on behalf of the port
    #[serde(default)]
    pub neigh_suppress: bool,

    /// Learn source MACs from this port
    #[serde(default = "default_true")]
    pub learning: bool,
}

/// Complete configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Bridge tuning
    #[serde(default)]
    pub bridge: BridgeSection,

    /// Port flags
    #[serde(default)]
    pub port: PortSection,
}

fn default_ageing_time() -> u32 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            name: None,
            ageing_time: default_ageing_time(),
            forward_delay: 0,
            stp: false,
            mcast_snooping: default_true(),
        }
    }
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            hairpin: false,
            flood: default_true(),
            mcast_flood: default_true(),
            neigh_suppress: false,
            learning: default_true(),
        }
    }
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> MigrateResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrateError::invalid_config("config", format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        toml::from_str(content).map_err(|e| MigrateError::invalid_config("config", e.to_string()))
    }

    /// Bridge tuning from the `[bridge]` section
    pub fn tuning(&self) -> BridgeTuning {
        BridgeTuning {
            ageing_time_secs: self.bridge.ageing_time,
            forward_delay_secs: self.bridge.forward_delay,
            stp: self.bridge.stp,
            mcast_snooping: self.bridge.mcast_snooping,
        }
    }

    /// Port flags from the `[port]` section
    pub fn port_flags(&self) -> PortFlags {
        PortFlags {
            hairpin: self.port.hairpin,
            flood: self.port.flood,
            mcast_flood: self.port.mcast_flood,
            neigh_suppress: self.port.neigh_suppress,
            learning: self.port.learning,
        }
    }
}

/// Parameters of one migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationConfig {
    /// Source interface
    pub iface: String,
    /// Target bridge
    pub bridge: String,
    /// Live or dry run
    pub mode: ExecMode,
    /// Bridge-wide tuning
    pub tuning: BridgeTuning,
    /// Port flags for the enslaved interface
    pub port_flags: PortFlags,
}

impl MigrationConfig {
    /// Create a live-mode configuration with default tuning
    pub fn new(iface: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            bridge: bridge.into(),
            mode: ExecMode::Live,
            tuning: BridgeTuning::default(),
            port_flags: PortFlags::default(),
        }
    }

    /// Merge command-line values over an optional file.
    ///
    /// The bridge name resolves CLI first, then file, then [`DEFAULT_BRIDGE_NAME`].
    pub fn from_parts(
        iface: impl Into<String>,
        bridge: Option<String>,
        mode: ExecMode,
        file: Option<&ConfigFile>,
    ) -> MigrateResult<Self> {
        let bridge = bridge
            .or_else(|| file.and_then(|f| f.bridge.name.clone()))
            .unwrap_or_else(|| DEFAULT_BRIDGE_NAME.to_string());

        let mut config = Self::new(iface, bridge).with_mode(mode);
        if let Some(file) = file {
            config.tuning = file.tuning();
            config.port_flags = file.port_flags();
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set bridge tuning
    pub fn with_tuning(mut self, tuning: BridgeTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Validate names and tuning ranges
    pub fn validate(&self) -> MigrateResult<()> {
        validate_ifname("iface", &self.iface)?;
        validate_ifname("bridge", &self.bridge)?;

        if self.iface == self.bridge {
            return Err(MigrateError::invalid_config(
                "bridge",
                "bridge name must differ from the interface name",
            ));
        }
        if !AGEING_TIME_RANGE.contains(&self.tuning.ageing_time_secs) {
            return Err(MigrateError::invalid_config(
                "ageing_time",
                format!(
                    "{} outside {}..={} seconds",
                    self.tuning.ageing_time_secs,
                    AGEING_TIME_RANGE.start(),
                    AGEING_TIME_RANGE.end()
                ),
            ));
        }
        if self.tuning.forward_delay_secs > FORWARD_DELAY_MAX {
            return Err(MigrateError::invalid_config(
                "forward_delay",
                format!("{} exceeds {} seconds", self.tuning.forward_delay_secs, FORWARD_DELAY_MAX),
            ));
        }
        Ok(())
    }
}

fn validate_ifname(field: &str, name: &str) -> MigrateResult<()> {
    if name.is_empty() {
        return Err(MigrateError::invalid_config(field, "name is empty"));
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(MigrateError::invalid_config(
            field,
            format!("'{}' longer than {} bytes", name, MAX_IFNAME_LEN),
        ));
    }
    if name == "." || name == ".." || name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
        return Err(MigrateError::invalid_config(
            field,
            format!("'{}' is not a valid interface name", name),
        ));
    }
    Ok(())
}
