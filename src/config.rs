//! Cordon configuration file handling
//!
//! Configuration files are TOML. They hold the operator settings (store path,
//! logging), the enforcement thresholds, and one `[[community]]` table per
//! community with its durable moderation settings (audit channel, mute grant,
//! mute duration, oversight grants).

use crate::platform::{ChannelId, CommunityId, GrantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CordonConfig {
    pub store: StoreConfig,

    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// Per-community moderation settings (`[[community]]` tables)
    #[serde(default, rename = "community")]
    pub communities: Vec<CommunitySettings>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Conflict store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the CBOR conflict snapshot
    pub path: PathBuf,

    /// Mutations within this window coalesce into one durable write
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Enforcement thresholds and timers.
///
/// Strict mode, mute escalation and the channel grace period are tunable;
/// the defaults reproduce the established behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Violation count above which mute + mutation apply
    pub mute_threshold: u32,
    /// Violation count above which strict mode applies
    pub strict_threshold: u32,
    /// Channels younger than this never receive a communicate-deny override
    pub channel_grace_ms: u64,
    /// Lifetime of a voice connect-deny lock
    pub lock_duration_ms: u64,
    /// Interval of the lock-expiry / restoration sweep
    pub sweep_interval_secs: u64,
    /// Rolling window after which violation state resets
    pub reset_window_ms: u64,
    /// Interval of the reset sweep
    pub reset_interval_secs: u64,
    /// Audit-trail correlation window for tamper attribution
    pub tamper_window_ms: u64,
    /// Communicate grants with an effective name length up to this are removed
    pub short_name_max: usize,
    /// Interval at which the platform is polled for events
    pub poll_interval_ms: u64,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            mute_threshold: 1,
            strict_threshold: 2,
            channel_grace_ms: 60 * 60 * 1000,
            lock_duration_ms: 10 * 60 * 1000,
            sweep_interval_secs: 60,
            reset_window_ms: 24 * 60 * 60 * 1000,
            reset_interval_secs: 60 * 60,
            tamper_window_ms: 5_000,
            short_name_max: 3,
            poll_interval_ms: 100,
        }
    }
}

impl EnforcementConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reset_interval(&self) -> Duration {
        Duration::from_secs(self.reset_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tamper_window(&self) -> Duration {
        Duration::from_millis(self.tamper_window_ms)
    }
}

/// Durable moderation settings for one community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunitySettings {
    pub community_id: CommunityId,

    /// Channel receiving audit entries and running conflict logs
    pub audit_channel: Option<ChannelId>,

    /// Grant whose presence denotes "muted"; enforcement is warning-only without it
    pub mute_grant: Option<GrantId>,

    #[serde(default = "default_mute_duration_ms")]
    pub mute_duration_ms: u64,

    /// Holders may lift enforcement without it being treated as tampering
    #[serde(default)]
    pub oversight_grants: Vec<GrantId>,
}

impl CommunitySettings {
    /// Settings for a community with nothing configured.
    pub fn unconfigured(community_id: CommunityId) -> Self {
        Self {
            community_id,
            audit_channel: None,
            mute_grant: None,
            mute_duration_ms: default_mute_duration_ms(),
            oversight_grants: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_mute_duration_ms() -> u64 {
    10 * 60 * 1000
}

/// Settings handed to the enforcement engine.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub enforcement: EnforcementConfig,
    communities: HashMap<CommunityId, CommunitySettings>,
}

impl EngineSettings {
    pub fn new(enforcement: EnforcementConfig, communities: Vec<CommunitySettings>) -> Self {
        Self {
            enforcement,
            communities: communities
                .into_iter()
                .map(|c| (c.community_id, c))
                .collect(),
        }
    }

    /// Settings for `community`, unconfigured if absent.
    pub fn community(&self, community: CommunityId) -> CommunitySettings {
        self.communities
            .get(&community)
            .cloned()
            .unwrap_or_else(|| CommunitySettings::unconfigured(community))
    }
}

impl CordonConfig {
    /// Create a new configuration with the given store path
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store: StoreConfig {
                path: store_path,
                debounce_ms: default_debounce_ms(),
            },
            enforcement: EnforcementConfig::default(),
            communities: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, &contents)
    }

    /// Settings for the enforcement engine
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::new(self.enforcement.clone(), self.communities.clone())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.store.debounce_ms)
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(store_path: &Path) -> String {
        format!(
            r#"# Cordon Configuration
#
# Durable moderation settings live in one [[community]] table per community.
# A community without a mute_grant runs in warning-only mode.

[store]
# CBOR snapshot of active conflicts
path = "{store_path}"

# Mutations within this window coalesce into one durable write
debounce_ms = 500

[enforcement]
# Violation count above which the mute grant and grant removal apply
mute_threshold = 1

# Violation count above which ALL communicate-capable grants are removed
strict_threshold = 2

# Channels younger than this never get a communicate-deny override (1 hour)
channel_grace_ms = 3600000

# Voice connect-deny lock lifetime (10 minutes)
lock_duration_ms = 600000

# Lock-expiry and restoration sweep interval
sweep_interval_secs = 60

# Violation counters reset after this rolling window (24 hours)
reset_window_ms = 86400000
reset_interval_secs = 3600

# Audit-trail correlation window for unauthorized unmute detection
tamper_window_ms = 5000

# [[community]]
# community_id = 123456789012345678
# audit_channel = 123456789012345679
# mute_grant = 123456789012345680
# mute_duration_ms = 600000
# oversight_grants = [123456789012345681]

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides)
level = "info"
"#,
            store_path = store_path.display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path, store_path: &Path) -> Result<(), ConfigError> {
        write_file(config_path, &Self::generate_default_toml(store_path))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Default data directory: ~/.local/share/cordon
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cordon")
}

/// Default config path: ~/.local/share/cordon/config.toml
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

/// Default store path: ~/.local/share/cordon/conflicts.cbor
pub fn default_store_path() -> PathBuf {
    default_data_dir().join("conflicts.cbor")
}
