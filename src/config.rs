//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::snapshot::{BucketConfig, Interval};
use crate::zfs::DEFAULT_ZFS_CMD;

/// Local snapshot settings derived from configuration files and environment
/// variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZSM",
    discovery(
        app_name = "zsm",
        env_var = "ZSM_CONFIG_PATH",
        config_file_name = "zsm.toml",
        dotfile_name = ".zsm.toml",
        project_file_name = "zsm.toml"
    )
)]
pub struct ZsmConfig {
    /// Path to the `zfs` executable. Defaults to `/sbin/zfs`.
    #[ortho_config(default = DEFAULT_ZFS_CMD.to_owned())]
    pub zfs_cmd: String,
    /// Snapshots kept at minute granularity.
    #[ortho_config(default = 60)]
    pub keep_minute: usize,
    /// Snapshots kept at hour granularity.
    #[ortho_config(default = 24)]
    pub keep_hour: usize,
    /// Snapshots kept at day granularity.
    #[ortho_config(default = 7)]
    pub keep_day: usize,
    /// Snapshots kept at week granularity.
    #[ortho_config(default = 4)]
    pub keep_week: usize,
    /// Snapshots kept at month granularity.
    #[ortho_config(default = 12)]
    pub keep_month: usize,
    /// Snapshots kept at year granularity.
    #[ortho_config(default = 5)]
    pub keep_year: usize,
    /// Comma-separated file systems never snapshotted by `create`.
    pub create_exclude: Option<String>,
    /// Comma-separated file systems never replicated by `send`.
    pub send_exclude: Option<String>,
}

/// Errors raised while loading or validating configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Parsing or merging configuration layers failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// A required value is missing or blank.
    #[error("missing {field}: set {env_var} or add {field} to zsm.toml")]
    Missing {
        /// Configuration key that failed validation.
        field: &'static str,
        /// Environment variable providing the key.
        env_var: String,
    },
    /// A replication destination could not be parsed.
    #[error("invalid destination {0:?}: expected USER@HOST[:PORT]")]
    Destination(String),
}

impl ZsmConfig {
    /// Loads configuration from defaults, configuration files, and
    /// environment variables without reading process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("zsm")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures the `zfs` path is present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when `zfs_cmd` is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zfs_cmd.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "zfs_cmd",
                env_var: String::from("ZSM_ZFS_CMD"),
            });
        }
        Ok(())
    }

    /// Retention buckets described by the `keep_*` settings.
    #[must_use]
    pub const fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new()
            .with(Interval::Minute, self.keep_minute)
            .with(Interval::Hour, self.keep_hour)
            .with(Interval::Day, self.keep_day)
            .with(Interval::Week, self.keep_week)
            .with(Interval::Month, self.keep_month)
            .with(Interval::Year, self.keep_year)
    }

    /// File systems listed in `create_exclude`, trimmed, blanks dropped.
    #[must_use]
    pub fn excluded_file_systems(&self) -> Vec<String> {
        split_list(self.create_exclude.as_deref())
    }

    /// File systems listed in `send_exclude`, trimmed, blanks dropped.
    #[must_use]
    pub fn send_excluded_file_systems(&self) -> Vec<String> {
        split_list(self.send_exclude.as_deref())
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

