//! SSH settings for replication targets.
//!
//! [`RemoteConfig`] is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables. The destination given on
//! the command line then overrides user, host, and port.

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// Port used when a destination does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// SSH and remote `zsm` settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZSM_REMOTE",
    discovery(
        app_name = "zsm",
        env_var = "ZSM_CONFIG_PATH",
        config_file_name = "zsm.toml",
        dotfile_name = ".zsm.toml",
        project_file_name = "zsm.toml"
    )
)]
pub struct RemoteConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Remote host name or address.
    #[ortho_config(default = String::new())]
    pub ssh_host: String,
    /// Remote SSH port.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Private key used for authentication. Supports tilde expansion
    /// (`~/.ssh/id_ed25519`). When absent, `ssh` falls back to its default
    /// key locations.
    pub ssh_identity_file: Option<String>,
    /// Pinned host public key in `known_hosts` form, for example
    /// `ssh-ed25519 AAAAC3Nza...`. Connections to a host presenting any
    /// other key are refused.
    #[ortho_config(default = String::new())]
    pub ssh_host_key: String,
    /// Path of the `zsm` executable on the remote host.
    #[ortho_config(default = "zsm".to_owned())]
    pub remote_zsm: String,
    /// Directory holding per-connection control sockets. Defaults to the
    /// system temporary directory.
    pub control_dir: Option<String>,
}

impl RemoteConfig {
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

    /// Applies a `USER@HOST[:PORT]` destination.
    ///
    /// The user part is optional; without it the configured user is kept.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Destination`] when the host is empty or the
    /// port is not a number between 1 and 65535.
    pub fn with_destination(mut self, destination: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::Destination(destination.to_owned());
        let (user, address) = match destination.split_once('@') {
            Some((user, address)) if !user.is_empty() => (Some(user), address),
            Some(_) => return Err(invalid()),
            None => (None, destination),
        };
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .ok()
                    .filter(|number| *number != 0)
                    .ok_or_else(invalid)?,
            ),
            None => (address, DEFAULT_SSH_PORT),
        };
        if host.is_empty() || host.contains(['@', ':']) {
            return Err(invalid());
        }

        if let Some(name) = user {
            name.clone_into(&mut self.ssh_user);
        }
        host.clone_into(&mut self.ssh_host);
        self.ssh_port = port;
        Ok(self)
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first empty field and
    /// how to provide it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_value(&self.ssh_host, "ssh_host")?;
        Self::require_value(&self.ssh_host_key, "ssh_host_key")?;
        Self::require_value(&self.remote_zsm, "remote_zsm")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_optional_value(self.control_dir.as_deref(), "control_dir")?;
        if self.ssh_port == 0 {
            return Err(Self::missing("ssh_port"));
        }
        Ok(())
    }

    /// Host pattern used in `known_hosts`; non-default ports use the
    /// bracketed `[host]:port` form.
    #[must_use]
    pub fn known_hosts_pattern(&self) -> String {
        if self.ssh_port == DEFAULT_SSH_PORT {
            self.ssh_host.clone()
        } else {
            format!("[{}]:{}", self.ssh_host, self.ssh_port)
        }
    }

    /// `user@host` argument passed to `ssh`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.ssh_user, self.ssh_host)
    }

    fn require_optional_value(value: Option<&str>, field: &'static str) -> Result<(), ConfigError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(Self::missing(field)),
        }
    }

    fn require_value(value: &str, field: &'static str) -> Result<(), ConfigError> {
        Self::require_optional_value(Some(value), field)
    }

    fn missing(field: &'static str) -> ConfigError {
        ConfigError::Missing {
            field,
            env_var: format!("ZSM_REMOTE_{}", field.to_uppercase()),
        }
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is not set.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
