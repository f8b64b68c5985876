//! Configuration loading via `ortho-config`.
//!
//! Each collaborator has its own struct so the CLI only validates what a verb
//! actually touches. Values merge defaults, `hostward.toml`, and environment
//! variables in that order of precedence.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::facade::FacadePolicies;

/// Default facade endpoint.
pub const DEFAULT_FACADE_URL: &str = "http://localhost:9085";
/// Default compute service endpoint.
pub const DEFAULT_COMPUTE_URL: &str = "http://localhost:8774/v2.1";
/// Default snapshot location.
pub const DEFAULT_STATE_FILE: &str = "hostward-state.json";

/// Remote configuration service settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTWARD_FACADE",
    discovery(
        app_name = "hostward",
        env_var = "HOSTWARD_CONFIG_PATH",
        config_file_name = "hostward.toml",
        dotfile_name = ".hostward.toml",
        project_file_name = "hostward.toml"
    )
)]
pub struct FacadeConfig {
    /// Base URL of the facade.
    #[ortho_config(default = DEFAULT_FACADE_URL.to_owned())]
    pub url: String,
    /// Per-request timeout in seconds.
    #[ortho_config(default = 30)]
    pub timeout_secs: u64,
    /// Poll budget for short jobs.
    #[ortho_config(default = 5)]
    pub poll_retries: u32,
    /// Upper bound on one backoff sleep, in seconds.
    #[ortho_config(default = 60)]
    pub poll_max_delay_secs: u64,
    /// Length of one backoff unit, in milliseconds.
    #[ortho_config(default = 1000)]
    pub poll_unit_ms: u64,
    /// Poll budget for deployment playbooks.
    #[ortho_config(default = 120)]
    pub playbook_poll_retries: u32,
    /// Poll budget for operating system installs.
    #[ortho_config(default = 240)]
    pub osinstall_poll_retries: u32,
}

/// Remote shell settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTWARD_SHELL",
    discovery(
        app_name = "hostward",
        env_var = "HOSTWARD_CONFIG_PATH",
        config_file_name = "hostward.toml",
        dotfile_name = ".hostward.toml",
        project_file_name = "hostward.toml"
    )
)]
pub struct ShellConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `sshpass` executable used for password logins.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// SSH connect timeout in seconds.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

/// Compute service settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTWARD_COMPUTE",
    discovery(
        app_name = "hostward",
        env_var = "HOSTWARD_CONFIG_PATH",
        config_file_name = "hostward.toml",
        dotfile_name = ".hostward.toml",
        project_file_name = "hostward.toml"
    )
)]
pub struct ComputeConfig {
    /// Base URL of the compute API.
    #[ortho_config(default = DEFAULT_COMPUTE_URL.to_owned())]
    pub url: String,
    /// Number of lookups while waiting for a hypervisor to register.
    #[ortho_config(default = 30)]
    pub registration_attempts: u32,
    /// Seconds between registration lookups.
    #[ortho_config(default = 10)]
    pub registration_interval_secs: u64,
    /// Largest tolerated clock difference between a host and this process.
    #[ortho_config(default = 60)]
    pub max_clock_skew_secs: u64,
}

/// Store snapshot settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HOSTWARD_STORE",
    discovery(
        app_name = "hostward",
        env_var = "HOSTWARD_CONFIG_PATH",
        config_file_name = "hostward.toml",
        dotfile_name = ".hostward.toml",
        project_file_name = "hostward.toml"
    )
)]
pub struct StoreConfig {
    /// Path of the JSON snapshot file.
    #[ortho_config(default = DEFAULT_STATE_FILE.to_owned())]
    pub state_file: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in hostward.toml",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }

    fn require_positive(&self, value: u64) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be at least 1: check {} or {} in [{}]",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }

    fn require_url(&self, value: &str) -> Result<(), ConfigError> {
        self.require(value)?;
        let trimmed = value.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "{} must be an http(s) URL, got {trimmed}: check {} or {} in [{}]",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }
}

macro_rules! loaders {
    ($ty:ty) => {
        impl $ty {
            /// Loads configuration without attempting to parse CLI arguments.
            /// Values still merge defaults, configuration files, and
            /// environment variables.
            ///
            /// # Errors
            ///
            /// Returns [`ConfigError::Parse`] when the merge fails.
            pub fn load_without_cli_args() -> Result<Self, ConfigError> {
                Self::load_from_iter([std::ffi::OsString::from("hostward")])
                    .map_err(|err| ConfigError::Parse(err.to_string()))
            }
        }
    };
}

loaders!(FacadeConfig);
loaders!(ShellConfig);
loaders!(ComputeConfig);
loaders!(StoreConfig);

impl FacadeConfig {
    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("facade URL", "HOSTWARD_FACADE_URL", "url", "facade")
            .require_url(&self.url)?;
        FieldMetadata::new(
            "facade timeout",
            "HOSTWARD_FACADE_TIMEOUT_SECS",
            "timeout_secs",
            "facade",
        )
        .require_positive(self.timeout_secs)?;
        FieldMetadata::new(
            "poll retries",
            "HOSTWARD_FACADE_POLL_RETRIES",
            "poll_retries",
            "facade",
        )
        .require_positive(u64::from(self.poll_retries))?;
        FieldMetadata::new(
            "poll unit",
            "HOSTWARD_FACADE_POLL_UNIT_MS",
            "poll_unit_ms",
            "facade",
        )
        .require_positive(self.poll_unit_ms)?;
        FieldMetadata::new(
            "playbook poll retries",
            "HOSTWARD_FACADE_PLAYBOOK_POLL_RETRIES",
            "playbook_poll_retries",
            "facade",
        )
        .require_positive(u64::from(self.playbook_poll_retries))?;
        FieldMetadata::new(
            "OS install poll retries",
            "HOSTWARD_FACADE_OSINSTALL_POLL_RETRIES",
            "osinstall_poll_retries",
            "facade",
        )
        .require_positive(u64::from(self.osinstall_poll_retries))?;
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Poll budgets derived from this configuration.
    #[must_use]
    pub const fn policies(&self) -> FacadePolicies {
        FacadePolicies::new(
            Duration::from_millis(self.poll_unit_ms),
            Duration::from_secs(self.poll_max_delay_secs),
            self.poll_retries,
            self.playbook_poll_retries,
            self.osinstall_poll_retries,
        )
    }
}

impl ShellConfig {
    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("ssh binary", "HOSTWARD_SHELL_SSH_BIN", "ssh_bin", "shell")
            .require(&self.ssh_bin)?;
        FieldMetadata::new(
            "sshpass binary",
            "HOSTWARD_SHELL_SSHPASS_BIN",
            "sshpass_bin",
            "shell",
        )
        .require(&self.sshpass_bin)?;
        FieldMetadata::new(
            "known hosts file",
            "HOSTWARD_SHELL_SSH_KNOWN_HOSTS_FILE",
            "ssh_known_hosts_file",
            "shell",
        )
        .require(&self.ssh_known_hosts_file)?;
        FieldMetadata::new(
            "connect timeout",
            "HOSTWARD_SHELL_CONNECT_TIMEOUT_SECS",
            "connect_timeout_secs",
            "shell",
        )
        .require_positive(self.connect_timeout_secs)?;
        Ok(())
    }
}

impl ComputeConfig {
    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new("compute URL", "HOSTWARD_COMPUTE_URL", "url", "compute")
            .require_url(&self.url)?;
        FieldMetadata::new(
            "registration attempts",
            "HOSTWARD_COMPUTE_REGISTRATION_ATTEMPTS",
            "registration_attempts",
            "compute",
        )
        .require_positive(u64::from(self.registration_attempts))?;
        Ok(())
    }

    /// Sleep between registration lookups.
    #[must_use]
    pub const fn registration_interval(&self) -> Duration {
        Duration::from_secs(self.registration_interval_secs)
    }
}

impl StoreConfig {
    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no state file is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "state file",
            "HOSTWARD_STORE_STATE_FILE",
            "state_file",
            "store",
        )
        .require(&self.state_file)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds an unusable value.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
