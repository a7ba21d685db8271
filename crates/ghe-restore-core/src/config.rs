//! Configuration structures for restore operations.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default restore host used when none is given on the command line
    #[serde(default)]
    pub restore_host: Option<String>,

    /// Local directory holding snapshot directories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Remote filesystem root (empty means `/`)
    #[serde(default)]
    pub remote_root_dir: String,

    /// Remote data directory
    #[serde(default = "default_remote_data_dir")]
    pub remote_data_dir: String,

    /// Remote user data directory
    #[serde(default = "default_remote_data_user_dir")]
    pub remote_data_user_dir: String,

    /// Version string reported in logs and uploaded to the target
    #[serde(default = "default_backup_utils_version")]
    pub backup_utils_version: String,

    /// Directory holding the external restore tools
    #[serde(default = "default_tools_dir")]
    pub tools_dir: PathBuf,

    /// SSH transport settings
    #[serde(default)]
    pub ssh: SshConfig,
}

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Administrative SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Remote user
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Extra `-o` options passed to ssh
    #[serde(default)]
    pub options: Vec<String>,

    /// Directory for multiplexed control sockets (multiplexing disabled if unset)
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            port: default_ssh_port(),
            user: default_ssh_user(),
            options: Vec::new(),
            control_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            restore_host: None,
            data_dir: default_data_dir(),
            remote_root_dir: String::new(),
            remote_data_dir: default_remote_data_dir(),
            remote_data_user_dir: default_remote_data_user_dir(),
            backup_utils_version: default_backup_utils_version(),
            tools_dir: default_tools_dir(),
            ssh: SshConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_remote_data_dir() -> String {
    "/data".to_string()
}

fn default_remote_data_user_dir() -> String {
    "/data/user".to_string()
}

fn default_backup_utils_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_tools_dir() -> PathBuf {
    PathBuf::from("share/github-backup-utils")
}

fn default_ssh_port() -> u16 {
    122
}

fn default_ssh_user() -> String {
    "admin".to_string()
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `GHE_*` environment overrides on top of file values
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("GHE_RESTORE_HOST").filter(|h| !h.is_empty()) {
            self.restore_host = Some(host);
        }
        if let Some(dir) = lookup("GHE_DATA_DIR").filter(|d| !d.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(root) = lookup("GHE_REMOTE_ROOT_DIR") {
            self.remote_root_dir = root;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("data_dir must not be empty".to_string()));
        }
        if !self.remote_data_user_dir.starts_with('/') {
            return Err(Error::Config(format!(
                "remote_data_user_dir must be absolute, got '{}'",
                self.remote_data_user_dir
            )));
        }
        if self.ssh.port == 0 {
            return Err(Error::Config("ssh.port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Pick the restore host: explicit argument wins over the configured default
    pub fn resolve_host(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.restore_host.clone())
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "No restore host given and restore_host is not configured".to_string(),
                )
            })
    }

    /// Path on the target, prefixed with the remote root
    pub fn remote_path(&self, path: &str) -> String {
        format!("{}{}", self.remote_root_dir.trim_end_matches('/'), path)
    }

    /// The remote `common` folder below the user data directory
    pub fn common_dir(&self) -> String {
        format!("{}/common", self.remote_data_user_dir.trim_end_matches('/'))
    }

    /// Path inside the remote `common` folder
    pub fn common_path(&self, name: &str) -> String {
        format!("{}/{}", self.common_dir(), name)
    }
}
