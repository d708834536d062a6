use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to resolve home directory for state root")]
    HomeDirectoryUnavailable,
}

pub const GLOBAL_STATE_DIR: &str = ".hpcannex";
pub const SETTINGS_FILE_NAME: &str = "config.yaml";

/// Operator-overridable settings. Every timeout mirrors a remote phase of
/// the orchestration; the defaults are the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_initial_connection_timeout")]
    pub initial_connection_timeout_secs: u64,
    #[serde(default = "default_remote_cleanup_timeout")]
    pub remote_cleanup_timeout_secs: u64,
    #[serde(default = "default_remote_mkdir_timeout")]
    pub remote_mkdir_timeout_secs: u64,
    #[serde(default = "default_remote_populate_timeout")]
    pub remote_populate_timeout_secs: u64,
    #[serde(default = "default_token_fetch_timeout")]
    pub token_fetch_timeout_secs: u64,
    #[serde(default = "default_token_lifetime")]
    pub token_lifetime_secs: u64,
    #[serde(default = "default_token_key_name")]
    pub token_key_name: String,
    #[serde(default = "default_token_domain")]
    pub token_domain: String,
    /// Where the token authority drops fetched tokens; defaults to
    /// `~/.condor/tokens.d`.
    #[serde(default)]
    pub token_directory: Option<PathBuf>,
    /// Location of the per-site script trio and the tracking executable.
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
    #[serde(default = "default_collector")]
    pub collector: String,
    /// Client used for both the shared connection and remote commands.
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    /// Gateway hop the login node runs to reach the site proper.
    #[serde(default = "default_gateway_program")]
    pub gateway_program: String,
    /// Optional capability-registry override file.
    #[serde(default)]
    pub registry_file: Option<PathBuf>,
}

fn default_initial_connection_timeout() -> u64 {
    180
}

fn default_remote_cleanup_timeout() -> u64 {
    60
}

fn default_remote_mkdir_timeout() -> u64 {
    30
}

fn default_remote_populate_timeout() -> u64 {
    60
}

fn default_token_fetch_timeout() -> u64 {
    20
}

fn default_token_lifetime() -> u64 {
    60 * 60 * 24 * 90
}

fn default_token_key_name() -> String {
    "hpcannex-key".to_string()
}

fn default_token_domain() -> String {
    "annex.osgdev.chtc.io".to_string()
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("/usr/libexec/condor/annex")
}

fn default_collector() -> String {
    "hpcannex-cm.chtc.wisc.edu".to_string()
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_gateway_program() -> String {
    "gsissh".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("defaults always deserialize")
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads `<state_root>/config.yaml` when present; a missing file means
    /// pure defaults.
    pub fn load(state_root: &Path) -> Result<Self, ConfigError> {
        let path = state_root.join(SETTINGS_FILE_NAME);
        if path.exists() {
            Self::from_path(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn initial_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_connection_timeout_secs)
    }

    pub fn remote_cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_cleanup_timeout_secs)
    }

    pub fn remote_mkdir_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_mkdir_timeout_secs)
    }

    pub fn remote_populate_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_populate_timeout_secs)
    }

    pub fn token_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.token_fetch_timeout_secs)
    }
}

pub fn default_state_root() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(GLOBAL_STATE_DIR))
}
