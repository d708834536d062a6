//! Local credential material for a run: the pool password file and an
//! on-the-fly annex token fetched from the local security subsystem.

use crate::config::{ConfigError, Settings};
use crate::error::AnnexError;
use crate::ssh::exec::run_captured;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

pub fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Creates the password file with 16 random bytes when it does not exist
/// yet. Written 0600 and locked down to 0400 afterward; an existing file
/// is reused untouched.
pub fn ensure_password_file(path: &Path) -> Result<(), AnnexError> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::fs::PermissionsExt;

    if path.exists() {
        return Ok(());
    }

    let password_error = |source: std::io::Error| AnnexError::PasswordFile {
        path: path.display().to_string(),
        source,
    };

    let mut random = [0u8; 16];
    getrandom::getrandom(&mut random)
        .map_err(|err| password_error(std::io::Error::other(err.to_string())))?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(password_error)?;
    file.write_all(&random).map_err(password_error)?;
    drop(file);
    fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(password_error)?;
    Ok(())
}

/// Fetches a scoped annex token from the local token authority, bounded
/// by the token-fetch timeout. Returns the path the authority wrote the
/// token to; the caller schedules it for deletion at cleanup.
pub fn fetch_annex_token(settings: &Settings, annex_name: &str) -> Result<PathBuf, AnnexError> {
    const TASK: &str = "create annex token";

    let token_name = format!("{annex_name}.{}@{}", username(), settings.token_domain);

    let mut cmd = Command::new("condor_token_fetch");
    cmd.args(["-lifetime", &settings.token_lifetime_secs.to_string()]);
    cmd.args(["-token", &token_name]);
    cmd.args(["-key", &settings.token_key_name]);
    cmd.args(["-authz", "READ"]);
    cmd.args(["-authz", "ADVERTISE_STARTD"]);
    cmd.args(["-authz", "ADVERTISE_MASTER"]);
    cmd.args(["-authz", "ADVERTISE_SCHEDD"]);

    let out = run_captured(TASK, cmd, settings.token_fetch_timeout(), true)
        .map_err(|err| AnnexError::from_exec(TASK, err))?;
    if !out.success {
        return Err(AnnexError::RemoteFailure {
            task: TASK.to_string(),
            output: out.output.trim().to_string(),
        });
    }

    Ok(token_path(settings, &token_name)?)
}

/// Where the token authority drops a token by this name: the configured
/// token directory when set, `~/.condor/tokens.d` otherwise.
fn token_path(settings: &Settings, token_name: &str) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = &settings.token_directory {
        return Ok(dir.join(token_name));
    }
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home)
        .join(".condor/tokens.d")
        .join(token_name))
}
