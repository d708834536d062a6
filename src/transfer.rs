//! Remote scratch-directory creation and archive staging. Both calls are
//! bounded and run over the shared connection; staging streams a local
//! tar directly into a remote unpack, never touching local disk.

use crate::error::AnnexError;
use crate::ssh::exec::{run_captured, run_pipeline_captured};
use crate::ssh::SharedConnection;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Subdirectory of the scratch dir that staged container images land in,
/// regardless of their source layout.
pub const IMAGE_PREFIX: &str = "sif/";

/// One file to stage: archived under `name`, read from `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub dir: PathBuf,
    pub name: String,
}

impl StagedFile {
    /// A bare file name has an empty parent, which `tar -C` rejects, so
    /// relative paths are anchored at the current directory.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let parent = path.parent()?;
        let dir = if parent.as_os_str().is_empty() {
            std::env::current_dir().ok()?
        } else {
            parent.to_path_buf()
        };
        Some(Self {
            dir,
            name: path.file_name()?.to_string_lossy().into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StageOptions<'a> {
    /// `tar -h`: archive what symlinks point at.
    pub follow_symlinks: bool,
    /// Rewrite archive paths under this prefix at the destination.
    pub prefix: Option<&'a str>,
}

/// Creates the namespaced scratch root if absent, then a collision-proof
/// subdirectory beneath it. Returns the trimmed absolute path. On timeout
/// the remote process is killed and drained; whether the directory exists
/// is then unknown, which cleanup tolerates.
pub fn make_scratch_dir(
    connection: &SharedConnection,
    timeout: Duration,
) -> Result<String, AnnexError> {
    const TASK: &str = "make remote temporary directory";

    // Escaped so ${HOME} expands on the far side of the gateway hop, not
    // on the login node.
    let remote_command = r"mkdir -p \${HOME}/.hpc-annex/scratch && mktemp --tmpdir=\${HOME}/.hpc-annex/scratch --directory remote_script.XXXXXXXX";
    let cmd = connection.remote_command(&["sh", "-c", &format!("\"'{remote_command}'\"")]);

    let out = run_captured(TASK, cmd, timeout, true)
        .map_err(|err| AnnexError::from_exec(TASK, err))?;
    if out.success {
        Ok(out.output.trim().to_string())
    } else {
        Err(AnnexError::RemoteFailure {
            task: TASK.to_string(),
            output: out.output.trim().to_string(),
        })
    }
}

/// Streams `files` as one tar archive into `remote_dir`, bounded by
/// `timeout`. Non-zero exit from either end of the pipeline, or a
/// timeout, raises an error labelled with `task` and carrying the
/// captured combined output.
pub fn stage_files(
    connection: &SharedConnection,
    remote_dir: &str,
    files: &[StagedFile],
    options: StageOptions<'_>,
    task: &str,
    timeout: Duration,
) -> Result<(), AnnexError> {
    let mut tar = Command::new("tar");
    tar.arg("-c").arg("-f-");
    if options.follow_symlinks {
        tar.arg("-h");
    }
    if let Some(prefix) = options.prefix {
        tar.arg(format!("--transform=s|^|{prefix}|"));
    }
    for file in files {
        tar.arg("-C").arg(&file.dir).arg(&file.name);
    }

    let unpack = connection.remote_command(&["tar", "-C", remote_dir, "-x", "-f-"]);

    let out = run_pipeline_captured(task, tar, unpack, timeout)
        .map_err(|err| AnnexError::from_exec(task, err))?;
    if out.success {
        Ok(())
    } else {
        Err(AnnexError::RemoteFailure {
            task: task.to_string(),
            output: out.output.trim().to_string(),
        })
    }
}
