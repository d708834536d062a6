use crate::config::ConfigError;
use crate::queue::QueueError;
use crate::ssh::exec::ExecError;

/// Fatal error taxonomy for one orchestration run. Every variant unwinds
/// to the caller after the cleanup guard has had its one chance to run;
/// cleanup failures themselves are logged, never raised.
#[derive(Debug, thiserror::Error)]
pub enum AnnexError {
    #[error("{0}")]
    Validation(String),
    #[error("no jobs for '{annex_name}' are in the queue; submit them with --annex-name first")]
    NoMatchingJobs { annex_name: String },
    #[error("annex script dir {path} not found or not a directory")]
    ScriptDirMissing { path: String },
    #[error("could not find state-tracking executable, expected {path}")]
    TrackingExecutableMissing { path: String },
    #[error("token file {path} doesn't exist")]
    TokenFileMissing { path: String },
    #[error("control path {path} must be a directory")]
    ControlPathNotADirectory { path: String },
    #[error("password file {path} does not exist and could not be created: {source}")]
    PasswordFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("did not make initial connection after {timeout_secs} seconds, aborting")]
    ConnectionTimeout { timeout_secs: u64 },
    #[error("failed to make initial connection to {site}, aborting ({code})")]
    ConnectionFailed { site: String, code: i32 },
    #[error("failed to {task} in {timeout_secs} seconds")]
    RemoteTimeout { task: String, timeout_secs: u64 },
    #[error("failed to {task}, got output:\n{output}")]
    RemoteFailure { task: String, output: String },
    #[error("failed to start annex, remote batch system returned code {code}")]
    PilotFailure { code: i32 },
    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },
    #[error("failed to submit state-tracking job: {0}")]
    TrackingSubmit(#[source] QueueError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Subprocess(#[from] ExecError),
}

impl AnnexError {
    /// Maps subprocess-engine failures onto the remote-operation taxonomy,
    /// labelling timeouts with the task they interrupted.
    pub(crate) fn from_exec(task: &str, err: ExecError) -> Self {
        match err {
            ExecError::Timeout { timeout_secs, .. } => AnnexError::RemoteTimeout {
                task: task.to_string(),
                timeout_secs,
            },
            ExecError::Interrupted { signal } => AnnexError::Interrupted { signal },
            other => AnnexError::Subprocess(other),
        }
    }

    /// Process exit status for the top-level CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AnnexError::Interrupted { signal } => crate::signals::exit_code(*signal),
            _ => 1,
        }
    }
}
