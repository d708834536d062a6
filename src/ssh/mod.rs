//! Shared SSH connection: one authenticated, multiplexed transport per
//! orchestration run. `establish()` pays the interactive-authentication
//! cost once; every later remote call reuses the control socket.

pub mod exec;

use crate::error::AnnexError;
use crate::signals;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SharedConnection {
    /// Overridable so tests can stand in a local stub for the ssh binary.
    ssh_program: String,
    target: String,
    control_path: String,
    /// Gateway hop run on the login node, e.g. `gsissh <site-host>`.
    indirect_command: Vec<String>,
}

impl SharedConnection {
    pub fn new(target: &str, control_dir: &Path, indirect_command: Vec<String>) -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            target: target.to_string(),
            control_path: format!("{}/master-%C", control_dir.display()),
            indirect_command,
        }
    }

    pub fn with_ssh_program(mut self, program: &str) -> Self {
        self.ssh_program = program.to_string();
        self
    }

    /// Multiplexing options shared by every call in the run. The socket
    /// path partitions concurrent runs by control directory.
    fn multiplex_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "ControlPersist=\"5m\"".to_string(),
            "-o".to_string(),
            "ControlMaster=\"auto\"".to_string(),
            "-o".to_string(),
            format!("ControlPath=\"{}\"", self.control_path),
        ]
    }

    /// A command running `args` at the remote site over the shared
    /// connection.
    pub fn remote_command<S: AsRef<str>>(&self, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.args(self.multiplex_options());
        cmd.arg(&self.target);
        cmd.args(&self.indirect_command);
        for arg in args {
            cmd.arg(arg.as_ref());
        }
        cmd
    }

    /// Operator hint for reusing the shared connection by hand.
    pub fn shared_command_hint(&self) -> String {
        format!(
            "{} {} {}",
            self.ssh_program,
            self.multiplex_options().join(" "),
            self.target
        )
    }

    /// One no-op remote command, stdio inherited so the operator can do
    /// the interactive-authentication dance. Bounded; a timeout kills the
    /// child, and an interrupt aborts promptly: no remote state exists
    /// yet, so no cleanup is owed.
    pub fn establish(&self, site_pretty_name: &str, timeout: Duration) -> Result<(), AnnexError> {
        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg("-f");
        cmd.args(self.multiplex_options());
        cmd.arg(&self.target);
        cmd.args(&self.indirect_command);
        cmd.args(["exit", "0"]);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Err(exec::spawn_error(&cmd, source).into()),
        };

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(signal) = signals::delivered() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnnexError::Interrupted { signal });
            }
            match child.try_wait().map_err(exec::ExecError::Io)? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => {
                    return Err(AnnexError::ConnectionFailed {
                        site: site_pretty_name.to_string(),
                        code: status.code().unwrap_or(-1),
                    })
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AnnexError::ConnectionTimeout {
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(exec::POLL_SLEEP);
                }
            }
        }
    }
}
