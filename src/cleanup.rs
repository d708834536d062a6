//! Scoped cleanup guard for one orchestration run. Exactly one release,
//! on every exit path: normal return, error unwind, or a delivered
//! SIGINT/SIGTERM mapped onto the error path. Cleanup failures are
//! logged, never raised, since the run is already unwinding.

use crate::shared::append_annex_log;
use crate::ssh::exec::run_captured;
use crate::ssh::SharedConnection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct CleanupGuard<'a> {
    connection: &'a SharedConnection,
    state_root: PathBuf,
    timeout: Duration,
    scratch_dir: Option<String>,
    local_secrets: Vec<PathBuf>,
    released: bool,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(connection: &'a SharedConnection, state_root: &Path, timeout: Duration) -> Self {
        Self {
            connection,
            state_root: state_root.to_path_buf(),
            timeout,
            scratch_dir: None,
            local_secrets: Vec::new(),
            released: false,
        }
    }

    /// Called once the remote mkdir has reported a path. Until then,
    /// release has no remote work to do.
    pub fn set_scratch_dir(&mut self, path: String) {
        self.scratch_dir = Some(path);
    }

    /// A locally created transient secret (an on-the-fly token file),
    /// deleted at release regardless of the remote outcome.
    pub fn schedule_local_secret(&mut self, path: PathBuf) {
        self.local_secrets.push(path);
    }

    /// Idempotent: the second and later calls perform no remote call at
    /// all. Runs with interrupts ignored, since release is commonly on
    /// the unwind path of a delivered signal.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(dir) = self.scratch_dir.take() {
            append_annex_log(
                &self.state_root,
                "debug",
                "cleanup.remote",
                &format!("removing remote temporary directory {dir}"),
            );
            let cmd = self.connection.remote_command(&["rm", "-fr", &dir]);
            let removed = matches!(
                run_captured("remove remote temporary directory", cmd, self.timeout, false),
                Ok(out) if out.success
            );
            if !removed {
                append_annex_log(
                    &self.state_root,
                    "warn",
                    "cleanup.remote",
                    &format!(
                        "did not clean up remote temporary directory after {} seconds, '{dir}' may need to be deleted manually",
                        self.timeout.as_secs()
                    ),
                );
            }
        }

        for path in self.local_secrets.drain(..) {
            let _ = fs::remove_file(path);
        }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Stub ssh that appends one line per invocation, so tests can count
    /// remote calls.
    fn counting_stub(dir: &Path, log: &Path) -> SharedConnection {
        let stub = dir.join("counting-ssh");
        fs::write(
            &stub,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .expect("write stub");
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).expect("chmod stub");
        SharedConnection::new("target", Path::new("/tmp"), Vec::new())
            .with_ssh_program(stub.to_str().expect("utf8"))
    }

    fn call_count(log: &Path) -> usize {
        fs::read_to_string(log)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[test]
    fn release_is_idempotent_and_makes_one_remote_call() {
        let tmp = tempdir().expect("tempdir");
        let log = tmp.path().join("calls.log");
        let connection = counting_stub(tmp.path(), &log);

        let mut guard = CleanupGuard::new(&connection, tmp.path(), Duration::from_secs(5));
        guard.set_scratch_dir("/remote/scratch/remote_script.XXXX".to_string());
        guard.release();
        guard.release();
        assert_eq!(call_count(&log), 1);
    }

    #[test]
    fn drop_after_release_does_nothing_more() {
        let tmp = tempdir().expect("tempdir");
        let log = tmp.path().join("calls.log");
        let connection = counting_stub(tmp.path(), &log);

        {
            let mut guard = CleanupGuard::new(&connection, tmp.path(), Duration::from_secs(5));
            guard.set_scratch_dir("/remote/scratch/x".to_string());
            guard.release();
        }
        assert_eq!(call_count(&log), 1);
    }

    #[test]
    fn no_scratch_dir_means_no_remote_call() {
        let tmp = tempdir().expect("tempdir");
        let log = tmp.path().join("calls.log");
        let connection = counting_stub(tmp.path(), &log);

        drop(CleanupGuard::new(
            &connection,
            tmp.path(),
            Duration::from_secs(5),
        ));
        assert_eq!(call_count(&log), 0);
    }

    #[test]
    fn local_secrets_are_deleted_even_when_remote_cleanup_fails() {
        let tmp = tempdir().expect("tempdir");
        let secret = tmp.path().join("token");
        fs::write(&secret, "secret").expect("write secret");

        let connection = SharedConnection::new("target", Path::new("/tmp"), Vec::new())
            .with_ssh_program("false");
        let mut guard = CleanupGuard::new(&connection, tmp.path(), Duration::from_secs(5));
        guard.set_scratch_dir("/remote/scratch/x".to_string());
        guard.schedule_local_secret(secret.clone());
        guard.release();

        assert!(!secret.exists());
        let log = fs::read_to_string(tmp.path().join("logs/annex.log")).expect("log");
        assert!(log.contains("may need to be deleted manually"));
    }
}
