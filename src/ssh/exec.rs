//! Subprocess engine shared by every bounded remote call: merged-output
//! capture over a nonblocking pipe, cooperative poll-then-drain loops,
//! and wall-clock deadlines that kill and reap rather than hang.

use crate::signals;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

pub(crate) const POLL_SLEEP: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("subprocess pipe error: {0}")]
    Io(#[from] io::Error),
    #[error("`{label}` did not finish within {timeout_secs} seconds")]
    Timeout { label: String, timeout_secs: u64 },
    #[error("interrupted by signal {signal}")]
    Interrupted { signal: i32 },
}

#[derive(Debug)]
pub struct CapturedOutput {
    pub success: bool,
    pub code: Option<i32>,
    /// Combined stdout+stderr, lossily decoded.
    pub output: String,
}

/// A pipe whose write end is handed to children as both stdout and
/// stderr, so their combined output lands in one stream the parent can
/// drain nonblockingly.
pub(crate) struct OutputPipe {
    read: File,
    write: Option<OwnedFd>,
}

impl OutputPipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let read = unsafe { File::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        set_cloexec(fds[0])?;
        set_cloexec(fds[1])?;
        Ok(Self {
            read,
            write: Some(write),
        })
    }

    /// Dup'd write end for a child's stdout or stderr. The dup clears
    /// close-on-exec, so the child inherits it.
    pub fn writer(&self) -> io::Result<Stdio> {
        let Some(write) = &self.write else {
            return Err(io::Error::other("output pipe writer already closed"));
        };
        let fd = unsafe { libc::dup(write.as_raw_fd()) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { Stdio::from_raw_fd(fd) })
    }

    /// The parent must drop its write end before draining, or it will
    /// never observe EOF.
    pub fn close_writer(&mut self) {
        self.write.take();
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        let fd = self.read.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Drains everything currently available into `buf`. A would-block
    /// read is not an error; it means no data is ready this iteration.
    pub fn read_available(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut chunk = [0u8; 1024];
        let mut total = 0;
        loop {
            match self.read.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(total)
    }
}

fn set_cloexec(fd: i32) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn spawn_error(cmd: &Command, source: io::Error) -> ExecError {
    ExecError::Spawn {
        program: cmd.get_program().to_string_lossy().into_owned(),
        source,
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Runs one command with merged stdout/stderr captured, bounded by
/// `timeout`. On timeout the child is killed, its remaining output
/// drained, and the process reaped before the error returns, so no
/// handle is ever orphaned. With `interruptible`, a delivered SIGINT/SIGTERM
/// aborts the call the same way; cleanup passes `false` because it runs
/// on the unwind path of exactly such an interrupt.
pub(crate) fn run_captured(
    label: &str,
    mut cmd: Command,
    timeout: Duration,
    interruptible: bool,
) -> Result<CapturedOutput, ExecError> {
    let mut pipe = OutputPipe::new()?;
    cmd.stdin(Stdio::null());
    cmd.stdout(pipe.writer()?);
    cmd.stderr(pipe.writer()?);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => return Err(spawn_error(&cmd, source)),
    };
    drop(cmd);
    pipe.close_writer();
    pipe.set_nonblocking()?;

    let deadline = Instant::now() + timeout;
    let mut raw = Vec::new();
    let status = loop {
        if interruptible {
            if let Some(signal) = signals::delivered() {
                kill_and_reap(&mut child);
                let _ = pipe.read_available(&mut raw);
                return Err(ExecError::Interrupted { signal });
            }
        }

        pipe.read_available(&mut raw)?;
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    kill_and_reap(&mut child);
                    let _ = pipe.read_available(&mut raw);
                    return Err(ExecError::Timeout {
                        label: label.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
                std::thread::sleep(POLL_SLEEP);
            }
        }
    };
    pipe.read_available(&mut raw)?;

    Ok(captured(status.success(), status, raw))
}

/// Runs `producer | consumer` with the producer's stderr and the
/// consumer's stdout+stderr captured into one stream. The pipeline is
/// done when the consumer exits; a producer still blocked on the closed
/// pipe at that point is killed. Non-zero exit from either end counts as
/// failure.
pub(crate) fn run_pipeline_captured(
    label: &str,
    mut producer: Command,
    mut consumer: Command,
    timeout: Duration,
) -> Result<CapturedOutput, ExecError> {
    let mut pipe = OutputPipe::new()?;
    producer.stdin(Stdio::null());
    producer.stdout(Stdio::piped());
    producer.stderr(pipe.writer()?);

    let mut producer_child = match producer.spawn() {
        Ok(child) => child,
        Err(source) => return Err(spawn_error(&producer, source)),
    };
    drop(producer);

    let producer_out = producer_child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Io(io::Error::other("missing producer stdout")))?;
    consumer.stdin(Stdio::from(producer_out));
    consumer.stdout(pipe.writer()?);
    consumer.stderr(pipe.writer()?);

    let mut consumer_child = match consumer.spawn() {
        Ok(child) => child,
        Err(source) => {
            kill_and_reap(&mut producer_child);
            return Err(spawn_error(&consumer, source));
        }
    };
    drop(consumer);
    pipe.close_writer();
    pipe.set_nonblocking()?;

    let deadline = Instant::now() + timeout;
    let mut raw = Vec::new();
    let (producer_status, consumer_status) = loop {
        if let Some(signal) = signals::delivered() {
            kill_and_reap(&mut producer_child);
            kill_and_reap(&mut consumer_child);
            let _ = pipe.read_available(&mut raw);
            return Err(ExecError::Interrupted { signal });
        }

        pipe.read_available(&mut raw)?;
        if let Some(consumer_status) = consumer_child.try_wait()? {
            let producer_status = match producer_child.try_wait()? {
                Some(status) => status,
                None => {
                    let _ = producer_child.kill();
                    producer_child.wait()?
                }
            };
            break (producer_status, consumer_status);
        }

        if Instant::now() >= deadline {
            kill_and_reap(&mut producer_child);
            kill_and_reap(&mut consumer_child);
            let _ = pipe.read_available(&mut raw);
            return Err(ExecError::Timeout {
                label: label.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
        std::thread::sleep(POLL_SLEEP);
    };
    pipe.read_available(&mut raw)?;

    Ok(captured(
        producer_status.success() && consumer_status.success(),
        consumer_status,
        raw,
    ))
}

fn captured(success: bool, status: ExitStatus, raw: Vec<u8>) -> CapturedOutput {
    CapturedOutput {
        success,
        code: status.code(),
        output: String::from_utf8_lossy(&raw).into_owned(),
    }
}
