//! Runs the remote pilot script and streams its control protocol. Single
//! threaded by design: one cooperative poll-then-drain loop, so directive
//! application stays strictly sequential.

use crate::error::AnnexError;
use crate::protocol::{LineDecoder, PilotLine};
use crate::signals;
use crate::ssh::exec::{spawn_error, ExecError, OutputPipe, POLL_SLEEP};
use crate::ssh::SharedConnection;
use crate::state::DirectiveSink;
use std::process::Stdio;

/// Everything the pilot script takes on its command line, in its fixed
/// positional order.
#[derive(Debug, Clone)]
pub struct PilotArgs {
    pub remote_script_dir: String,
    pub site_key: String,
    pub annex_name: String,
    pub queue_name: String,
    pub collector: String,
    pub token_file_name: String,
    pub lifetime_secs: u64,
    pub owners: String,
    pub nodes: Option<u32>,
    pub allocation: Option<String>,
    pub request_id: String,
    pub password_file_name: String,
    pub cpus: Option<u32>,
    pub mem_mb: Option<u64>,
}

impl PilotArgs {
    fn argv(&self) -> Vec<String> {
        let dir = &self.remote_script_dir;
        let site = &self.site_key;
        let optional = |value: Option<String>| value.unwrap_or_else(|| "undefined".to_string());
        vec![
            format!("{dir}/{site}.sh"),
            self.annex_name.clone(),
            self.queue_name.clone(),
            self.collector.clone(),
            format!("{dir}/{}", self.token_file_name),
            self.lifetime_secs.to_string(),
            format!("{dir}/{site}.pilot"),
            self.owners.clone(),
            optional(self.nodes.map(|n| n.to_string())),
            format!("{dir}/{site}.multi-pilot"),
            optional(self.allocation.clone()),
            self.request_id.clone(),
            format!("{dir}/{}", self.password_file_name),
            optional(self.cpus.map(|n| n.to_string())),
            optional(self.mem_mb.map(|n| n.to_string())),
        ]
    }
}

/// Spawns the pilot over the shared connection and pumps its merged
/// output through the control-protocol decoder until it exits. Directive
/// lines go to `sink` in arrival order; text lines are echoed for the
/// operator. No timeout: the pilot is expected to run for the lifetime of
/// the remote allocation. Returns the pilot's exit code.
pub fn invoke_pilot(
    connection: &SharedConnection,
    args: &PilotArgs,
    sink: &mut dyn DirectiveSink,
) -> Result<i32, AnnexError> {
    let mut pipe = OutputPipe::new().map_err(ExecError::Io)?;
    let argv = args.argv();
    let mut cmd = connection.remote_command(&argv);
    cmd.stdin(Stdio::null());
    cmd.stdout(pipe.writer().map_err(ExecError::Io)?);
    cmd.stderr(pipe.writer().map_err(ExecError::Io)?);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => return Err(spawn_error(&cmd, source).into()),
    };
    drop(cmd);
    pipe.close_writer();
    pipe.set_nonblocking().map_err(ExecError::Io)?;

    let mut decoder = LineDecoder::new();
    let mut chunk = Vec::new();

    // Poll liveness first, then drain: anything written before the child
    // exited is still read on the iteration that observes the exit.
    let status = loop {
        if let Some(signal) = signals::delivered() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AnnexError::Interrupted { signal });
        }

        let exit = child.try_wait().map_err(ExecError::Io)?;

        chunk.clear();
        pipe.read_available(&mut chunk).map_err(ExecError::Io)?;
        for line in decoder.push(&chunk) {
            handle_line(line, sink);
        }

        if let Some(status) = exit {
            break status;
        }
        std::thread::sleep(POLL_SLEEP);
    };

    if let Some(line) = decoder.finish() {
        handle_line(line, sink);
    }
    println!();

    Ok(status.code().unwrap_or(-1))
}

fn handle_line(line: PilotLine, sink: &mut dyn DirectiveSink) {
    match line {
        PilotLine::Directive { attribute, value } => sink.apply(&attribute, &value),
        PilotLine::Text(text) => println!("    {text}"),
    }
}
