//! Hand-rolled CLI: verb dispatch plus flag parsing, wiring the
//! file-backed queue, settings, and registry into the orchestration run.

use crate::annex::{self, AnnexRequest};
use crate::config::{default_state_root, Settings};
use crate::error::AnnexError;
use crate::queue::FileJobQueue;
use crate::registry::Registry;
use crate::secrets;
use std::collections::BTreeMap;
use std::path::PathBuf;

const DEFAULT_LIFETIME_SECS: u64 = 3600;

/// A CLI error message plus the process exit code it warrants.
#[derive(Debug)]
pub struct CliFailure {
    pub message: String,
    pub code: i32,
}

impl From<String> for CliFailure {
    fn from(message: String) -> Self {
        Self { message, code: 1 }
    }
}

impl From<AnnexError> for CliFailure {
    fn from(err: AnnexError) -> Self {
        Self {
            code: err.exit_code(),
            message: err.to_string(),
        }
    }
}

pub fn help_text() -> String {
    [
        "usage: hpcannex <create|add> <annex-name> --queue <queue@machine> [options]",
        "",
        "  --queue <queue@machine>   scheduler queue and site to request capacity from",
        "  --nodes <count>           whole nodes to request",
        "  --cpus <count>            cores to request (with --mem-mb)",
        "  --mem-mb <mb>             memory to request (with --cpus)",
        "  --lifetime <seconds>      how long the capacity should last (default 3600)",
        "  --owners <list>           comma-separated users allowed to run jobs",
        "  --ssh-target <user@host>  login node to authenticate against",
        "  --allocation <account>    allocation/project to charge at the site",
        "  --collector <host>        central-manager collector override",
        "  --token-file <path>       pre-existing token file to stage",
        "  --password-file <path>    pool password file (created when absent)",
        "  --control-dir <path>      directory for SSH control sockets",
        "  --state-root <path>       local state directory override",
    ]
    .join("\n")
}

pub fn run_cli(args: Vec<String>) -> Result<String, CliFailure> {
    if args.is_empty() {
        return Ok(help_text());
    }
    match args[0].as_str() {
        "create" => cmd_request(&args[1..], Verb::Create),
        "add" => cmd_request(&args[1..], Verb::Add),
        "help" | "--help" | "-h" => Ok(help_text()),
        other => Err(format!("unknown command `{other}`").into()),
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Create,
    Add,
}

#[derive(Debug)]
struct ParsedRequest {
    state_root: Option<PathBuf>,
    request: AnnexRequest,
}

fn cmd_request(args: &[String], verb: Verb) -> Result<String, CliFailure> {
    let parsed = parse_request(args)?;
    let state_root = match parsed.state_root {
        Some(root) => root,
        None => default_state_root().map_err(|e| e.to_string())?,
    };
    std::fs::create_dir_all(&state_root)
        .map_err(|e| format!("failed to create {}: {e}", state_root.display()))?;

    let settings = Settings::load(&state_root).map_err(|e| e.to_string())?;
    let registry = match &settings.registry_file {
        Some(path) => Registry::from_yaml_file(path).map_err(|e| e.to_string())?,
        None => Registry::builtin(),
    };
    let mut queue = FileJobQueue::open(&state_root).map_err(|e| e.to_string())?;

    let mut request = parsed.request;
    if request.password_file.as_os_str().is_empty() {
        request.password_file = state_root.join("password");
    }
    if request.control_dir.as_os_str().is_empty() {
        request.control_dir = state_root.join("control");
    }

    let remotes = match verb {
        Verb::Create => annex::create(&settings, &registry, &mut queue, &state_root, &request)?,
        Verb::Add => annex::add(&settings, &registry, &mut queue, &state_root, &request)?,
    };
    Ok(render_remotes(&request.name, &remotes))
}

fn render_remotes(annex_name: &str, remotes: &BTreeMap<String, String>) -> String {
    let mut lines = vec![format!("Annex '{annex_name}' requested.")];
    for (attribute, value) in remotes {
        lines.push(format!("  {attribute} = {value}"));
    }
    lines.join("\n")
}

fn parse_request(args: &[String]) -> Result<ParsedRequest, String> {
    if args.is_empty() {
        return Err("missing annex name; see `hpcannex help`".to_string());
    }
    let name = args[0].clone();
    if name.starts_with('-') {
        return Err(format!("expected an annex name, got `{name}`"));
    }

    let mut queue_at_site = None;
    let mut nodes = None;
    let mut cpus = None;
    let mut mem_mb = None;
    let mut lifetime_secs = DEFAULT_LIFETIME_SECS;
    let mut owners = None;
    let mut ssh_target = None;
    let mut allocation = None;
    let mut collector = None;
    let mut token_file = None;
    let mut password_file = None;
    let mut control_dir = None;
    let mut state_root = None;

    let mut i = 1usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("missing value for {flag}"))?;
        match flag {
            "--queue" => queue_at_site = Some(value.clone()),
            "--nodes" => nodes = Some(parse_count(flag, value)?),
            "--cpus" => cpus = Some(parse_count(flag, value)?),
            "--mem-mb" => {
                mem_mb = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid value `{value}` for {flag}"))?,
                )
            }
            "--lifetime" => {
                lifetime_secs = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid value `{value}` for {flag}"))?
            }
            "--owners" => owners = Some(value.clone()),
            "--ssh-target" => ssh_target = Some(value.clone()),
            "--allocation" => allocation = Some(value.clone()),
            "--collector" => collector = Some(value.clone()),
            "--token-file" => token_file = Some(PathBuf::from(value)),
            "--password-file" => password_file = Some(PathBuf::from(value)),
            "--control-dir" => control_dir = Some(PathBuf::from(value)),
            "--state-root" => state_root = Some(PathBuf::from(value)),
            other => return Err(format!("unknown option `{other}`")),
        }
        i += 2;
    }

    let queue_at_site =
        queue_at_site.ok_or_else(|| "missing required option --queue".to_string())?;
    let ssh_target =
        ssh_target.ok_or_else(|| "missing required option --ssh-target".to_string())?;

    // Sizing is whole nodes or a cores/memory pair, never both.
    match (nodes, cpus, mem_mb) {
        (None, None, None) => {
            return Err("specify --nodes, or both --cpus and --mem-mb".to_string())
        }
        (None, Some(_), None) | (None, None, Some(_)) => {
            return Err("--cpus and --mem-mb must be given together".to_string())
        }
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            return Err("--nodes conflicts with --cpus/--mem-mb".to_string())
        }
        _ => {}
    }

    let owners = owners.unwrap_or_else(secrets::username);

    Ok(ParsedRequest {
        state_root,
        request: AnnexRequest {
            name,
            queue_at_site,
            ssh_target,
            nodes,
            cpus,
            mem_mb,
            lifetime_secs,
            allocation,
            owners,
            collector,
            token_file,
            password_file: password_file.unwrap_or_default(),
            control_dir: control_dir.unwrap_or_default(),
        },
    })
}

fn parse_count(flag: &str, raw: &str) -> Result<u32, String> {
    let count: u32 = raw
        .parse()
        .map_err(|_| format!("invalid value `{raw}` for {flag}"))?;
    if count == 0 {
        return Err(format!("{flag} must be at least 1"));
    }
    Ok(count)
}
