//! End-to-end orchestration runs against a stub ssh client that answers
//! each remote phase locally: handshake, scratch-dir creation, tar
//! unpack, pilot launch, and cleanup.

use hpcannex::commands::run_cli;
use hpcannex::queue::{FileJobQueue, JobQueue, SubmitDescriptor};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::tempdir;

struct Harness {
    state_root: std::path::PathBuf,
    scratch: std::path::PathBuf,
    calls_log: std::path::PathBuf,
    token_file: std::path::PathBuf,
    image: std::path::PathBuf,
}

/// Lays out a state root, script dir, token, container image, and an ssh
/// stub that dispatches on its argv. `pilot_body` is the shell fragment
/// run when the stub sees the pilot invocation.
fn harness(root: &Path, pilot_body: &str) -> Harness {
    let state_root = root.join("state");
    fs::create_dir_all(&state_root).expect("state root");

    let scratch = root.join("remote_scratch");
    fs::create_dir_all(&scratch).expect("scratch");

    let scripts = root.join("scripts");
    fs::create_dir_all(&scripts).expect("scripts");
    for name in [
        "expanse.sh",
        "expanse.pilot",
        "expanse.multi-pilot",
        "annex-local-universe.py",
    ] {
        fs::write(scripts.join(name), "#!/bin/sh\n").expect("script");
    }

    let token_file = root.join("token");
    fs::write(&token_file, "token-bytes").expect("token");

    let image = root.join("model.sif");
    fs::write(&image, "image-bytes").expect("image");

    let calls_log = root.join("calls.log");
    let stub = root.join("stub-ssh");
    fs::write(
        &stub,
        format!(
            r#"#!/bin/sh
echo "$*" >> {log}
case "$*" in
  *mktemp*) printf '%s\n' {scratch} ;;
  *"rm -fr"*) exit 0 ;;
  *"tar -C"*) exec tar -C {scratch} -x -f- ;;
  *".sh "*) {pilot_body} ;;
  *) exit 0 ;;
esac
"#,
            log = calls_log.display(),
            scratch = scratch.display(),
        ),
    )
    .expect("stub");
    fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).expect("chmod");

    fs::write(
        state_root.join("config.yaml"),
        format!(
            "ssh_program: {}\ngateway_program: gw\nscript_dir: {}\ncollector: cm.test\n",
            stub.display(),
            scripts.display()
        ),
    )
    .expect("settings");

    Harness {
        state_root,
        scratch,
        calls_log,
        token_file,
        image,
    }
}

fn seed_annex_job(harness: &Harness, annex_name: &str) {
    let mut queue = FileJobQueue::open(&harness.state_root).expect("open queue");
    let mut descriptor = SubmitDescriptor::new();
    descriptor.set_string("TargetAnnexName", annex_name);
    descriptor.set_string("Owner", "alice");
    descriptor.set_string("ContainerImage", &harness.image.display().to_string());
    descriptor.set_string(
        "TransferInput",
        &format!("{},data.tar", harness.image.display()),
    );
    queue.submit(&descriptor).expect("seed job");
}

fn create_args(harness: &Harness, name: &str) -> Vec<String> {
    [
        "create",
        name,
        "--queue",
        "compute@expanse",
        "--nodes",
        "1",
        "--ssh-target",
        "alice@login.xsede.org",
        "--token-file",
        harness.token_file.to_str().expect("utf8"),
        "--state-root",
        harness.state_root.to_str().expect("utf8"),
    ]
    .iter()
    .map(|a| a.to_string())
    .collect()
}

#[test]
fn create_stages_launches_and_records_pilot_state() {
    let tmp = tempdir().expect("tempdir");
    let harness = harness(
        tmp.path(),
        r"printf '=-.-= PID 12345\n'; printf '=-.-= JOB_ID 4711.0\n'; printf 'pilot launched\n'; exit 0",
    );
    seed_annex_job(&harness, "weekly");

    let output = run_cli(create_args(&harness, "weekly")).expect("create");
    assert!(output.contains("Annex 'weekly' requested."));
    assert!(output.contains("PID = 12345"));
    assert!(output.contains("JOB_ID = 4711.0"));

    // The execution bundle and prefixed image landed in the scratch dir.
    assert!(harness.scratch.join("expanse.sh").exists());
    assert!(harness.scratch.join("expanse.pilot").exists());
    assert!(harness.scratch.join("expanse.multi-pilot").exists());
    assert!(harness.scratch.join("token").exists());
    assert!(harness.scratch.join("password").exists());
    assert_eq!(
        fs::read(harness.scratch.join("sif/model.sif")).expect("image"),
        b"image-bytes"
    );

    // A fresh 16-byte pool password with owner-read-only permissions.
    let password = harness.state_root.join("password");
    assert_eq!(fs::read(&password).expect("password").len(), 16);
    assert_eq!(
        fs::metadata(&password).expect("metadata").permissions().mode() & 0o777,
        0o400
    );

    let queue = FileJobQueue::open(&harness.state_root).expect("open queue");
    let tracking = queue
        .query("hpc_annex_name == \"weekly\"")
        .expect("query tracking");
    assert_eq!(tracking.len(), 1);
    assert_eq!(
        tracking[0].get_string("hpc_annex_PID").as_deref(),
        Some("12345")
    );
    assert_eq!(
        tracking[0].get_string("hpc_annex_JOB_ID").as_deref(),
        Some("4711.0")
    );
    assert_eq!(
        tracking[0]
            .get_string("hpc_annex_remote_script_dir")
            .as_deref(),
        Some(harness.scratch.to_str().expect("utf8"))
    );

    // The pending job now references the pre-staged image by basename.
    let annex_jobs = queue
        .query("TargetAnnexName == \"weekly\"")
        .expect("query jobs");
    assert_eq!(
        annex_jobs[0].get_string("ContainerImage").as_deref(),
        Some("model.sif")
    );
    assert_eq!(
        annex_jobs[0].get_string("TransferInput").as_deref(),
        Some("data.tar")
    );

    // Handshake first, cleanup last.
    let calls = fs::read_to_string(&harness.calls_log).expect("calls log");
    assert!(calls.lines().next().expect("first call").contains("exit 0"));
    assert!(calls.lines().last().expect("last call").contains("rm -fr"));
}

#[test]
fn pilot_failure_removes_the_tracking_job_and_still_cleans_up() {
    let tmp = tempdir().expect("tempdir");
    let harness = harness(tmp.path(), r"printf 'allocation refused\n'; exit 5");
    seed_annex_job(&harness, "weekly");

    let failure = run_cli(create_args(&harness, "weekly")).expect_err("pilot failure");
    assert_eq!(failure.code, 1);
    assert!(failure.message.contains("5"));

    let queue = FileJobQueue::open(&harness.state_root).expect("open queue");
    assert!(queue
        .query("hpc_annex_name == \"weekly\"")
        .expect("query")
        .is_empty());

    let calls = fs::read_to_string(&harness.calls_log).expect("calls log");
    assert!(calls.contains("rm -fr"));
}

#[test]
fn add_reuses_an_existing_annex_name() {
    let tmp = tempdir().expect("tempdir");
    let harness = harness(
        tmp.path(),
        r"printf '=-.-= PID 777\n'; exit 0",
    );
    seed_annex_job(&harness, "weekly");

    // A live tracking job from an earlier create.
    {
        let mut queue = FileJobQueue::open(&harness.state_root).expect("open queue");
        let mut descriptor = SubmitDescriptor::new();
        descriptor.set_string("hpc_annex_name", "weekly");
        queue.submit(&descriptor).expect("tracking job");
    }

    let mut args = create_args(&harness, "weekly");
    args[0] = "add".to_string();
    let output = run_cli(args).expect("add");
    assert!(output.contains("PID = 777"));

    let failure = run_cli(create_args(&harness, "weekly")).expect_err("duplicate create");
    assert!(failure.message.contains("already created an annex named 'weekly'"));
}
