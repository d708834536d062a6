//! The orchestration run: validate the request, establish the shared
//! connection, stage the execution bundle into a fresh remote scratch
//! directory, launch the pilot, and stream its control protocol into the
//! tracking job record. Strictly sequential; every remote phase carries
//! its own timeout, and the cleanup guard runs on every exit path.

use crate::cleanup::CleanupGuard;
use crate::config::Settings;
use crate::error::AnnexError;
use crate::pilot::{invoke_pilot, PilotArgs};
use crate::queue::{JobAction, JobQueue, JobRecord, SubmitDescriptor};
use crate::registry::Registry;
use crate::secrets;
use crate::shared::append_annex_log;
use crate::ssh::SharedConnection;
use crate::state::StateSync;
use crate::transfer::{make_scratch_dir, stage_files, StageOptions, StagedFile, IMAGE_PREFIX};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ANSI_BRIGHT: &str = "\x1b[1m";
const ANSI_RESET_ALL: &str = "\x1b[0m";

/// Grace window added to the requested lifetime before the tracking job
/// removes itself.
const TRACKING_GRACE_SECS: u64 = 3600;

/// Immutable description of one capacity request.
#[derive(Debug, Clone)]
pub struct AnnexRequest {
    pub name: String,
    pub queue_at_site: String,
    /// Login node the shared connection authenticates against.
    pub ssh_target: String,
    pub nodes: Option<u32>,
    pub cpus: Option<u32>,
    pub mem_mb: Option<u64>,
    pub lifetime_secs: u64,
    /// Allocation/project account charged at the site.
    pub allocation: Option<String>,
    pub owners: String,
    pub collector: Option<String>,
    /// Pre-existing token file; when absent one is fetched on the fly
    /// and deleted at cleanup.
    pub token_file: Option<PathBuf>,
    pub password_file: PathBuf,
    pub control_dir: PathBuf,
}

pub fn annex_name_exists(queue: &dyn JobQueue, annex_name: &str) -> Result<bool, AnnexError> {
    let records = queue.query(&format!("hpc_annex_name == \"{annex_name}\""))?;
    Ok(!records.is_empty())
}

/// Entry point for `create`: refuses to run when a live request with this
/// name already exists. Fails before any remote action.
pub fn create(
    settings: &Settings,
    registry: &Registry,
    queue: &mut dyn JobQueue,
    state_root: &Path,
    request: &AnnexRequest,
) -> Result<BTreeMap<String, String>, AnnexError> {
    if annex_name_exists(queue, &request.name)? {
        return Err(AnnexError::Validation(format!(
            "You've already created an annex named '{}'.  To request more resources, use 'hpcannex add'.",
            request.name
        )));
    }
    run(settings, registry, queue, state_root, request)
}

/// Entry point for `add`: requires that the named request already exists.
pub fn add(
    settings: &Settings,
    registry: &Registry,
    queue: &mut dyn JobQueue,
    state_root: &Path,
    request: &AnnexRequest,
) -> Result<BTreeMap<String, String>, AnnexError> {
    if !annex_name_exists(queue, &request.name)? {
        return Err(AnnexError::Validation(format!(
            "You need to create an annex named '{}' first.  To do so, use 'hpcannex create'.",
            request.name
        )));
    }
    run(settings, registry, queue, state_root, request)
}

fn run(
    settings: &Settings,
    registry: &Registry,
    queue: &mut dyn JobQueue,
    state_root: &Path,
    request: &AnnexRequest,
) -> Result<BTreeMap<String, String>, AnnexError> {
    let (queue_name, site_key) = registry.resolve(&request.queue_at_site)?;
    let site = registry.site(&site_key).ok_or_else(|| {
        AnnexError::Validation(format!("{site_key} is not a known machine."))
    })?;
    let collector = request
        .collector
        .clone()
        .unwrap_or_else(|| settings.collector.clone());

    let script_dir = settings.script_dir.clone();
    if !script_dir.is_dir() {
        return Err(AnnexError::ScriptDirMissing {
            path: script_dir.display().to_string(),
        });
    }
    let tracking_executable = script_dir.join("annex-local-universe.py");
    if !tracking_executable.exists() {
        return Err(AnnexError::TrackingExecutableMissing {
            path: tracking_executable.display().to_string(),
        });
    }

    // Jobs must be submitted before the annex is created, for image
    // pre-staging; refuse to proceed when none exist.
    let annex_jobs = queue.query(&format!("TargetAnnexName == \"{}\"", request.name))?;
    if annex_jobs.is_empty() {
        return Err(AnnexError::NoMatchingJobs {
            annex_name: request.name.clone(),
        });
    }
    append_annex_log(
        state_root,
        "debug",
        "annex.jobs",
        &format!("found {} jobs targeting '{}'", annex_jobs.len(), request.name),
    );

    let sif_files = collect_sif_files(&annex_jobs)?;

    if !request.control_dir.exists() {
        std::fs::create_dir_all(&request.control_dir).map_err(|_| {
            AnnexError::ControlPathNotADirectory {
                path: request.control_dir.display().to_string(),
            }
        })?;
    } else if !request.control_dir.is_dir() {
        return Err(AnnexError::ControlPathNotADirectory {
            path: request.control_dir.display().to_string(),
        });
    }

    if let Some(path) = &request.token_file {
        if !path.exists() {
            return Err(AnnexError::TokenFileMissing {
                path: path.display().to_string(),
            });
        }
    }
    secrets::ensure_password_file(&request.password_file)?;

    let connection = SharedConnection::new(
        &request.ssh_target,
        &request.control_dir,
        vec![settings.gateway_program.clone(), site.ssh_host.clone()],
    )
    .with_ssh_program(&settings.ssh_program);

    // Interactive authentication happens exactly once, here. Everything
    // after reuses the multiplexed control socket.
    println!(
        "{ANSI_BRIGHT}This command will access {} via SSH.  To proceed, authenticate at the \
         prompt below; to cancel, hit CTRL-C.{ANSI_RESET_ALL}",
        site.pretty_name
    );
    append_annex_log(
        state_root,
        "debug",
        "annex.connect",
        &format!(
            "run '{}' to reuse the shared connection",
            connection.shared_command_hint()
        ),
    );
    connection.establish(&site.pretty_name, settings.initial_connection_timeout())?;
    println!("{ANSI_BRIGHT}Thank you.{ANSI_RESET_ALL}\n");

    // Register clean-up before creating the mess to clean up.
    let mut guard = CleanupGuard::new(&connection, state_root, settings.remote_cleanup_timeout());

    let token_file = match &request.token_file {
        Some(path) => path.clone(),
        None => {
            append_annex_log(state_root, "debug", "annex.token", "creating annex token");
            let fetched = secrets::fetch_annex_token(settings, &request.name)?;
            if !fetched.exists() {
                return Err(AnnexError::TokenFileMissing {
                    path: fetched.display().to_string(),
                });
            }
            guard.schedule_local_secret(fetched.clone());
            fetched
        }
    };

    append_annex_log(
        state_root,
        "debug",
        "annex.scratch",
        "making remote temporary directory",
    );
    let remote_script_dir = make_scratch_dir(&connection, settings.remote_mkdir_timeout())?;
    guard.set_scratch_dir(remote_script_dir.clone());
    append_annex_log(
        state_root,
        "debug",
        "annex.scratch",
        &format!("made remote temporary directory {remote_script_dir}"),
    );

    println!("Populating annex temporary directory...");
    let token_staged = StagedFile::from_path(&token_file).ok_or_else(|| {
        AnnexError::TokenFileMissing {
            path: token_file.display().to_string(),
        }
    })?;
    let password_staged =
        StagedFile::from_path(&request.password_file).ok_or_else(|| AnnexError::PasswordFile {
            path: request.password_file.display().to_string(),
            source: std::io::Error::other("password file has no parent directory"),
        })?;
    let bundle = vec![
        StagedFile {
            dir: script_dir.clone(),
            name: format!("{site_key}.sh"),
        },
        StagedFile {
            dir: script_dir.clone(),
            name: format!("{site_key}.pilot"),
        },
        StagedFile {
            dir: script_dir.clone(),
            name: format!("{site_key}.multi-pilot"),
        },
        token_staged.clone(),
        password_staged.clone(),
    ];
    stage_files(
        &connection,
        &remote_script_dir,
        &bundle,
        StageOptions::default(),
        "populate remote temporary directory",
        settings.remote_populate_timeout(),
    )?;

    if !sif_files.is_empty() {
        append_annex_log(
            state_root,
            "debug",
            "annex.images",
            &format!("transferring {} container images", sif_files.len()),
        );
        let staged: Vec<StagedFile> = sif_files
            .iter()
            .filter_map(|path| StagedFile::from_path(path))
            .collect();
        stage_files(
            &connection,
            &remote_script_dir,
            &staged,
            StageOptions {
                follow_symlinks: true,
                prefix: Some(IMAGE_PREFIX),
            },
            "transfer .sif files",
            settings.remote_populate_timeout(),
        )?;
    }
    println!("... populated.");

    append_annex_log(
        state_root,
        "debug",
        "annex.tracking",
        "submitting state-tracking job",
    );
    let descriptor = build_tracking_descriptor(
        request,
        &queue_name,
        &collector,
        &tracking_executable,
        &remote_script_dir,
    );
    let handle = queue
        .submit(&descriptor)
        .map_err(AnnexError::TrackingSubmit)?;
    let cluster_id = handle.cluster_id;

    let tracking = queue.query(&format!("ClusterId == {cluster_id} && ProcId == 0"))?;
    let request_id = tracking
        .first()
        .and_then(|record| record.get_string("GlobalJobId"))
        .ok_or_else(|| {
            AnnexError::TrackingSubmit(crate::queue::QueueError::NoSuchJob {
                job_id: format!("{cluster_id}.0"),
            })
        })?;

    rewrite_container_images(queue, &annex_jobs, state_root)?;

    println!(
        "Requesting annex named '{}' from queue '{queue_name}' on {}...\n",
        request.name, site.pretty_name
    );
    let pilot_args = PilotArgs {
        remote_script_dir: remote_script_dir.clone(),
        site_key: site_key.clone(),
        annex_name: request.name.clone(),
        queue_name: queue_name.clone(),
        collector,
        token_file_name: token_staged.name,
        lifetime_secs: request.lifetime_secs,
        owners: request.owners.clone(),
        nodes: request.nodes,
        allocation: request.allocation.clone(),
        request_id,
        password_file_name: password_staged.name,
        cpus: request.cpus,
        mem_mb: request.mem_mb,
    };

    let mut sync = StateSync::new(queue, cluster_id, state_root);
    let code = invoke_pilot(&connection, &pilot_args, &mut sync)?;
    let remotes = sync.into_remotes();

    if code != 0 {
        let error = AnnexError::PilotFailure { code };
        if let Err(err) = queue.act(
            JobAction::Remove,
            &format!("ClusterId == {cluster_id}"),
            &error.to_string(),
        ) {
            append_annex_log(
                state_root,
                "warn",
                "annex.tracking",
                &format!("could not remove tracking cluster {cluster_id}: {err}"),
            );
        }
        return Err(error);
    }

    println!("... requested.");
    println!(
        "\nIt may take some time for {} to establish the requested annex.",
        site.pretty_name
    );
    println!(
        "To check on the status of the annex, run 'hpcannex status {}'.",
        request.name
    );
    Ok(remotes)
}

/// Container images referenced by the pending jobs, deduplicated by
/// path. Distinct paths sharing a basename are rejected outright: the
/// images land side by side in one remote directory, and picking a
/// winner silently would run someone else's image.
pub fn collect_sif_files(annex_jobs: &[JobRecord]) -> Result<Vec<PathBuf>, AnnexError> {
    let mut files: Vec<PathBuf> = Vec::new();
    for record in annex_jobs {
        let Some(sif_file) = extract_sif_file(record)? else {
            continue;
        };
        if !sif_file.exists() {
            return Err(AnnexError::Validation(format!(
                "Job {} specified container image '{}', which doesn't exist.",
                record.job_id().unwrap_or_else(|| "?".to_string()),
                sif_file.display()
            )));
        }
        if !files.contains(&sif_file) {
            files.push(sif_file);
        }
    }

    for (i, file) in files.iter().enumerate() {
        let basename = file.file_name();
        if files[..i].iter().any(|other| other.file_name() == basename) {
            return Err(AnnexError::Validation(format!(
                "Distinct container images share the file name '{}'; rename one of them.",
                basename.map(|n| n.to_string_lossy()).unwrap_or_default()
            )));
        }
    }
    Ok(files)
}

/// The job's container image, when it is a `.sif` file. Relative paths
/// resolve against the job's working directory.
fn extract_sif_file(record: &JobRecord) -> Result<Option<PathBuf>, AnnexError> {
    let Some(container_image) = record.get_string("ContainerImage") else {
        return Ok(None);
    };
    let container_image = PathBuf::from(container_image);
    if container_image.extension().and_then(|e| e.to_str()) != Some("sif") {
        return Ok(None);
    }
    if container_image.is_absolute() {
        return Ok(Some(container_image));
    }
    let Some(iwd) = record.get_string("Iwd") else {
        return Err(AnnexError::Validation(format!(
            "Job {} has a relative container image but no working directory.",
            record.job_id().unwrap_or_else(|| "?".to_string())
        )));
    };
    Ok(Some(PathBuf::from(iwd).join(container_image)))
}

/// The local tracking job. It polls until a machine with a matching
/// request id appears (at which point `hpc_annex_start_time` is set and
/// its requirements go unsatisfiable), then self-removes an hour past the
/// end of the requested lifetime.
fn build_tracking_descriptor(
    request: &AnnexRequest,
    queue_name: &str,
    collector: &str,
    tracking_executable: &Path,
    remote_script_dir: &str,
) -> SubmitDescriptor {
    let mut descriptor = SubmitDescriptor::new();
    descriptor.set_string("Universe", "local");
    descriptor.set("Requirements", "hpc_annex_start_time =?= undefined");
    descriptor.set_string("Executable", &tracking_executable.display().to_string());
    descriptor.set_string("CronMinute", "*/5");
    descriptor.set("OnExitRemove", "PeriodicRemove =?= true");
    descriptor.set(
        "PeriodicRemove",
        &format!(
            "hpc_annex_start_time + {} + {TRACKING_GRACE_SECS} < time()",
            request.lifetime_secs
        ),
    );
    descriptor.set(
        "Arguments",
        &format!("strcat( \"$(CLUSTER).0 hpc_annex_request_id \", GlobalJobId, \" {collector}\")"),
    );
    descriptor.set_string("JobBatchName", &format!("{} [HPC Annex]", request.name));
    descriptor.set("hpc_annex_request_id", "GlobalJobId");

    descriptor.set_string("hpc_annex_name", &request.name);
    descriptor.set_string("hpc_annex_queue_name", queue_name);
    descriptor.set_string("hpc_annex_collector", collector);
    descriptor.set_string("hpc_annex_lifetime", &request.lifetime_secs.to_string());
    descriptor.set_string("hpc_annex_owners", &request.owners);
    let optional = |descriptor: &mut SubmitDescriptor, attribute: &str, value: Option<String>| {
        match value {
            Some(value) => descriptor.set_string(attribute, &value),
            None => descriptor.set(attribute, "undefined"),
        }
    };
    optional(
        &mut descriptor,
        "hpc_annex_nodes",
        request.nodes.map(|n| n.to_string()),
    );
    optional(
        &mut descriptor,
        "hpc_annex_cpus",
        request.cpus.map(|n| n.to_string()),
    );
    optional(
        &mut descriptor,
        "hpc_annex_mem_mb",
        request.mem_mb.map(|n| n.to_string()),
    );
    optional(&mut descriptor, "hpc_annex_allocation", request.allocation.clone());

    // Hard state required for clean up; the pilot adds hpc_annex_PID,
    // hpc_annex_PILOT_DIR and hpc_annex_JOB_ID as it reports them.
    descriptor.set_string("hpc_annex_remote_script_dir", remote_script_dir);
    descriptor
}

/// The images were pre-staged under `sif/` in the scratch directory, so
/// each job's `ContainerImage` is rewritten to its basename and the image
/// dropped from its transfer list.
fn rewrite_container_images(
    queue: &mut dyn JobQueue,
    annex_jobs: &[JobRecord],
    state_root: &Path,
) -> Result<(), AnnexError> {
    for record in annex_jobs {
        let Some(sif_file) = extract_sif_file(record)? else {
            continue;
        };
        let Some(job_id) = record.job_id() else {
            continue;
        };
        let basename = sif_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        append_annex_log(
            state_root,
            "debug",
            "annex.images",
            &format!("setting ContainerImage = {basename} in annex job {job_id}"),
        );
        queue.edit(&job_id, "ContainerImage", &format!("\"{basename}\""))?;

        let original_image = record.get_string("ContainerImage").unwrap_or_default();
        let transfer_input = record.get_string("TransferInput").unwrap_or_default();
        let mut input_files: Vec<&str> = transfer_input
            .split(',')
            .filter(|entry| !entry.is_empty())
            .collect();
        if input_files.contains(&original_image.as_str()) {
            input_files.retain(|entry| *entry != original_image.as_str());
            if input_files.is_empty() {
                queue.edit(&job_id, "TransferInput", "undefined")?;
            } else {
                queue.edit(
                    &job_id,
                    "TransferInput",
                    &format!("\"{}\"", input_files.join(",")),
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FileJobQueue;
    use std::fs;
    use tempfile::tempdir;

    fn submit_job(queue: &mut FileJobQueue, attrs: &[(&str, &str)]) {
        let mut descriptor = SubmitDescriptor::new();
        for (attribute, value) in attrs {
            descriptor.set_string(attribute, value);
        }
        queue.submit(&descriptor).expect("submit");
    }

    fn request(name: &str, tmp: &Path) -> AnnexRequest {
        AnnexRequest {
            name: name.to_string(),
            queue_at_site: "compute@expanse".to_string(),
            ssh_target: "alice@login.example.org".to_string(),
            nodes: Some(2),
            cpus: None,
            mem_mb: None,
            lifetime_secs: 3600,
            allocation: None,
            owners: "alice".to_string(),
            collector: None,
            token_file: Some(tmp.join("token")),
            password_file: tmp.join("password"),
            control_dir: tmp.join("control"),
        }
    }

    #[test]
    fn create_fails_when_name_already_exists_with_zero_remote_calls() {
        let tmp = tempdir().expect("tempdir");
        let mut queue = FileJobQueue::open(tmp.path()).expect("open");
        submit_job(&mut queue, &[("hpc_annex_name", "weekly")]);

        let settings = Settings::default();
        let registry = Registry::builtin();
        let err = create(
            &settings,
            &registry,
            &mut queue,
            tmp.path(),
            &request("weekly", tmp.path()),
        )
        .expect_err("duplicate");
        let message = err.to_string();
        assert!(message.contains("already created an annex named 'weekly'"));
        assert!(message.contains("use 'hpcannex add'"));
    }

    #[test]
    fn add_fails_when_name_does_not_exist() {
        let tmp = tempdir().expect("tempdir");
        let mut queue = FileJobQueue::open(tmp.path()).expect("open");

        let settings = Settings::default();
        let registry = Registry::builtin();
        let err = add(
            &settings,
            &registry,
            &mut queue,
            tmp.path(),
            &request("missing", tmp.path()),
        )
        .expect_err("missing annex");
        assert!(err.to_string().contains("use 'hpcannex create'"));
    }

    #[test]
    fn run_rejects_bad_target_before_any_remote_work() {
        let tmp = tempdir().expect("tempdir");
        let mut queue = FileJobQueue::open(tmp.path()).expect("open");
        let settings = Settings::default();
        let registry = Registry::builtin();

        let mut bad = request("weekly", tmp.path());
        bad.queue_at_site = "unknownsite".to_string();
        let err = create(&settings, &registry, &mut queue, tmp.path(), &bad)
            .expect_err("validation");
        assert!(err.to_string().contains("'unknownsite' is not a known machine"));
    }

    #[test]
    fn run_requires_pending_jobs_for_the_annex() {
        let tmp = tempdir().expect("tempdir");
        let mut queue = FileJobQueue::open(tmp.path()).expect("open");
        let mut settings = Settings::default();
        let script_dir = tmp.path().join("scripts");
        fs::create_dir_all(&script_dir).expect("script dir");
        fs::write(script_dir.join("annex-local-universe.py"), "#").expect("tracker");
        settings.script_dir = script_dir;
        let registry = Registry::builtin();

        let err = create(
            &settings,
            &registry,
            &mut queue,
            tmp.path(),
            &request("weekly", tmp.path()),
        )
        .expect_err("no jobs");
        assert!(matches!(err, AnnexError::NoMatchingJobs { .. }));
    }

    #[test]
    fn sif_collection_resolves_relative_paths_and_dedups() {
        let tmp = tempdir().expect("tempdir");
        let image = tmp.path().join("model.sif");
        fs::write(&image, "img").expect("image");

        let mut absolute = JobRecord::new();
        absolute.set_string("ClusterId", "1");
        absolute.set_string("ContainerImage", &image.display().to_string());

        let mut relative = JobRecord::new();
        relative.set_string("ClusterId", "2");
        relative.set_string("ContainerImage", "model.sif");
        relative.set_string("Iwd", &tmp.path().display().to_string());

        let mut non_sif = JobRecord::new();
        non_sif.set_string("ClusterId", "3");
        non_sif.set_string("ContainerImage", "docker://something");

        let files =
            collect_sif_files(&[absolute, relative, non_sif]).expect("collect");
        assert_eq!(files, vec![image]);
    }

    #[test]
    fn sif_basename_collision_is_rejected() {
        let tmp = tempdir().expect("tempdir");
        let dir_a = tmp.path().join("a");
        let dir_b = tmp.path().join("b");
        fs::create_dir_all(&dir_a).expect("dir a");
        fs::create_dir_all(&dir_b).expect("dir b");
        fs::write(dir_a.join("model.sif"), "one").expect("image a");
        fs::write(dir_b.join("model.sif"), "two").expect("image b");

        let mut first = JobRecord::new();
        first.set_string("ClusterId", "1");
        first.set_string("ContainerImage", &dir_a.join("model.sif").display().to_string());
        let mut second = JobRecord::new();
        second.set_string("ClusterId", "2");
        second.set_string("ContainerImage", &dir_b.join("model.sif").display().to_string());

        let err = collect_sif_files(&[first, second]).expect_err("collision");
        assert!(err.to_string().contains("share the file name 'model.sif'"));
    }

    #[test]
    fn missing_sif_file_is_fatal() {
        let mut record = JobRecord::new();
        record.set_string("ClusterId", "4");
        record.set_string("ContainerImage", "/nonexistent/image.sif");
        let err = collect_sif_files(&[record]).expect_err("missing file");
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[test]
    fn tracking_descriptor_encodes_lifetime_and_grace() {
        let tmp = tempdir().expect("tempdir");
        let descriptor = build_tracking_descriptor(
            &request("weekly", tmp.path()),
            "compute",
            "cm.example.org",
            Path::new("/usr/libexec/condor/annex/annex-local-universe.py"),
            "/remote/scratch/remote_script.XXXX",
        );

        assert_eq!(
            descriptor.attrs["Requirements"],
            "hpc_annex_start_time =?= undefined"
        );
        assert_eq!(
            descriptor.attrs["PeriodicRemove"],
            "hpc_annex_start_time + 3600 + 3600 < time()"
        );
        assert_eq!(descriptor.attrs["OnExitRemove"], "PeriodicRemove =?= true");
        assert_eq!(descriptor.attrs["hpc_annex_name"], "\"weekly\"");
        assert_eq!(descriptor.attrs["hpc_annex_nodes"], "\"2\"");
        assert_eq!(descriptor.attrs["hpc_annex_cpus"], "undefined");
        assert_eq!(
            descriptor.attrs["hpc_annex_remote_script_dir"],
            "\"/remote/scratch/remote_script.XXXX\""
        );
    }

    #[test]
    fn container_rewrite_updates_image_and_transfer_input() {
        let tmp = tempdir().expect("tempdir");
        let image = tmp.path().join("model.sif");
        fs::write(&image, "img").expect("image");

        let mut queue = FileJobQueue::open(tmp.path()).expect("open");
        let mut descriptor = SubmitDescriptor::new();
        descriptor.set_string("TargetAnnexName", "weekly");
        descriptor.set_string("ContainerImage", &image.display().to_string());
        descriptor.set_string(
            "TransferInput",
            &format!("{},data.tar", image.display()),
        );
        queue.submit(&descriptor).expect("submit");

        let annex_jobs = queue
            .query("TargetAnnexName == \"weekly\"")
            .expect("query");
        rewrite_container_images(&mut queue, &annex_jobs, tmp.path()).expect("rewrite");

        let records = queue
            .query("TargetAnnexName == \"weekly\"")
            .expect("query");
        assert_eq!(
            records[0].get_string("ContainerImage").as_deref(),
            Some("model.sif")
        );
        assert_eq!(
            records[0].get_string("TransferInput").as_deref(),
            Some("data.tar")
        );
    }
}
