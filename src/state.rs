//! Applies decoded control directives to the tracking job record and
//! keeps an in-process mirror of everything the pilot reported.

use crate::queue::JobQueue;
use crate::shared::append_annex_log;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Namespace for annex attributes on the tracking record, so pilot
/// updates cannot collide with unrelated job attributes.
pub const ANNEX_ATTRIBUTE_PREFIX: &str = "hpc_annex_";

/// Receives control directives in the order the pilot emitted them.
/// Ordering matters: later directives may depend on earlier ones being
/// visible already.
pub trait DirectiveSink {
    fn apply(&mut self, attribute: &str, value: &str);
}

pub struct StateSync<'a> {
    queue: &'a mut dyn JobQueue,
    tracking_job_id: String,
    state_root: PathBuf,
    remotes: BTreeMap<String, String>,
}

impl<'a> StateSync<'a> {
    pub fn new(queue: &'a mut dyn JobQueue, cluster_id: i64, state_root: &Path) -> Self {
        Self {
            queue,
            tracking_job_id: format!("{cluster_id}.0"),
            state_root: state_root.to_path_buf(),
            remotes: BTreeMap::new(),
        }
    }

    /// The mirror of everything applied during the run.
    pub fn into_remotes(self) -> BTreeMap<String, String> {
        self.remotes
    }
}

impl DirectiveSink for StateSync<'_> {
    /// Each write is independent and best-effort: the pilot is still
    /// running remotely, and later directives may correct earlier state,
    /// so one failed edit must not abort the stream.
    fn apply(&mut self, attribute: &str, value: &str) {
        let scoped = format!("{ANNEX_ATTRIBUTE_PREFIX}{attribute}");
        if let Err(err) = self.queue.edit(
            &self.tracking_job_id,
            &scoped,
            &format!("\"{value}\""),
        ) {
            append_annex_log(
                &self.state_root,
                "warn",
                "state.edit",
                &format!("failed to set {scoped} on job {}: {err}", self.tracking_job_id),
            );
        }
        self.remotes.insert(attribute.to_string(), value.to_string());
    }
}
