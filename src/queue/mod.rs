//! Boundary to the local job-queue collaborator. The orchestrator only
//! ever queries, submits, edits, and acts on job records through the
//! [`JobQueue`] trait; [`FileJobQueue`] is the file-backed store the CLI
//! wires in.

pub mod constraint;
pub mod file_queue;

pub use file_queue::FileJobQueue;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid queue record in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no job matching `{job_id}` in the queue")]
    NoSuchJob { job_id: String },
    #[error("malformed job id `{job_id}`")]
    MalformedJobId { job_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Remove,
}

/// One job record: an ordered map of attribute names to ClassAd-style
/// expression text. String values carry their surrounding quotes; the
/// typed accessors strip them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRecord {
    pub attrs: BTreeMap<String, String>,
}

impl JobRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute lookup is case-insensitive, matching scheduler semantics.
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_string(&self, attribute: &str) -> Option<String> {
        self.get(attribute).map(unquote)
    }

    pub fn get_int(&self, attribute: &str) -> Option<i64> {
        self.get(attribute)?.trim().parse().ok()
    }

    pub fn set(&mut self, attribute: &str, expression: &str) {
        let existing = self
            .attrs
            .keys()
            .find(|name| name.eq_ignore_ascii_case(attribute))
            .cloned();
        let key = existing.unwrap_or_else(|| attribute.to_string());
        self.attrs.insert(key, expression.to_string());
    }

    pub fn set_string(&mut self, attribute: &str, value: &str) {
        self.set(attribute, &format!("\"{value}\""));
    }

    pub fn job_id(&self) -> Option<String> {
        let cluster = self.get_int("ClusterId")?;
        let proc = self.get_int("ProcId").unwrap_or(0);
        Some(format!("{cluster}.{proc}"))
    }
}

/// Strips one layer of surrounding double quotes, if present.
pub(crate) fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Descriptor for a job submission, in the same attribute/expression
/// convention as [`JobRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitDescriptor {
    pub attrs: BTreeMap<String, String>,
}

impl SubmitDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, attribute: &str, expression: &str) {
        self.attrs.insert(attribute.to_string(), expression.to_string());
    }

    pub fn set_string(&mut self, attribute: &str, value: &str) {
        self.set(attribute, &format!("\"{value}\""));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitHandle {
    pub cluster_id: i64,
}

pub trait JobQueue {
    fn query(&self, constraint: &str) -> Result<Vec<JobRecord>, QueueError>;
    fn submit(&mut self, descriptor: &SubmitDescriptor) -> Result<SubmitHandle, QueueError>;
    fn edit(&mut self, job_id: &str, attribute: &str, value: &str) -> Result<(), QueueError>;
    fn act(&mut self, action: JobAction, constraint: &str, reason: &str)
        -> Result<(), QueueError>;
}
