//! JSON-file-per-cluster job store. One record per file under
//! `<state_root>/queue/jobs`, written atomically so a concurrent reader
//! never sees a torn record.

use super::{constraint, JobAction, JobQueue, JobRecord, QueueError, SubmitDescriptor, SubmitHandle};
use crate::shared::now_secs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// JobStatus value for a removed record.
const STATUS_REMOVED: &str = "3";
/// JobStatus value for a freshly submitted (idle) record.
const STATUS_IDLE: &str = "1";

#[derive(Debug)]
pub struct FileJobQueue {
    jobs_dir: PathBuf,
    schedd_name: String,
}

impl FileJobQueue {
    pub fn open(state_root: &Path) -> Result<Self, QueueError> {
        let jobs_dir = state_root.join("queue/jobs");
        fs::create_dir_all(&jobs_dir).map_err(|source| QueueError::Io {
            path: jobs_dir.display().to_string(),
            source,
        })?;
        let schedd_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Ok(Self {
            jobs_dir,
            schedd_name,
        })
    }

    fn record_path(&self, cluster_id: i64) -> PathBuf {
        self.jobs_dir.join(format!("cluster_{cluster_id}.json"))
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, JobRecord)>, QueueError> {
        let entries = fs::read_dir(&self.jobs_dir).map_err(|source| QueueError::Io {
            path: self.jobs_dir.display().to_string(),
            source,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| QueueError::Io {
                path: self.jobs_dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|source| QueueError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let record: JobRecord =
                serde_json::from_str(&raw).map_err(|source| QueueError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            records.push((path, record));
        }
        records.sort_by_key(|(_, record)| record.get_int("ClusterId").unwrap_or(0));
        Ok(records)
    }

    fn next_cluster_id(&self) -> Result<i64, QueueError> {
        let max = self
            .load_all()?
            .iter()
            .filter_map(|(_, record)| record.get_int("ClusterId"))
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        let cluster_id = record.get_int("ClusterId").unwrap_or(0);
        let path = self.record_path(cluster_id);
        let payload = serde_json::to_vec_pretty(record).map_err(|source| QueueError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        self.write_record(&path, &payload)
            .map_err(|source| QueueError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    /// Records go tmp-then-rename so a concurrent reader never sees a
    /// torn file. The tmp name carries the pid, so two schedds on one
    /// jobs dir cannot trample each other's in-flight write, and its
    /// extension is not `json`, so `load_all` never picks it up.
    fn write_record(&self, path: &Path, payload: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension(format!("json.tmp{}", std::process::id()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(payload)?;
        file.sync_all()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::File::open(&self.jobs_dir)?.sync_all()
    }

    fn cluster_from_job_id(job_id: &str) -> Result<i64, QueueError> {
        let cluster = job_id.split_once('.').map(|(c, _)| c).unwrap_or(job_id);
        cluster.parse().map_err(|_| QueueError::MalformedJobId {
            job_id: job_id.to_string(),
        })
    }

    fn is_removed(record: &JobRecord) -> bool {
        record.get("JobStatus").map(str::trim) == Some(STATUS_REMOVED)
    }
}

impl JobQueue for FileJobQueue {
    /// Removed records are invisible to queries; an annex whose tracking
    /// job was removed no longer counts as live.
    fn query(&self, constraint_expr: &str) -> Result<Vec<JobRecord>, QueueError> {
        Ok(self
            .load_all()?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| !Self::is_removed(record))
            .filter(|record| constraint::matches(record, constraint_expr))
            .collect())
    }

    fn submit(&mut self, descriptor: &SubmitDescriptor) -> Result<SubmitHandle, QueueError> {
        let cluster_id = self.next_cluster_id()?;
        let mut record = JobRecord {
            attrs: descriptor.attrs.clone(),
        };
        record.set("ClusterId", &cluster_id.to_string());
        record.set("ProcId", "0");
        record.set("JobStatus", STATUS_IDLE);
        record.set("QDate", &now_secs().to_string());
        record.set_string(
            "GlobalJobId",
            &format!("{}#{cluster_id}.0#{}", self.schedd_name, now_secs()),
        );
        self.save(&record)?;
        Ok(SubmitHandle { cluster_id })
    }

    fn edit(&mut self, job_id: &str, attribute: &str, value: &str) -> Result<(), QueueError> {
        let cluster_id = Self::cluster_from_job_id(job_id)?;
        let path = self.record_path(cluster_id);
        if !path.exists() {
            return Err(QueueError::NoSuchJob {
                job_id: job_id.to_string(),
            });
        }
        let raw = fs::read_to_string(&path).map_err(|source| QueueError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut record: JobRecord =
            serde_json::from_str(&raw).map_err(|source| QueueError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        record.set(attribute, value);
        self.save(&record)
    }

    fn act(
        &mut self,
        action: JobAction,
        constraint_expr: &str,
        reason: &str,
    ) -> Result<(), QueueError> {
        match action {
            JobAction::Remove => {
                for (_, mut record) in self.load_all()? {
                    if Self::is_removed(&record)
                        || !constraint::matches(&record, constraint_expr)
                    {
                        continue;
                    }
                    record.set("JobStatus", STATUS_REMOVED);
                    record.set_string("RemoveReason", reason);
                    self.save(&record)?;
                }
                Ok(())
            }
        }
    }
}
