//! Capability registry for the supported HPC sites. Pure configuration
//! data: consulted at validation time, never mutated by a run.

use crate::config::ConfigError;
use crate::error::AnnexError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    /// Whole-node queues: requests are sized in nodes.
    Node,
    /// Shared queues: requests are sized in cores and/or RAM.
    CoresOrRam,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSpec {
    pub max_nodes_per_job: u32,
    pub max_duration_secs: u64,
    pub allocation: AllocationType,
    pub cores_per_node: u32,
    #[serde(default)]
    pub ram_per_node_gb: Option<u32>,
    pub max_jobs_in_queue: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSpec {
    pub pretty_name: String,
    /// Host alias handed to the gateway command on the login node.
    pub ssh_host: String,
    pub default_queue: String,
    pub queues: BTreeMap<String, QueueSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub sites: BTreeMap<String, SiteSpec>,
}

impl Registry {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn site(&self, site_key: &str) -> Option<&SiteSpec> {
        self.sites.get(site_key)
    }

    /// Splits `queue@site` and validates both halves against the registry.
    /// Returns `(queue_name, site_key)` with the site key case-folded. No
    /// side effects; this runs before any remote action is attempted.
    pub fn resolve(&self, queue_at_site: &str) -> Result<(String, String), AnnexError> {
        let Some((queue_name, site)) = queue_at_site.split_once('@') else {
            let mut error_string = "Target must have the form queue@machine.".to_string();
            let site_key = queue_at_site.to_lowercase();
            match self.sites.get(&site_key) {
                None => {
                    error_string = format!(
                        "{error_string}  Also, '{queue_at_site}' is not a known machine."
                    );
                }
                Some(site) => {
                    let queue_list = site
                        .queues
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("\n    ");
                    error_string = format!(
                        "{error_string}  Supported queues are:\n    {queue_list}\nUse '{}' if you're not sure.",
                        site.default_queue
                    );
                }
            }
            return Err(AnnexError::Validation(error_string));
        };

        let site_key = site.to_lowercase();
        let Some(site) = self.sites.get(&site_key) else {
            return Err(AnnexError::Validation(format!(
                "{site_key} is not a known machine."
            )));
        };

        if !site.queues.contains_key(queue_name) {
            let queue_list = site
                .queues
                .keys()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n    ");
            return Err(AnnexError::Validation(format!(
                "'{queue_name}' is not a supported queue on {}.  Supported queues are:\n    {queue_list}\nUse '{}' if you're not sure.",
                site.pretty_name, site.default_queue
            )));
        }

        Ok((queue_name.to_string(), site_key))
    }

    /// The three production sites. Queue limits track each center's
    /// published numbers; for whole-node queues the cores/RAM figures are
    /// informative only.
    pub fn builtin() -> Self {
        let mut sites = BTreeMap::new();

        sites.insert(
            "stampede2".to_string(),
            SiteSpec {
                pretty_name: "Stampede 2".to_string(),
                ssh_host: "stampede2".to_string(),
                default_queue: "normal".to_string(),
                queues: BTreeMap::from([
                    (
                        "normal".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 256,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 68,
                            ram_per_node_gb: None,
                            max_jobs_in_queue: 50,
                        },
                    ),
                    (
                        "development".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 16,
                            max_duration_secs: 2 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 68,
                            ram_per_node_gb: None,
                            max_jobs_in_queue: 1,
                        },
                    ),
                    (
                        "skx-normal".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 128,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 48,
                            ram_per_node_gb: None,
                            max_jobs_in_queue: 20,
                        },
                    ),
                ]),
            },
        );

        sites.insert(
            "expanse".to_string(),
            SiteSpec {
                pretty_name: "Expanse".to_string(),
                ssh_host: "expanse".to_string(),
                default_queue: "compute".to_string(),
                queues: BTreeMap::from([
                    (
                        "compute".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 32,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 128,
                            ram_per_node_gb: Some(256),
                            max_jobs_in_queue: 64,
                        },
                    ),
                    (
                        "gpu".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 4,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 40,
                            ram_per_node_gb: Some(256),
                            max_jobs_in_queue: 8,
                        },
                    ),
                    (
                        "shared".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 1,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::CoresOrRam,
                            cores_per_node: 128,
                            ram_per_node_gb: Some(256),
                            max_jobs_in_queue: 4096,
                        },
                    ),
                    (
                        "gpu-shared".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 1,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::CoresOrRam,
                            cores_per_node: 40,
                            ram_per_node_gb: Some(384),
                            max_jobs_in_queue: 24,
                        },
                    ),
                ]),
            },
        );

        sites.insert(
            "bridges2".to_string(),
            SiteSpec {
                pretty_name: "Bridges-2".to_string(),
                ssh_host: "bridges2".to_string(),
                default_queue: "RM".to_string(),
                queues: BTreeMap::from([
                    (
                        "RM".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 50,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 128,
                            ram_per_node_gb: Some(253_000 / 1024),
                            max_jobs_in_queue: 50,
                        },
                    ),
                    (
                        "RM-512".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 2,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::Node,
                            cores_per_node: 128,
                            ram_per_node_gb: Some(515_000 / 1024),
                            max_jobs_in_queue: 50,
                        },
                    ),
                    (
                        // RM-shared lets you request up to half an RM node.
                        "RM-shared".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 1,
                            max_duration_secs: 48 * 60 * 60,
                            allocation: AllocationType::CoresOrRam,
                            cores_per_node: 64,
                            ram_per_node_gb: Some(253_000 / 2 / 1024),
                            max_jobs_in_queue: 50,
                        },
                    ),
                    (
                        // The EM queue documents a per-core memory ceiling.
                        "EM".to_string(),
                        QueueSpec {
                            max_nodes_per_job: 2,
                            max_duration_secs: 120 * 60 * 60,
                            allocation: AllocationType::CoresOrRam,
                            cores_per_node: 96,
                            ram_per_node_gb: Some(42_955 * 96 / 1024),
                            max_jobs_in_queue: 50,
                        },
                    ),
                ]),
            },
        );

        Registry { sites }
    }
}
