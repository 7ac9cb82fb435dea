//! Cluster-wide configuration, read once from the environment at process
//! startup. Grounded on `vault.rs`'s `default_addr`/`default_token`: pull
//! from `env::var`, fail with a descriptive `ValidationError` if a mandatory
//! variable is absent, fall back to a sane default otherwise.
use std::env;

use error::OrchestraErrorKind as EK;
use Result;

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EK::ValidationError(format!("{} not specified", name)).into())
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_num<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Defaults applied to the orchestrator's own job and to deployments that
/// don't otherwise override them.
#[derive(Clone, Debug)]
pub struct ResourceDefaults {
    pub account: String,
    pub partition: String,
    pub qos: String,
    pub nodes: u32,
    pub cpus: u32,
    pub time_limit_minutes: u32,
}

/// Remote paths bound into containers.
#[derive(Clone, Debug)]
pub struct ContainerPaths {
    pub apptainer_tmpdir_base: String,
    pub apptainer_cachedir_base: String,
    pub remote_fake_home_base: String,
    pub remote_hf_cache_dirname: String,
}

/// Tunnel endpoints for the workload manager's REST API.
#[derive(Clone, Debug)]
pub struct TunnelEndpoints {
    pub slurm_rest_host: String,
    pub slurm_rest_port: u16,
    pub slurm_rest_local_port: u16,
}

/// SSH target and credential.
#[derive(Clone, Debug)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub key_path: String,
}

/// Cluster-wide configuration, as read from the environment (spec section 6).
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub orchestrator_port: u16,
    pub resources: ResourceDefaults,
    pub container_paths: ContainerPaths,
    pub tunnel: TunnelEndpoints,
    pub ssh: SshTarget,
    pub slurm_jwt: String,
    pub remote_base_path: String,
    pub local_base_path: String,
}

impl ClusterConfig {
    /// Load from the environment. Mandatory: `SSH_HOST`, `SSH_USER`,
    /// `SLURM_JWT`, `REMOTE_BASE_PATH`, `LOCAL_BASE_PATH`. Everything else
    /// has a default matching a small single-cluster deployment.
    pub fn from_env() -> Result<ClusterConfig> {
        Ok(ClusterConfig {
            orchestrator_port: optional_num("ORCHESTRATOR_PORT", 8080),
            resources: ResourceDefaults {
                account: optional("ORCHESTRATOR_ACCOUNT", "default"),
                partition: optional("ORCHESTRATOR_PARTITION", "gpu"),
                qos: optional("ORCHESTRATOR_QOS", "normal"),
                nodes: optional_num("ORCHESTRATOR_NODES", 1),
                cpus: optional_num("ORCHESTRATOR_CPUS", 4),
                time_limit_minutes: optional_num("ORCHESTRATOR_TIME_LIMIT", 60),
            },
            container_paths: ContainerPaths {
                apptainer_tmpdir_base: optional("APPTAINER_TMPDIR_BASE", "/tmp/apptainer"),
                apptainer_cachedir_base: optional("APPTAINER_CACHEDIR_BASE", "/tmp/apptainer-cache"),
                remote_fake_home_base: optional("REMOTE_FAKE_HOME_BASE", "/tmp/fake-home"),
                remote_hf_cache_dirname: optional("REMOTE_HF_CACHE_DIRNAME", ".cache/huggingface"),
            },
            tunnel: TunnelEndpoints {
                slurm_rest_host: optional("SLURM_REST_HOST", "localhost"),
                slurm_rest_port: optional_num("SLURM_REST_PORT", 6820),
                slurm_rest_local_port: optional_num("SLURM_REST_LOCAL_PORT", 16820),
            },
            ssh: SshTarget {
                user: required("SSH_USER")?,
                host: required("SSH_HOST")?,
                port: optional_num("SSH_PORT", 22),
                key_path: required("SSH_KEY_PATH")?,
            },
            slurm_jwt: required("SLURM_JWT")?,
            remote_base_path: required("REMOTE_BASE_PATH")?,
            local_base_path: required("LOCAL_BASE_PATH")?,
        })
    }
}
