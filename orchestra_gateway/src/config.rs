//! Gateway configuration, read once from the environment at startup.
//! Grounded on `orchestra_definitions::config`'s `required`/`optional`
//! helpers, generalized to the gateway's own variable set.
use std::env;

use orchestra_definitions::config::SshTarget;
use orchestra_definitions::{OrchestraErrorKind as EK, Result};

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EK::ValidationError(format!("{} not specified", name)).into())
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_num<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Where the orchestrator's internal facade listens, from the far side of
/// the tunnel (spec section 4.10).
#[derive(Clone, Debug)]
pub struct OrchestratorTarget {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub gateway_port: u16,
    pub ssh: SshTarget,
    pub orchestrator: OrchestratorTarget,
}

impl GatewayConfig {
    /// Mandatory: `SSH_HOST`, `SSH_USER`, `SSH_KEY_PATH`. Everything else
    /// has a default matching a single-orchestrator deployment.
    pub fn from_env() -> Result<GatewayConfig> {
        Ok(GatewayConfig {
            gateway_port: optional_num("GATEWAY_PORT", 8000),
            ssh: SshTarget {
                user: required("SSH_USER")?,
                host: required("SSH_HOST")?,
                port: optional_num("SSH_PORT", 22),
                key_path: required("SSH_KEY_PATH")?,
            },
            orchestrator: OrchestratorTarget {
                local_port: optional_num("ORCHESTRATOR_LOCAL_PORT", 18080),
                remote_host: optional("ORCHESTRATOR_REMOTE_HOST", "127.0.0.1"),
                remote_port: optional_num("ORCHESTRATOR_REMOTE_PORT", 8080),
            },
        })
    }
}
