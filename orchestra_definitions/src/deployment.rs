use std::collections::BTreeMap;

use structs::{Distributed, ReplicaConfig, Resources};
use Recipe;

/// Result of merging a `Recipe` with a caller's `Overrides`. Same shape as
/// `Recipe` (spec section 3): every field a caller can override one exists
/// on `Recipe` too, so `DeploymentSpec` is just the merged `Recipe`.
pub type DeploymentSpec = Recipe;

/// User-supplied overrides, submitted as the (optional) `config` field of a
/// `POST /services` request body. Every field is optional; `merge_spec`
/// (see the `merge` module) applies recipe defaults for anything left unset,
/// merging nested maps (`environment`) key-by-key rather than replacing them
/// wholesale.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<PartialResources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed: Option<Distributed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<ReplicaConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_per_replica: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_port: Option<u16>,
}

/// Partial resource overrides; any field left `None` inherits the recipe's
/// value (spec section 3: "missing user fields inherit").
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PartialResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
}

impl PartialResources {
    pub fn apply_to(&self, base: &Resources) -> Resources {
        Resources {
            nodes: self.nodes.unwrap_or(base.nodes),
            cpu: self.cpu.unwrap_or(base.cpu),
            memory: self.memory.clone().unwrap_or_else(|| base.memory.clone()),
            gpu: self.gpu.unwrap_or(base.gpu),
            time_limit_minutes: self.time_limit_minutes.unwrap_or(base.time_limit_minutes),
        }
    }
}
