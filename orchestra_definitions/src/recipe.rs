use std::collections::BTreeMap;

use error::OrchestraErrorKind as EK;
use structs::{Distributed, ReplicaConfig, Resources};
use Result;

/// The category a recipe belongs to; selects the default script-builder
/// strategy (builder registry, spec section 4.3) when no recipe-specific
/// builder is registered.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RecipeCategory {
    Inference,
    VectorDb,
    Storage,
    Simple,
}

impl ::std::fmt::Display for RecipeCategory {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        let s = match *self {
            RecipeCategory::Inference => "inference",
            RecipeCategory::VectorDb => "vector-db",
            RecipeCategory::Storage => "storage",
            RecipeCategory::Simple => "simple",
        };
        write!(f, "{}", s)
    }
}

/// Declarative template for a deployable service, loaded from
/// `<category>/<name>.yml` under the recipe catalog root.
///
/// Immutable after load; lives for the orchestrator's process lifetime.
///
/// ```yaml
/// name: vllm-single-node
/// category: inference
/// image: docker://vllm/vllm-openai:latest
/// container_def: containers/vllm.def
/// ports: [8000]
/// environment:
///   MODEL: meta-llama/Llama-3-8B
/// resources:
///   nodes: 1
///   cpu: 16
///   memory: 64G
///   gpu: 1
///   time_limit_minutes: 180
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    /// Recipe name. Combined with `category` this is the recipe identifier
    /// (`category/name`) used by `load()` and in service names.
    pub name: String,

    pub category: RecipeCategory,

    /// Container artifact reference (an apptainer/docker image URI).
    pub image: String,

    /// Path (relative to the recipe catalog root) to a container build spec,
    /// used when the image must be built rather than pulled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_def: Option<String>,

    /// Listening ports, in order; `ports[0]` is the primary port used by the
    /// endpoint resolver.
    #[serde(default)]
    pub ports: Vec<u16>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    pub resources: Resources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distributed: Option<Distributed>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<ReplicaConfig>,
}

impl Recipe {
    /// The recipe identifier, `category/name`.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// The primary port, or `RecipeNotFound`-flavoured `ValidationError` if
    /// the recipe declares none. A recipe with no ports can never produce a
    /// service with a non-null endpoint (spec invariant, section 8).
    pub fn primary_port(&self) -> Result<u16> {
        self.ports.first().cloned().ok_or_else(|| {
            EK::ValidationError(format!("recipe {} declares no ports", self.identifier())).into()
        })
    }

    /// Verify structural assumptions about a loaded recipe.
    pub fn verify(&self) -> Result<()> {
        let re = ::regex::Regex::new(r"^[0-9a-z\-]{1,50}$").unwrap();
        if !re.is_match(&self.name) {
            return Err(EK::ValidationError(format!(
                "recipe name '{}' must be short, lower case, dash separated", self.name
            )).into());
        }
        if self.image.is_empty() {
            return Err(EK::ValidationError(format!("recipe {} has no image", self.identifier())).into());
        }

        let gpu_per_replica = self.replica.as_ref().map(|r| r.gpu_per_replica);
        self.resources.verify(gpu_per_replica)?;

        if self.distributed.is_some() && self.replica.is_some() {
            return Err(EK::ValidationError(format!(
                "recipe {} cannot set both distributed and replica", self.identifier()
            )).into());
        }
        Ok(())
    }

    /// Whether this recipe's run block should use the distributed-launch
    /// variant (spec section 4.3).
    pub fn supports_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    /// Whether this recipe deploys as a replica group (spec section 4.8).
    pub fn is_replica_group(&self) -> bool {
        self.replica.is_some()
    }
}
