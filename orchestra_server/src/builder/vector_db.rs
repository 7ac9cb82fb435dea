//! Vector-db category builders (spec section 4.3): the default, plus a
//! persistent-store specialization overriding the container-build hook to
//! reuse a pre-built image rather than pulling on every deploy.
use super::Builder;
use orchestra_definitions::{ClusterConfig, DeploymentSpec};

/// Category default for `category: vector-db` recipes.
pub struct VectorDbBuilder;
impl Builder for VectorDbBuilder {}

/// Override for vector stores backed by a persistent volume: the image is
/// expected to already be cached at deploy time (provisioned out of band),
/// so the pull step is skipped entirely rather than made conditional.
pub struct PersistentVectorDbBuilder;
impl Builder for PersistentVectorDbBuilder {
    fn container_build(&self, spec: &DeploymentSpec, config: &ClusterConfig) -> Vec<String> {
        let cache_path = format!("{}/{}.sif", config.container_paths.apptainer_cachedir_base, spec.name);
        vec![format!("test -f {} || (echo 'persistent image missing: {}' && exit 1)", cache_path, cache_path)]
    }
}
