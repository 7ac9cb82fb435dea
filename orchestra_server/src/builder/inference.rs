//! Inference category builders (spec section 4.3): the LLM-server default,
//! plus a tensor-parallel specialization overriding the container-build
//! hook to set NCCL inter-GPU settings before the run block starts.
use super::Builder;
use orchestra_definitions::{ClusterConfig, DeploymentSpec};

/// Category default for `category: inference` recipes. Uses every hook's
/// default implementation unchanged.
pub struct InferenceBuilder;
impl Builder for InferenceBuilder {}

/// Override for recipes that shard a single model across multiple GPUs
/// within one node (tensor parallelism). Only the container-build hook
/// differs from the category default: it additionally sets the NCCL
/// environment the launcher expects before the image is pulled.
pub struct TensorParallelInferenceBuilder;
impl Builder for TensorParallelInferenceBuilder {
    fn container_build(&self, spec: &DeploymentSpec, config: &ClusterConfig) -> Vec<String> {
        let mut lines = InferenceBuilder.container_build(spec, config);
        lines.push("export NCCL_P2P_DISABLE=0".to_string());
        lines.push("export NCCL_IB_DISABLE=1".to_string());
        lines
    }
}
