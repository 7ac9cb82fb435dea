//! Merge behaviour: user `Overrides` into a `Recipe`, producing a
//! `DeploymentSpec`. Field-by-field override with inheritance of anything
//! left unset; nested maps (`environment`) merge key-by-key rather than
//! replacing wholesale (spec section 3).

use deployment::{DeploymentSpec, Overrides};
use Recipe;
use Result;

/// Merge `overrides` into `recipe`, then validate the result.
///
/// Validation (spec section 3): `gpu` divisible by `gpu_per_replica`,
/// `nodes >= 1`, `time_limit >= 1`. Environment values are already strings
/// by construction (the wire format only allows string values), so no
/// coercion step is needed here beyond what serde already enforces.
pub fn merge_spec(recipe: &Recipe, overrides: &Overrides) -> Result<DeploymentSpec> {
    let mut spec = recipe.clone();

    if let Some(ref image) = overrides.image {
        spec.image = image.clone();
    }

    for (k, v) in &overrides.environment {
        spec.environment.insert(k.clone(), v.clone());
    }

    if let Some(ref pr) = overrides.resources {
        spec.resources = pr.apply_to(&spec.resources);
    }

    if let Some(ref d) = overrides.distributed {
        spec.distributed = Some(d.clone());
    }

    if let Some(ref r) = overrides.replica {
        spec.replica = Some(r.clone());
    } else if let Some(gpr) = overrides.gpu_per_replica {
        // Convenience: a bare `gpu_per_replica`/`base_port` pair (as used in
        // the spec's end-to-end replica scenario) implies a replica config
        // even without a full nested `replica` block.
        let base_port = overrides
            .base_port
            .or_else(|| spec.replica.as_ref().map(|r| r.base_port))
            .unwrap_or(8001);
        spec.replica = Some(crate::structs::ReplicaConfig { gpu_per_replica: gpr, base_port });
    } else if let Some(base_port) = overrides.base_port {
        if let Some(ref mut r) = spec.replica {
            r.base_port = base_port;
        }
    }

    spec.verify()?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use deployment::PartialResources;
    use recipe::RecipeCategory;
    use structs::Resources;

    fn recipe() -> Recipe {
        Recipe {
            name: "vllm-replicas".into(),
            category: RecipeCategory::Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports: vec![8000],
            environment: {
                let mut e = BTreeMap::new();
                e.insert("MODEL".to_string(), "meta-llama/Llama-3-8B".to_string());
                e
            },
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 1, time_limit_minutes: 60 },
            distributed: None,
            replica: None,
        }
    }

    #[test]
    fn missing_fields_inherit_from_recipe() {
        let overrides = Overrides::default();
        let spec = merge_spec(&recipe(), &overrides).unwrap();
        assert_eq!(spec.image, recipe().image);
        assert_eq!(spec.resources.cpu, 16);
    }

    #[test]
    fn environment_merges_key_by_key() {
        let mut overrides = Overrides::default();
        overrides.environment.insert("MAX_TOKENS".to_string(), "4096".to_string());
        let spec = merge_spec(&recipe(), &overrides).unwrap();
        assert_eq!(spec.environment.get("MODEL").unwrap(), "meta-llama/Llama-3-8B");
        assert_eq!(spec.environment.get("MAX_TOKENS").unwrap(), "4096");
    }

    #[test]
    fn gpu_per_replica_4_and_1_yields_4_replicas() {
        let mut overrides = Overrides::default();
        overrides.resources = Some(PartialResources { gpu: Some(4), ..Default::default() });
        overrides.gpu_per_replica = Some(1);
        overrides.base_port = Some(8001);
        let spec = merge_spec(&recipe(), &overrides).unwrap();
        let replica = spec.replica.unwrap();
        assert_eq!(replica.replicas_per_node(spec.resources.gpu), 4);
        assert_eq!(replica.base_port, 8001);
    }

    #[test]
    fn gpu_per_replica_not_divisible_fails() {
        let mut overrides = Overrides::default();
        overrides.resources = Some(PartialResources { gpu: Some(4), ..Default::default() });
        overrides.gpu_per_replica = Some(3);
        assert!(merge_spec(&recipe(), &overrides).is_err());
    }

    #[test]
    fn zero_time_limit_override_fails_validation() {
        let mut overrides = Overrides::default();
        overrides.resources = Some(PartialResources { time_limit_minutes: Some(0), ..Default::default() });
        assert!(merge_spec(&recipe(), &overrides).is_err());
    }
}
