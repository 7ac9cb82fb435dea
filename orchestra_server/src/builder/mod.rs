//! Builder registry & script builders (spec section 4.3): a Strategy
//! pattern over `(category, recipe_name)`. A recipe-specific builder
//! overrides one or two hooks of its category's default; the registry
//! falls through to the category default when no override is registered.
//!
//! Generalizes the polymorphic-strategy note in spec section 9: tagged
//! dispatch via a registry of boxed trait objects, not inheritance.
use std::collections::BTreeMap;

use orchestra_definitions::structs::ReplicaConfig;
use orchestra_definitions::{math, template, ClusterConfig, DeploymentSpec, RecipeCategory};
use Result;

pub mod inference;
pub mod vector_db;

/// The four labeled sections of a batch script (spec section 4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSections {
    pub directives: Vec<String>,
    pub environment: Vec<String>,
    pub container_build: Vec<String>,
    pub run_block: Vec<String>,
}

impl ScriptSections {
    /// Render the four sections into a single POSIX shell batch script,
    /// scheduler shebang first (spec section 6).
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/bash\n");
        for d in &self.directives {
            out.push_str("#SBATCH ");
            out.push_str(d);
            out.push('\n');
        }
        out.push('\n');
        for e in &self.environment {
            out.push_str("export ");
            out.push_str(e);
            out.push('\n');
        }
        out.push('\n');
        for c in &self.container_build {
            out.push_str(c);
            out.push('\n');
        }
        out.push('\n');
        for r in &self.run_block {
            out.push_str(r);
            out.push('\n');
        }
        out
    }
}

/// Capability set every script builder implements (spec section 4.3 and
/// section 9's "interface composition plus explicit fall-through").
pub trait Builder: Send + Sync {
    /// Scheduler directives derived from `spec.resources` plus cluster
    /// defaults: account, partition, QoS, nodes, tasks-per-node, CPUs,
    /// memory, GPUs, time limit, job name, output/error paths.
    fn directives(&self, spec: &DeploymentSpec, config: &ClusterConfig, job_name: &str) -> Vec<String> {
        let r = &spec.resources;
        vec![
            format!("--account={}", config.resources.account),
            format!("--partition={}", config.resources.partition),
            format!("--qos={}", config.resources.qos),
            format!("--nodes={}", r.nodes),
            "--ntasks-per-node=1".to_string(),
            format!("--cpus-per-task={}", r.cpu),
            format!("--mem={}", r.memory),
            format!("--gres=gpu:{}", r.gpu),
            format!("--time={}", r.time_limit_minutes),
            format!("--job-name={}", job_name),
            format!("--output={}.out", job_name),
            format!("--error={}.err", job_name),
        ]
    }

    /// Environment variables, including `PORT` and any recipe-declared
    /// variables. Replica/distributed variants layer additional entries on
    /// top via `run_block`.
    fn environment(&self, spec: &DeploymentSpec, config: &ClusterConfig) -> Vec<String> {
        let mut out = vec![
            format!("APPTAINER_TMPDIR={}/$SLURM_JOB_ID", config.container_paths.apptainer_tmpdir_base),
            format!("APPTAINER_CACHEDIR={}", config.container_paths.apptainer_cachedir_base),
        ];
        if let Some(port) = spec.ports.first() {
            out.push(format!("PORT={}", port));
        }
        for (k, v) in &spec.environment {
            let rendered = template::render(v, &BTreeMap::new()).unwrap_or_else(|_| v.clone());
            out.push(format!("{}={}", k, rendered));
        }
        out
    }

    /// Commands ensuring the container image is present. Idempotent: skip
    /// if a cached image matching the recipe's name already exists.
    fn container_build(&self, spec: &DeploymentSpec, config: &ClusterConfig) -> Vec<String> {
        let cache_path = format!("{}/{}.sif", config.container_paths.apptainer_cachedir_base, spec.name);
        vec![
            format!("if [ ! -f {} ]; then", cache_path),
            format!("  apptainer pull {} {}", cache_path, spec.image),
            "fi".to_string(),
        ]
    }

    /// The run block: single-instance, distributed, or replica, selected by
    /// what the merged spec declares (spec section 4.3).
    fn run_block(&self, spec: &DeploymentSpec, config: &ClusterConfig, cache_path: &str) -> Vec<String> {
        if let Some(ref replica) = spec.replica {
            replica_run_block(spec, replica, cache_path)
        } else if let Some(ref dist) = spec.distributed {
            vec![format!(
                "srun apptainer exec --nv {} torchrun --nproc_per_node={} --rdzv_backend={} --master_port={} run.py",
                cache_path, dist.nproc_per_node, dist.rdzv_backend, dist.master_port
            )]
        } else {
            vec![format!("apptainer exec --nv {} ./run.sh", cache_path)]
        }
    }

    /// Whether this builder's run block emits the distributed-launch
    /// variant (spec section 4.3: "exposes `supportsDistributed()`").
    fn supports_distributed(&self, spec: &DeploymentSpec) -> bool {
        spec.distributed.is_some()
    }

    /// Assemble every section into the final `ScriptSections`.
    fn build(&self, spec: &DeploymentSpec, config: &ClusterConfig, job_name: &str) -> Result<ScriptSections> {
        let cache_path = format!("{}/{}.sif", config.container_paths.apptainer_cachedir_base, spec.name);
        Ok(ScriptSections {
            directives: self.directives(spec, config, job_name),
            environment: self.environment(spec, config),
            container_build: self.container_build(spec, config),
            run_block: self.run_block(spec, config, &cache_path),
        })
    }
}

fn replica_run_block(spec: &DeploymentSpec, replica: &ReplicaConfig, cache_path: &str) -> Vec<String> {
    let count = replica.replicas_per_node(spec.resources.gpu);
    let ports = math::replica_ports(replica.base_port, count);
    let mut out = Vec::new();
    for (i, port) in ports.iter().enumerate() {
        let gpu_lo = i as u32 * replica.gpu_per_replica;
        let gpu_hi = gpu_lo + replica.gpu_per_replica - 1;
        out.push(format!(
            "CUDA_VISIBLE_DEVICES={}-{} PORT={} apptainer exec --nv {} ./run.sh &",
            gpu_lo, gpu_hi, port, cache_path
        ));
    }
    out.push("wait".to_string());
    out
}

/// Maps `(category, recipe_name)` to a builder strategy. Falls through to
/// the category default when no recipe-specific builder is registered
/// (spec section 4.3).
pub struct BuilderRegistry {
    defaults: BTreeMap<RecipeCategory, Box<dyn Builder>>,
    overrides: BTreeMap<(RecipeCategory, String), Box<dyn Builder>>,
}

impl BuilderRegistry {
    /// The registry as shipped: inference and vector-db category defaults,
    /// plus the tensor-parallel inference override (spec section 4.3:
    /// "at least two category builders must exist ... recipe-specialized
    /// builders override one or two hooks").
    pub fn standard() -> BuilderRegistry {
        let mut defaults: BTreeMap<RecipeCategory, Box<dyn Builder>> = BTreeMap::new();
        defaults.insert(RecipeCategory::Inference, Box::new(inference::InferenceBuilder));
        defaults.insert(RecipeCategory::VectorDb, Box::new(vector_db::VectorDbBuilder));

        let mut overrides: BTreeMap<(RecipeCategory, String), Box<dyn Builder>> = BTreeMap::new();
        overrides.insert(
            (RecipeCategory::Inference, "vllm-tensor-parallel".to_string()),
            Box::new(inference::TensorParallelInferenceBuilder),
        );
        overrides.insert(
            (RecipeCategory::VectorDb, "qdrant-persistent".to_string()),
            Box::new(vector_db::PersistentVectorDbBuilder),
        );
        BuilderRegistry { defaults, overrides }
    }

    /// `(category, recipeName) -> builder strategy` (spec section 4.3).
    pub fn resolve(&self, category: RecipeCategory, recipe_name: &str) -> Option<&dyn Builder> {
        if let Some(b) = self.overrides.get(&(category, recipe_name.to_string())) {
            return Some(b.as_ref());
        }
        self.defaults.get(&category).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::structs::Resources;
    use orchestra_definitions::RecipeCategory::*;
    use std::collections::BTreeMap as Map;

    fn sample_config() -> ClusterConfig {
        use orchestra_definitions::config::{ContainerPaths, ResourceDefaults, SshTarget, TunnelEndpoints};
        ClusterConfig {
            orchestrator_port: 8080,
            resources: ResourceDefaults { account: "acct".into(), partition: "gpu".into(), qos: "normal".into(), nodes: 1, cpus: 4, time_limit_minutes: 60 },
            container_paths: ContainerPaths {
                apptainer_tmpdir_base: "/tmp".into(),
                apptainer_cachedir_base: "/cache".into(),
                remote_fake_home_base: "/tmp/home".into(),
                remote_hf_cache_dirname: ".cache/huggingface".into(),
            },
            tunnel: TunnelEndpoints { slurm_rest_host: "localhost".into(), slurm_rest_port: 6820, slurm_rest_local_port: 16820 },
            ssh: SshTarget { user: "svc".into(), host: "login".into(), port: 22, key_path: "/dev/null".into() },
            slurm_jwt: "t".into(),
            remote_base_path: "/remote".into(),
            local_base_path: "/local".into(),
        }
    }

    fn sample_spec() -> DeploymentSpec {
        DeploymentSpec {
            name: "vllm-single-node".into(),
            category: Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports: vec![8000],
            environment: Map::new(),
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 1, time_limit_minutes: 180 },
            distributed: None,
            replica: None,
        }
    }

    #[test]
    fn unregistered_recipe_falls_back_to_category_default() {
        let reg = BuilderRegistry::standard();
        let builder = reg.resolve(Inference, "some-other-llm").unwrap();
        let script = builder.build(&sample_spec(), &sample_config(), "svc-123").unwrap();
        assert!(script.directives.iter().any(|d| d.contains("--gres=gpu:1")));
    }

    #[test]
    fn registered_recipe_uses_override() {
        let reg = BuilderRegistry::standard();
        let builder = reg.resolve(Inference, "vllm-tensor-parallel").unwrap();
        let script = builder.build(&sample_spec(), &sample_config(), "svc-123").unwrap();
        assert!(script.container_build.iter().any(|l| l.contains("NCCL")));
    }

    #[test]
    fn replica_run_block_assigns_contiguous_ports() {
        let mut spec = sample_spec();
        spec.resources.gpu = 4;
        spec.replica = Some(ReplicaConfig { gpu_per_replica: 1, base_port: 8001 });
        let reg = BuilderRegistry::standard();
        let builder = reg.resolve(Inference, "vllm-single-node").unwrap();
        let script = builder.build(&spec, &sample_config(), "svc-123").unwrap();
        let joined = script.run_block.join("\n");
        for port in 8001..=8004 {
            assert!(joined.contains(&format!("PORT={}", port)));
        }
    }

    #[test]
    fn rendered_script_starts_with_shebang() {
        let reg = BuilderRegistry::standard();
        let builder = reg.resolve(Inference, "vllm-single-node").unwrap();
        let script = builder.build(&sample_spec(), &sample_config(), "svc-123").unwrap();
        assert!(script.render().starts_with("#!/bin/bash\n"));
    }
}
