//! Orchestrator-side access to the recipe catalog. Thin wrapper around
//! `orchestra_definitions::RecipeCatalog`, rooted at `LOCAL_BASE_PATH` plus
//! a `recipes` subdirectory (spec section 6: "Paths relative to a
//! configured recipe root").
use std::path::Path;

use orchestra_definitions::{ClusterConfig, Recipe, RecipeCatalog, Result};

pub struct RecipeLoader {
    catalog: RecipeCatalog,
}

impl RecipeLoader {
    pub fn new(config: &ClusterConfig) -> RecipeLoader {
        let root = Path::new(&config.local_base_path).join("recipes");
        RecipeLoader { catalog: RecipeCatalog::new(root) }
    }

    /// `listAll()` (spec section 4.2): every recipe identifier in the catalog.
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.catalog.list_all()
    }

    /// `load(name)` (spec section 4.2): the recipe or `RecipeNotFound`.
    pub fn load(&self, identifier: &str) -> Result<Recipe> {
        self.catalog.load(identifier)
    }

    /// `getRecipePort(name)` (spec section 4.2).
    pub fn recipe_port(&self, identifier: &str) -> Result<u16> {
        self.catalog.recipe_port(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config_at(root: &::std::path::Path) -> ClusterConfig {
        use orchestra_definitions::config::{ContainerPaths, ResourceDefaults, SshTarget, TunnelEndpoints};
        ClusterConfig {
            orchestrator_port: 8080,
            resources: ResourceDefaults {
                account: "default".into(),
                partition: "gpu".into(),
                qos: "normal".into(),
                nodes: 1,
                cpus: 4,
                time_limit_minutes: 60,
            },
            container_paths: ContainerPaths {
                apptainer_tmpdir_base: "/tmp".into(),
                apptainer_cachedir_base: "/tmp".into(),
                remote_fake_home_base: "/tmp".into(),
                remote_hf_cache_dirname: ".cache".into(),
            },
            tunnel: TunnelEndpoints { slurm_rest_host: "localhost".into(), slurm_rest_port: 6820, slurm_rest_local_port: 16820 },
            ssh: SshTarget { user: "svc".into(), host: "login".into(), port: 22, key_path: "/dev/null".into() },
            slurm_jwt: "token".into(),
            remote_base_path: "/remote".into(),
            local_base_path: root.to_string_lossy().to_string(),
        }
    }

    #[test]
    fn loads_recipe_under_local_base_path_recipes_dir() {
        let tmp = ::tempfile::tempdir().unwrap();
        let recipes_dir = tmp.path().join("recipes").join("inference");
        fs::create_dir_all(&recipes_dir).unwrap();
        fs::write(
            recipes_dir.join("vllm-single-node.yml"),
            "name: vllm-single-node\ncategory: inference\nimage: docker://vllm/vllm-openai:latest\nports: [8000]\nresources:\n  nodes: 1\n  cpu: 16\n  memory: 64G\n  gpu: 1\n  time_limit_minutes: 180\n",
        ).unwrap();

        let loader = RecipeLoader::new(&config_at(tmp.path()));
        let recipe = loader.load("inference/vllm-single-node").unwrap();
        assert_eq!(recipe.name, "vllm-single-node");
        assert_eq!(loader.recipe_port("inference/vllm-single-node").unwrap(), 8000);
    }
}
