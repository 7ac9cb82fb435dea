//! File-backed recipe catalog: loads recipe templates from a hierarchical
//! directory rooted at a configured path (spec section 4.2). Grounded on
//! `Manifest`'s read-verify shape in `manifest.rs`, generalized to the
//! `category/name` identifier scheme recipes use instead of a flat
//! per-region manifest directory.
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use error::OrchestraErrorKind as EK;
use recipe::Recipe;
use Result;

/// Read-mostly cache of every recipe under a catalog root (spec section 5:
/// "Recipe cache: read-mostly; protected by a read/write lock or
/// equivalent"). Parsed once per identifier; invalidation is not required
/// within a single run (spec section 4.2).
pub struct RecipeCatalog {
    root: PathBuf,
    cache: RwLock<BTreeMap<String, Recipe>>,
}

impl RecipeCatalog {
    pub fn new<P: Into<PathBuf>>(root: P) -> RecipeCatalog {
        RecipeCatalog { root: root.into(), cache: RwLock::new(BTreeMap::new()) }
    }

    /// Every recipe identifier (`category/name`) found under the catalog
    /// root, derived from the relative path of each `*.yml` file.
    pub fn list_all(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in ::walkdir::WalkDir::new(&self.root) {
            let entry = entry
                .map_err(|e| EK::ValidationError(format!("failed walking recipe catalog: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            let rel = path.strip_prefix(&self.root).unwrap_or(path);
            let id = rel.with_extension("");
            ids.push(id.to_string_lossy().replace('\\', "/"));
        }
        ids.sort();
        Ok(ids)
    }

    /// Load (and cache) the recipe named `identifier` (`category/name`).
    /// Fails with `RecipeNotFound` if the file is absent, `ValidationError`
    /// if it fails to parse or `verify()`.
    pub fn load(&self, identifier: &str) -> Result<Recipe> {
        if let Some(r) = self.cache.read().expect("recipe cache lock poisoned").get(identifier) {
            return Ok(r.clone());
        }
        let path = self.root.join(format!("{}.yml", identifier));
        let raw = fs::read_to_string(&path).map_err(|_| EK::RecipeNotFound(identifier.to_string()))?;
        let recipe: Recipe = ::serde_yaml::from_str(&raw)
            .map_err(|e| EK::ValidationError(format!("recipe {} is malformed: {}", identifier, e)))?;
        recipe.verify()?;
        self.cache
            .write()
            .expect("recipe cache lock poisoned")
            .insert(identifier.to_string(), recipe.clone());
        Ok(recipe)
    }

    /// The primary port for `identifier` (spec section 4.2's `getRecipePort`).
    pub fn recipe_port(&self, identifier: &str) -> Result<u16> {
        self.load(identifier)?.primary_port()
    }
}
