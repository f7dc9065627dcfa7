//! Recipe registry.
//!
//! `RecipeProvider` is the read side the execution service depends on.
//! Two implementations: a fixed list (`StaticRecipeProvider`) and a
//! directory of recipe files that can be reloaded in place
//! (`DirectoryRecipeProvider`).

use super::error::{RecipeError, Result};
use super::parser;
use super::recipe::Recipe;
use super::state::LockStore;
use crate::provenance::hasher;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Lookup of recipes by id.
pub trait RecipeProvider: Send + Sync {
    /// Every registered recipe, in load order.
    fn get_all(&self) -> Vec<Arc<Recipe>>;

    /// The unique recipe for `id`, or `RecipeNotFound`.
    fn get_by_id(&self, id: &str) -> Result<Arc<Recipe>>;

    /// Re-read the backing source. Returns the number of recipes now registered.
    fn reload(&self) -> Result<usize> {
        Ok(self.get_all().len())
    }
}

type RecipeMap = IndexMap<String, Arc<Recipe>>;

fn index(recipes: Vec<Recipe>) -> Result<RecipeMap> {
    let mut map = RecipeMap::new();
    for recipe in recipes {
        let id = recipe.id().to_string();
        if map.insert(id.clone(), Arc::new(recipe)).is_some() {
            return Err(RecipeError::validation(format!("duplicate recipe id '{}'", id)));
        }
    }
    Ok(map)
}

// ============================================================================
// Static
// ============================================================================

/// Registry over a fixed set of recipes.
#[derive(Debug, Default)]
pub struct StaticRecipeProvider {
    recipes: RecipeMap,
}

impl StaticRecipeProvider {
    pub fn new(recipes: Vec<Recipe>) -> Result<Self> {
        Ok(Self {
            recipes: index(recipes)?,
        })
    }
}

impl RecipeProvider for StaticRecipeProvider {
    fn get_all(&self) -> Vec<Arc<Recipe>> {
        self.recipes.values().cloned().collect()
    }

    fn get_by_id(&self, id: &str) -> Result<Arc<Recipe>> {
        self.recipes
            .get(id)
            .cloned()
            .ok_or_else(|| RecipeError::RecipeNotFound(id.to_string()))
    }
}

// ============================================================================
// Directory
// ============================================================================

#[derive(Debug, Default)]
struct Snapshot {
    recipes: RecipeMap,
    /// Content hash of each recipe's source file
    hashes: IndexMap<String, String>,
}

/// Registry backed by a directory of recipe files.
///
/// Step status is restored from the state lock on first load. On reload, a
/// recipe whose file is unchanged keeps its existing instance. A changed
/// recipe gets a new instance whose steps share state with the old one, so
/// executions in flight keep reporting through the registry either way.
#[derive(Debug)]
pub struct DirectoryRecipeProvider {
    dir: PathBuf,
    locks: Option<LockStore>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DirectoryRecipeProvider {
    /// Load every recipe in `dir`. With `locks`, persisted step status is restored.
    pub fn open(dir: impl Into<PathBuf>, locks: Option<LockStore>) -> Result<Self> {
        let provider = Self {
            dir: dir.into(),
            locks,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        };
        provider.reload()?;
        Ok(provider)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn build(&self, previous: &Snapshot) -> Result<Snapshot> {
        let mut next = Snapshot::default();
        for path in parser::discover_recipe_files(&self.dir)? {
            let hash = hasher::hash_file(&path)?;
            let mut recipe = parser::load_recipe(&path)?;
            let id = recipe.id().to_string();

            let reuse = previous
                .recipes
                .get(&id)
                .filter(|_| previous.hashes.get(&id) == Some(&hash))
                .cloned();

            let recipe = match reuse {
                Some(existing) => existing,
                None => {
                    match previous.recipes.get(&id) {
                        Some(old) => {
                            let shared = recipe.inherit(old);
                            tracing::debug!(recipe = %id, shared, "recipe changed on disk");
                        }
                        None => self.restore_from_disk(&recipe)?,
                    }
                    Arc::new(recipe)
                }
            };

            if next.recipes.insert(id.clone(), recipe).is_some() {
                return Err(RecipeError::validation(format!(
                    "duplicate recipe id '{}' in {}",
                    id,
                    path.display()
                )));
            }
            next.hashes.insert(id, hash);
        }
        Ok(next)
    }

    fn restore_from_disk(&self, recipe: &Recipe) -> Result<()> {
        if let Some(ref locks) = self.locks {
            if let Some(lock) = locks.load(recipe.id())? {
                let restored = recipe.restore(&lock);
                tracing::debug!(recipe = recipe.id(), restored, "restored step status");
            }
        }
        Ok(())
    }
}

impl RecipeProvider for DirectoryRecipeProvider {
    fn get_all(&self) -> Vec<Arc<Recipe>> {
        self.current().recipes.values().cloned().collect()
    }

    fn get_by_id(&self, id: &str) -> Result<Arc<Recipe>> {
        self.current()
            .recipes
            .get(id)
            .cloned()
            .ok_or_else(|| RecipeError::RecipeNotFound(id.to_string()))
    }

    /// Build a new snapshot off-lock, then swap it in. On error the old
    /// snapshot stays.
    fn reload(&self) -> Result<usize> {
        let previous = self.current();
        let next = self.build(&previous)?;
        let count = next.recipes.len();
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        tracing::info!(dir = %self.dir.display(), recipes = count, "recipes loaded");
        Ok(count)
    }
}
