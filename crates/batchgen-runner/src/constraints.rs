use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use batchgen_core::{derive_constraints, DerivedConstraint};
use batchgen_exec::PlatformValidator;

const METADATA: &str = "metadata";
const DERIVED_KEYS: [&str; 3] = ["supported_os", "supported_libc", "unsupported_platforms"];

/// Pulls the platform result matrix through `validator` and derives one
/// constraint per recipe.
pub fn derive_from_validator(
    validator: &dyn PlatformValidator,
    recipes: &[String],
    environments: &[String],
) -> Result<BTreeMap<String, DerivedConstraint>> {
    let results = validator.validate(recipes, environments).context("read platform results")?;
    let derived = derive_constraints(&results);
    info!(results = results.len(), recipes = derived.len(), "derived platform constraints");
    Ok(derived)
}

/// TOML `[metadata]` fragment for one recipe. Empty for an unconstrained
/// recipe.
pub fn render_patch(constraint: &DerivedConstraint) -> Result<String> {
    if constraint.is_unconstrained() {
        return Ok(String::new());
    }
    let mut root = toml::Table::new();
    root.insert(METADATA.to_string(), toml::Value::try_from(constraint).context("encode constraint")?);
    toml::to_string(&root).context("render constraint patch")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PatchOutcome {
    Updated { path: PathBuf },
    Missing { path: PathBuf },
}

/// `<recipes_dir>/<first letter>/<recipe>.toml`
pub fn recipe_path(recipes_dir: &Path, recipe: &str) -> Result<PathBuf> {
    let first = recipe
        .chars()
        .next()
        .filter(|c| c.is_ascii_alphanumeric())
        .ok_or_else(|| anyhow!("recipe name {recipe:?} has no usable first letter"))?;
    if recipe.contains(['/', '\\']) || recipe.contains("..") {
        return Err(anyhow!("recipe name {recipe:?} is not a plain file name"));
    }
    Ok(recipes_dir.join(first.to_ascii_lowercase().to_string()).join(format!("{recipe}.toml")))
}

/// Rewrites the derived keys under `[metadata]` in the recipe file. Keys from
/// an earlier derivation are replaced, or removed when the new constraint
/// leaves them empty. Everything else in the file is kept.
pub fn apply_patch(recipes_dir: &Path, recipe: &str, constraint: &DerivedConstraint) -> Result<PatchOutcome> {
    let path = recipe_path(recipes_dir, recipe)?;
    if !path.exists() {
        warn!(recipe = %recipe, path = %path.display(), "recipe file not found; constraint not applied");
        return Ok(PatchOutcome::Missing { path });
    }
    let text = std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let mut doc: toml::Table = text.parse().with_context(|| format!("parse {}", path.display()))?;

    let metadata = doc
        .entry(METADATA)
        .or_insert(toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| anyhow!("{}: [{METADATA}] is not a table", path.display()))?;
    for key in DERIVED_KEYS {
        metadata.remove(key);
    }
    let fields = [
        (DERIVED_KEYS[0], &constraint.supported_os),
        (DERIVED_KEYS[1], &constraint.supported_libc),
        (DERIVED_KEYS[2], &constraint.unsupported_platforms),
    ];
    for (key, values) in fields {
        if !values.is_empty() {
            let list = values.iter().cloned().map(toml::Value::String).collect();
            metadata.insert(key.to_string(), toml::Value::Array(list));
        }
    }

    let out = toml::to_string(&doc).with_context(|| format!("render {}", path.display()))?;
    std::fs::write(&path, out).with_context(|| format!("write {}", path.display()))?;
    info!(recipe = %recipe, path = %path.display(), "applied constraint");
    Ok(PatchOutcome::Updated { path })
}
