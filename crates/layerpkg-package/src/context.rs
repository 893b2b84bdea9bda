//! Per-invocation build state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use layerpkg_common::config::PackageConfig;
use layerpkg_common::settings::Settings;

/// State shared by every stage of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Build-context directory handed to the image builder.
    pub context_dir: PathBuf,
    /// Build recipe, resolved against the context directory.
    pub recipe: PathBuf,
    /// Dist tag derived from the target release.
    pub dist_tag: String,
    /// Build arguments passed to every stage.
    pub build_args: BTreeMap<String, String>,
    /// Directory receiving the packages.
    pub output_dir: PathBuf,
}

impl BuildContext {
    /// Derives the context from the tool settings and the main package.
    #[must_use]
    pub fn new(settings: &Settings, context_dir: &Path, main: &PackageConfig) -> Self {
        let dist_tag = settings.dist_tag();
        let build_args = common_build_args(&dist_tag, main);
        Self {
            context_dir: context_dir.to_path_buf(),
            recipe: resolve_recipe(context_dir, &settings.recipe),
            dist_tag,
            build_args,
            output_dir: settings
                .output_dir
                .clone()
                .unwrap_or_else(|| context_dir.to_path_buf()),
        }
    }
}

/// `DIST`, `VERSION`, `NAME` and `RELEASE`, each only when non-empty.
#[must_use]
pub fn common_build_args(dist_tag: &str, main: &PackageConfig) -> BTreeMap<String, String> {
    [
        ("DIST", dist_tag),
        ("VERSION", main.version.as_str()),
        ("NAME", main.name.as_str()),
        ("RELEASE", main.release.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

/// Resolves `recipe` against `context_dir` unless it is absolute.
#[must_use]
pub fn resolve_recipe(context_dir: &Path, recipe: &Path) -> PathBuf {
    if recipe.is_absolute() {
        recipe.to_path_buf()
    } else {
        context_dir.join(recipe)
    }
}
