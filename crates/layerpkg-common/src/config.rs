//! Package configuration document.
//!
//! The document uses RPM preamble spelling for its keys. The top level
//! describes the main package; the `package` map declares subpackages with
//! the same schema.
//!
//! ```yaml
//! Name: hello
//! Version: 1.2.3
//! License: MIT
//! Requires:
//!   - bash
//! Requires(post):
//!   - systemd
//! package:
//!   hello-devel:
//!     Summary: headers for hello
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{LayerpkgError, Result};

/// Metadata and relations declared for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Package name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Upstream version.
    #[serde(rename = "Version")]
    pub version: String,
    /// Package release.
    #[serde(rename = "Release")]
    pub release: String,
    /// Package epoch, `0` when unset.
    #[serde(rename = "Epoch")]
    pub epoch: u32,
    /// License expression.
    #[serde(rename = "License")]
    pub license: String,
    /// Package group.
    #[serde(rename = "Group")]
    pub group: String,
    /// One-line summary.
    #[serde(rename = "Summary")]
    pub summary: String,
    /// Long description.
    #[serde(rename = "Description")]
    pub description: String,
    /// Project URL.
    #[serde(rename = "URL")]
    pub url: String,
    /// Vendor string.
    #[serde(rename = "Vendor")]
    pub vendor: String,
    /// Packager string.
    #[serde(rename = "Packager")]
    pub packager: String,
    /// Target architecture, the host architecture when empty.
    #[serde(rename = "BuildArch")]
    pub build_arch: String,

    /// Plain runtime requirements.
    #[serde(rename = "Requires")]
    pub requires: Vec<String>,
    /// `Requires(pre)`.
    #[serde(rename = "Requires(pre)")]
    pub requires_pre: Vec<String>,
    /// `Requires(post)`.
    #[serde(rename = "Requires(post)")]
    pub requires_post: Vec<String>,
    /// `Requires(preun)`.
    #[serde(rename = "Requires(preun)")]
    pub requires_preun: Vec<String>,
    /// `Requires(postun)`.
    #[serde(rename = "Requires(postun)")]
    pub requires_postun: Vec<String>,
    /// `Requires(pretrans)`.
    #[serde(rename = "Requires(pretrans)")]
    pub requires_pretrans: Vec<String>,
    /// `Requires(posttrans)`.
    #[serde(rename = "Requires(posttrans)")]
    pub requires_posttrans: Vec<String>,
    /// `Requires(verify)`.
    #[serde(rename = "Requires(verify)")]
    pub requires_verify: Vec<String>,
    /// `Requires(interp)`.
    #[serde(rename = "Requires(interp)")]
    pub requires_interp: Vec<String>,
    /// `Requires(meta)`.
    #[serde(rename = "Requires(meta)")]
    pub requires_meta: Vec<String>,

    /// Capabilities this package provides.
    #[serde(rename = "Provides")]
    pub provides: Vec<String>,
    /// Packages this package conflicts with.
    #[serde(rename = "Conflicts")]
    pub conflicts: Vec<String>,
    /// Packages this package obsoletes.
    #[serde(rename = "Obsoletes")]
    pub obsoletes: Vec<String>,
    /// Weak forward dependencies.
    #[serde(rename = "Recommends")]
    pub recommends: Vec<String>,
    /// Weaker forward dependencies.
    #[serde(rename = "Suggests")]
    pub suggests: Vec<String>,
}

impl PackageConfig {
    /// Returns every requirement, plain ones first, followed by each
    /// scriptlet-qualified variant.
    pub fn all_requires(&self) -> impl Iterator<Item = &String> {
        self.requires
            .iter()
            .chain(&self.requires_pre)
            .chain(&self.requires_post)
            .chain(&self.requires_preun)
            .chain(&self.requires_postun)
            .chain(&self.requires_pretrans)
            .chain(&self.requires_posttrans)
            .chain(&self.requires_verify)
            .chain(&self.requires_interp)
            .chain(&self.requires_meta)
    }

    /// Fills unset version, release, epoch, license and URL from `parent`.
    pub fn inherit_from(&mut self, parent: &Self) {
        fill(&mut self.version, &parent.version);
        fill(&mut self.release, &parent.release);
        fill(&mut self.license, &parent.license);
        fill(&mut self.url, &parent.url);
        if self.epoch == 0 {
            self.epoch = parent.epoch;
        }
    }
}

fn fill(slot: &mut String, value: &str) {
    if slot.is_empty() {
        value.clone_into(slot);
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// The main package.
    pub main: PackageConfig,
    /// Subpackages in declaration order, keyed by name.
    pub subpackages: IndexMap<String, PackageConfig>,
}

/// The `package` section of the document.
#[derive(Deserialize)]
struct SubpackageSection {
    #[serde(default)]
    package: IndexMap<String, PackageConfig>,
}

impl Config {
    /// Parses a configuration document from YAML text.
    ///
    /// The main package and the `package` map are read in two passes over
    /// the same text so unquoted scalars such as `Release: 4` stay strings.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if the text does not match the schema.
    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let main: PackageConfig = serde_yaml::from_str(text)?;
        let section: SubpackageSection = serde_yaml::from_str(text)?;
        Ok(Self {
            main,
            subpackages: section.package,
        })
    }

    /// Reads and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML for
    /// this schema (including a negative or non-integer epoch), or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading package configuration");
        let content = std::fs::read_to_string(path).map_err(|e| LayerpkgError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_yaml(&content).map_err(|e| LayerpkgError::Yaml {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the main package is named and package names are unique.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::Config` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.main.name.trim().is_empty() {
            return Err(LayerpkgError::Config {
                message: "the main package must declare a Name".into(),
            });
        }
        let mut seen = HashSet::new();
        for package in self.packages() {
            if !seen.insert(package.name.clone()) {
                return Err(LayerpkgError::Config {
                    message: format!("duplicate package name: \"{}\"", package.name),
                });
            }
        }
        Ok(())
    }

    /// Returns the effective configuration of every declared package,
    /// main package first, subpackages in declaration order.
    ///
    /// Subpackages without a `Name` are named after their map key and
    /// inherit version, release, epoch, license and URL from the main
    /// package when they leave them unset.
    #[must_use]
    pub fn packages(&self) -> Vec<PackageConfig> {
        let mut packages = Vec::with_capacity(self.subpackages.len() + 1);
        packages.push(self.main.clone());
        for (key, sub) in &self.subpackages {
            let mut sub = sub.clone();
            fill(&mut sub.name, key);
            sub.inherit_from(&self.main);
            packages.push(sub);
        }
        packages
    }
}

/// Locates the configuration document for a build-context directory.
///
/// An explicit file name is resolved relative to `context_dir`. Without one,
/// the first `*.yaml` file in `context_dir`, sorted by name, is used.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or holds no YAML file.
pub fn discover(context_dir: &Path, explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(name) = explicit {
        return Ok(context_dir.join(name));
    }

    let entries = std::fs::read_dir(context_dir).map_err(|e| LayerpkgError::Io {
        path: context_dir.to_path_buf(),
        source: e,
    })?;
    let mut candidates = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| LayerpkgError::Io {
                path: context_dir.to_path_buf(),
                source: e,
            })?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
            candidates.push(path);
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| LayerpkgError::NotFound {
            kind: "yaml configuration",
            id: context_dir.display().to_string(),
        })
}
