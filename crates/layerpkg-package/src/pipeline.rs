//! Stage orchestration.
//!
//! One invocation runs, strictly in order:
//!
//! 1. the `buildrequires` stage (network enabled), tagged `<name>-buildrequires`;
//! 2. the `build` stage, tagged `<name>-build`;
//! 3. per declared package, main first: the finalize stage targeting the
//!    package name, then layer walk, dependency extraction, metadata merge,
//!    and package write.
//!
//! The first failure stops the run. Packages already written stay on disk.

use std::path::{Path, PathBuf};

use layerpkg_common::cancel::CancelToken;
use layerpkg_common::config::{Config, PackageConfig};
use layerpkg_common::constants::{BUILD_STAGE, BUILDREQUIRES_STAGE};
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::settings::Settings;
use layerpkg_common::types::ImageId;
use layerpkg_deps::extract::{DependencyExtractor, Sandbox};
use layerpkg_image::build::{BuildRequest, ImageBuilder};
use layerpkg_image::layer::LayerWalker;
use layerpkg_image::store::{ImageHandle, ImageStore};

use crate::assemble::{AssembledPackage, FileRecord, PackageSerializer, write_package};
use crate::context::BuildContext;
use crate::metadata::MetadataBuilder;

/// External collaborators used by the pipeline.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    /// Builds recipe stages.
    pub builder: &'a dyn ImageBuilder,
    /// Opens built images.
    pub store: &'a dyn ImageStore,
    /// Hosts the dependency scanner.
    pub sandbox: &'a dyn Sandbox,
    /// Writes the package format.
    pub serializer: &'a dyn PackageSerializer,
}

/// A package written by [`Pipeline::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPackage {
    /// Package name.
    pub name: String,
    /// Written file.
    pub path: PathBuf,
    /// Size of the written file in bytes.
    pub size: u64,
    /// Number of regular files shipped.
    pub files: usize,
    /// Number of automatically extracted relations.
    pub extracted: usize,
}

/// Runs every stage of one invocation.
pub struct Pipeline<'a> {
    context: BuildContext,
    config: Config,
    settings: Settings,
    backends: Backends<'a>,
    cancel: CancelToken,
}

impl<'a> Pipeline<'a> {
    /// Prepares a run for the package configuration in `context_dir`.
    #[must_use]
    pub fn new(
        config: Config,
        settings: Settings,
        context_dir: &Path,
        backends: Backends<'a>,
        cancel: CancelToken,
    ) -> Self {
        let context = BuildContext::new(&settings, context_dir, &config.main);
        Self {
            context,
            config,
            settings,
            backends,
            cancel,
        }
    }

    /// Runs all stages and writes one package per declared package.
    ///
    /// # Errors
    ///
    /// Returns the first failure, wrapped with the stage and package it
    /// occurred in.
    pub fn run(&self) -> Result<Vec<BuiltPackage>> {
        let name = &self.config.main.name;
        tracing::info!(
            package = %name,
            context = %self.context.context_dir.display(),
            recipe = %self.context.recipe.display(),
            dist = %self.context.dist_tag,
            "starting build"
        );
        std::fs::create_dir_all(&self.context.output_dir).map_err(|e| LayerpkgError::Io {
            path: self.context.output_dir.clone(),
            source: e,
        })?;

        let _ = self.stage(BUILDREQUIRES_STAGE, &format!("{name}-buildrequires"), true)?;
        let _ = self.stage(BUILD_STAGE, &format!("{name}-build"), false)?;

        let packages = self.config.packages();
        let mut built = Vec::with_capacity(packages.len());
        for package in &packages {
            let result = self
                .package(package)
                .map_err(|e| e.for_package(package.name.as_str()))?;
            built.push(result);
        }
        Ok(built)
    }

    fn stage(&self, target: &str, tag: &str, network: bool) -> Result<ImageId> {
        self.cancel.check().map_err(|e| e.in_stage(target))?;
        let request = BuildRequest {
            recipe: self.context.recipe.clone(),
            context_dir: self.context.context_dir.clone(),
            target: target.to_string(),
            tag: tag.to_string(),
            build_args: self.context.build_args.clone(),
            network,
        };
        tracing::info!(stage = target, tag, network, "running stage");
        self.backends
            .builder
            .build(&request, &self.cancel)
            .map_err(|e| e.in_stage(target))
    }

    fn package(&self, package: &PackageConfig) -> Result<BuiltPackage> {
        let id = self.stage(&package.name, &package.name, false)?;
        self.cancel.check()?;

        let image = self.backends.store.open(&id, &self.cancel)?;
        let metadata = MetadataBuilder::new(self.settings.compressor)
            .labels(image.labels(), image.created())?
            .config(package)
            .declared_relations(package)?;

        let (files, paths) = self.collect_layer(image.as_ref())?;
        tracing::info!(package = %package.name, files = files.len(), entries = paths.len(), "walked top layer");

        let extracted = DependencyExtractor::new(self.backends.sandbox, self.settings.scanner.clone())
            .extract(&id, &paths, &self.cancel)?;
        let file_count = files.len();
        let assembled = AssembledPackage {
            metadata: metadata.extracted_relations(&extracted).build(),
            files,
        };

        self.cancel.check()?;
        let path = write_package(self.backends.serializer, assembled, &self.context.output_dir)?;
        let size = std::fs::metadata(&path)
            .map_err(|e| LayerpkgError::Io {
                path: path.clone(),
                source: e,
            })?
            .len();

        Ok(BuiltPackage {
            name: package.name.clone(),
            path,
            size,
            files: file_count,
            extracted: extracted.len(),
        })
    }

    /// Returns the regular files of the top layer and every entry path.
    fn collect_layer(&self, image: &dyn ImageHandle) -> Result<(Vec<FileRecord>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut paths = Vec::new();
        LayerWalker::open(image)?.walk(|entry| {
            self.cancel.check()?;
            if entry.path != Path::new("/") {
                paths.push(entry.path.clone());
            }
            if let Some(record) = FileRecord::from_entry(entry) {
                files.push(record);
            }
            Ok(())
        })?;
        Ok((files, paths))
    }
}
