//! `layerpkg build`: build every package declared in a dist-git directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use layerpkg_common::cancel::CancelToken;
use layerpkg_common::config::{self, Config};
use layerpkg_common::constants::{DEFAULT_BUILDER, DEFAULT_RECIPE, DEFAULT_SCANNER, DEFAULT_SCANNER_ARGS};
use layerpkg_common::settings::{Compressor, ScannerSettings, Settings};
use layerpkg_package::assemble::RpmSerializer;
use layerpkg_package::pipeline::{Backends, BuiltPackage, Pipeline};
use layerpkg_runtime::buildah::Buildah;

use crate::output::format_bytes;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Dist-git directory: build context holding the recipe and the package
    /// configuration.
    #[arg(value_name = "DIST_GIT_DIR")]
    pub dist_git: PathBuf,

    /// Build recipe, relative to the dist-git directory.
    #[arg(short = 'f', long = "file", default_value = DEFAULT_RECIPE, env = "LAYERPKG_RECIPE")]
    pub recipe: PathBuf,

    /// Package configuration file name; defaults to the first `*.yaml`.
    #[arg(short = 'c', long, env = "LAYERPKG_CONFIG")]
    pub yaml_file: Option<String>,

    /// Distribution release to target (e.g. `f41`, `el9`).
    #[arg(short, long, default_value = "", env = "LAYERPKG_RELEASE")]
    pub release: String,

    /// Directory receiving the packages; defaults to the dist-git directory.
    #[arg(short, long, env = "LAYERPKG_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Image builder program.
    #[arg(long, default_value = DEFAULT_BUILDER, env = "LAYERPKG_BUILDER")]
    pub builder: String,

    /// Dependency scanner, as a path inside the built image.
    #[arg(long, default_value = DEFAULT_SCANNER, env = "LAYERPKG_SCANNER")]
    pub scanner: String,

    /// Argument passed to the scanner before the file list (repeatable).
    #[arg(long = "scanner-arg", allow_hyphen_values = true, default_values = DEFAULT_SCANNER_ARGS)]
    pub scanner_args: Vec<String>,

    /// Payload compressor: zstd, gzip or none.
    #[arg(long, default_value = "zstd", env = "LAYERPKG_COMPRESSOR")]
    pub compressor: Compressor,
}

impl BuildArgs {
    fn settings(&self) -> Settings {
        Settings {
            builder: self.builder.clone(),
            recipe: self.recipe.clone(),
            release: self.release.clone(),
            scanner: ScannerSettings {
                program: self.scanner.clone(),
                args: self.scanner_args.clone(),
                ..ScannerSettings::default()
            },
            compressor: self.compressor,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if configuration loading, any build stage, or any
/// package write fails.
pub fn execute(args: BuildArgs) -> anyhow::Result<()> {
    let context_dir = std::fs::canonicalize(&args.dist_git)
        .with_context(|| format!("dist-git directory {}", args.dist_git.display()))?;
    let config_path = config::discover(&context_dir, args.yaml_file.as_deref())?;
    let config = Config::load(&config_path)?;
    let settings = args.settings();
    let buildah = Buildah::locate(&settings.builder)?;

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, cancelling build");
        handler.cancel();
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let pipeline = Pipeline::new(
        config,
        settings,
        &context_dir,
        Backends {
            builder: &buildah,
            store: &buildah,
            sandbox: &buildah,
            serializer: &RpmSerializer,
        },
        cancel,
    );
    let built = pipeline.run()?;
    report(&built);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn report(built: &[BuiltPackage]) {
    for package in built {
        println!(
            "{}  {}  ({}, {} files, {} auto deps)",
            package.name,
            package.path.display(),
            format_bytes(package.size),
            package.files,
            package.extracted
        );
    }
}
