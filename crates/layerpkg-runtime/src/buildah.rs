//! `buildah` backend.
//!
//! | Seam | Invocation |
//! |------|------------|
//! | [`ImageBuilder`] | `buildah build --layers=false --iidfile F -f RECIPE --target T -t TAG [--network none] [--build-arg K=V]... CONTEXT` |
//! | [`ImageStore`] | `buildah push ID oci:DIR`, then read the OCI layout in `DIR` |
//! | [`Sandbox`] | `buildah from --pull=never --name N ID`, `buildah run [--env K=V]... N -- ARGV`, `buildah rm N` |

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use layerpkg_common::cancel::CancelToken;
use layerpkg_common::constants::APP_NAME;
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::types::{ContainerId, ImageId};
use layerpkg_deps::extract::Sandbox;
use layerpkg_image::build::{BuildRequest, ImageBuilder};
use layerpkg_image::oci::OciImage;
use layerpkg_image::store::{ImageHandle, ImageStore, LayerRef};
use tempfile::TempDir;

use crate::process::run_command;

/// Drives a `buildah` executable.
#[derive(Debug, Clone)]
pub struct Buildah {
    program: String,
}

impl Buildah {
    /// Uses `program` without checking that it exists.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves `program` on `PATH` (or as a path) and uses the result.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::NotFound` if the program cannot be found.
    pub fn locate(program: &str) -> Result<Self> {
        let path = which::which(program).map_err(|_| LayerpkgError::NotFound {
            kind: "image builder",
            id: program.to_string(),
        })?;
        tracing::debug!(program, path = %path.display(), "located image builder");
        Ok(Self::new(path.display().to_string()))
    }

    /// Returns the program this backend invokes.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn invoke(&self, args: &[String], cancel: &CancelToken) -> Result<Vec<u8>> {
        Ok(run_command(&self.program, args, &[], None, cancel)?.stdout)
    }
}

impl ImageBuilder for Buildah {
    fn build(&self, request: &BuildRequest, cancel: &CancelToken) -> Result<ImageId> {
        let scratch = scratch_dir()?;
        let iidfile = scratch.path().join("iid");
        tracing::info!(stage = %request.target, tag = %request.tag, network = request.network, "building stage");

        let _ = self.invoke(&build_argv(request, &iidfile), cancel)?;

        let id = std::fs::read_to_string(&iidfile).map_err(|e| LayerpkgError::Io {
            path: iidfile.clone(),
            source: e,
        })?;
        let id = id.trim();
        if id.is_empty() {
            return Err(LayerpkgError::NotFound {
                kind: "image id",
                id: iidfile.display().to_string(),
            });
        }
        tracing::debug!(stage = %request.target, image = id, "stage built");
        Ok(ImageId::new(id))
    }
}

impl ImageStore for Buildah {
    fn open(&self, id: &ImageId, cancel: &CancelToken) -> Result<Box<dyn ImageHandle>> {
        let dir = scratch_dir()?;
        let _ = self.invoke(&push_argv(id, dir.path()), cancel)?;
        let image = OciImage::open(id.clone(), dir.path())?;
        Ok(Box::new(ExportedImage { image, _dir: dir }))
    }
}

impl Sandbox for Buildah {
    fn create(&self, image: &ImageId, cancel: &CancelToken) -> Result<ContainerId> {
        let name = ContainerId::generate(APP_NAME);
        let _ = self.invoke(&from_argv(&name, image), cancel)?;
        Ok(name)
    }

    fn run(
        &self,
        container: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        self.invoke(&run_argv(container, argv, env), cancel)
    }

    fn remove(&self, container: &ContainerId) -> Result<()> {
        let _ = self.invoke(&rm_argv(container), &CancelToken::new())?;
        Ok(())
    }
}

/// An image exported to a temporary OCI layout, deleted on drop.
struct ExportedImage {
    image: OciImage,
    _dir: TempDir,
}

impl ImageHandle for ExportedImage {
    fn id(&self) -> &ImageId {
        self.image.id()
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        self.image.labels()
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.image.created()
    }

    fn layers(&self) -> &[LayerRef] {
        self.image.layers()
    }

    fn open_blob(&self, layer: &LayerRef) -> Result<Box<dyn Read + '_>> {
        self.image.open_blob(layer)
    }
}

fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(APP_NAME)
        .tempdir()
        .map_err(|e| LayerpkgError::Io {
            path: std::env::temp_dir(),
            source: e,
        })
}

fn build_argv(request: &BuildRequest, iidfile: &Path) -> Vec<String> {
    let mut argv = vec![
        "build".to_string(),
        "--layers=false".to_string(),
        "--iidfile".to_string(),
        iidfile.display().to_string(),
        "-f".to_string(),
        request.recipe.display().to_string(),
        "--target".to_string(),
        request.target.clone(),
        "-t".to_string(),
        request.tag.clone(),
    ];
    if !request.network {
        argv.extend(["--network".to_string(), "none".to_string()]);
    }
    for (key, value) in &request.build_args {
        argv.push("--build-arg".to_string());
        argv.push(format!("{key}={value}"));
    }
    argv.push(request.context_dir.display().to_string());
    argv
}

fn push_argv(image: &ImageId, dest: &Path) -> Vec<String> {
    vec![
        "push".to_string(),
        "--quiet".to_string(),
        image.to_string(),
        format!("oci:{}", dest.display()),
    ]
}

fn from_argv(name: &ContainerId, image: &ImageId) -> Vec<String> {
    vec![
        "from".to_string(),
        "--pull=never".to_string(),
        "--name".to_string(),
        name.to_string(),
        image.to_string(),
    ]
}

fn run_argv(container: &ContainerId, argv: &[String], env: &[(String, String)]) -> Vec<String> {
    let mut out = vec!["run".to_string()];
    for (key, value) in env {
        out.push("--env".to_string());
        out.push(format!("{key}={value}"));
    }
    out.push(container.to_string());
    out.push("--".to_string());
    out.extend(argv.iter().cloned());
    out
}

fn rm_argv(container: &ContainerId) -> Vec<String> {
    vec!["rm".to_string(), container.to_string()]
}
