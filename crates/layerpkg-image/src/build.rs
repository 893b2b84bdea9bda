//! Image-builder seam.

use std::collections::BTreeMap;
use std::path::PathBuf;

use layerpkg_common::cancel::CancelToken;
use layerpkg_common::error::Result;
use layerpkg_common::types::ImageId;

/// One invocation of the image builder for a single recipe target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Build recipe (`Containerfile`).
    pub recipe: PathBuf,
    /// Build-context directory.
    pub context_dir: PathBuf,
    /// Recipe stage to build.
    pub target: String,
    /// Tag given to the resulting image.
    pub tag: String,
    /// `--build-arg` values.
    pub build_args: BTreeMap<String, String>,
    /// Whether the stage may reach the network.
    pub network: bool,
}

/// Builds images from a multi-stage recipe.
///
/// Implementors must not cache intermediate layers: the image of a
/// finalize stage has to carry all new content in one layer on top of its
/// base.
pub trait ImageBuilder {
    /// Builds `request.target` and returns the id of the resulting image.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder fails or `cancel` fires.
    fn build(&self, request: &BuildRequest, cancel: &CancelToken) -> Result<ImageId>;
}
