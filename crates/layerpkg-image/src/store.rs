//! Image-store seam.
//!
//! An [`ImageStore`] resolves an image id into an [`ImageHandle`] that
//! exposes labels, creation time and the ordered layer blobs.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use layerpkg_common::cancel::CancelToken;
use layerpkg_common::error::Result;
use layerpkg_common::types::{Digest, ImageId};

/// Reference to one layer blob of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerRef {
    /// Content digest of the (possibly compressed) blob.
    pub digest: Digest,
    /// Media type declared by the manifest.
    pub media_type: String,
    /// Blob size in bytes.
    pub size: u64,
}

/// An inspectable image.
pub trait ImageHandle {
    /// Identifier this handle was opened from.
    fn id(&self) -> &ImageId;

    /// Image labels.
    fn labels(&self) -> &BTreeMap<String, String>;

    /// Image creation time, if recorded.
    fn created(&self) -> Option<DateTime<Utc>>;

    /// Layers ordered from the root layer to the topmost layer.
    fn layers(&self) -> &[LayerRef];

    /// Opens the raw (still compressed) blob of `layer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is missing or fails verification.
    fn open_blob(&self, layer: &LayerRef) -> Result<Box<dyn Read + '_>>;
}

/// Resolves image ids to handles.
pub trait ImageStore {
    /// Opens the image identified by `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be resolved or `cancel` fires.
    fn open(&self, id: &ImageId, cancel: &CancelToken) -> Result<Box<dyn ImageHandle>>;
}
