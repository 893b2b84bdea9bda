//! OCI image layout reader.
//!
//! Reads `index.json`, the image manifest and the image configuration of an
//! [OCI image layout] directory and serves layer blobs from `blobs/`.
//!
//! [OCI image layout]: https://github.com/opencontainers/image-spec/blob/main/image-layout.md

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::types::{Digest, ImageId};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::store::{ImageHandle, LayerRef};

/// A content descriptor as found in indexes and manifests.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: Digest,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct Index {
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageConfig {
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    config: RuntimeConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

/// An image read from an OCI image layout directory.
#[derive(Debug)]
pub struct OciImage {
    id: ImageId,
    root: PathBuf,
    labels: BTreeMap<String, String>,
    created: Option<DateTime<Utc>>,
    layers: Vec<LayerRef>,
}

impl OciImage {
    /// Opens the first manifest listed in the layout's `index.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index, manifest or configuration is missing,
    /// fails digest verification, or does not parse.
    pub fn open(id: ImageId, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::debug!(image = %id, path = %root.display(), "opening OCI layout");

        let index: Index = read_json(&root.join("index.json"))?;
        let manifest_ref = index.manifests.first().ok_or_else(|| LayerpkgError::NotFound {
            kind: "manifest",
            id: root.join("index.json").display().to_string(),
        })?;
        let manifest: Manifest = read_blob_json(&root, &manifest_ref.digest)?;
        let config: ImageConfig = read_blob_json(&root, &manifest.config.digest)?;

        let layers = manifest
            .layers
            .into_iter()
            .map(|d| LayerRef {
                digest: d.digest,
                media_type: d.media_type,
                size: d.size,
            })
            .collect::<Vec<_>>();
        tracing::debug!(
            image = %id,
            manifest = %manifest_ref.digest,
            media_type = %manifest_ref.media_type,
            size = manifest_ref.size,
            layers = layers.len(),
            "read image manifest"
        );

        Ok(Self {
            id,
            root,
            labels: config.config.labels.unwrap_or_default(),
            created: config.created,
            layers,
        })
    }

    /// Returns the layout directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ImageHandle for OciImage {
    fn id(&self) -> &ImageId {
        &self.id
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    fn layers(&self) -> &[LayerRef] {
        &self.layers
    }

    fn open_blob(&self, layer: &LayerRef) -> Result<Box<dyn Read + '_>> {
        let path = verified_blob_path(&self.root, &layer.digest)?;
        let file = std::fs::File::open(&path).map_err(|e| LayerpkgError::Io { path, source: e })?;
        Ok(Box::new(file))
    }
}

/// Returns the path of a blob after checking it matches its digest.
fn verified_blob_path(root: &Path, digest: &Digest) -> Result<PathBuf> {
    let path = root.join("blobs").join(digest.algorithm()).join(digest.hex());
    if !path.is_file() {
        return Err(LayerpkgError::NotFound {
            kind: "blob",
            id: digest.to_string(),
        });
    }
    crate::hash::validate_hash(&path, digest)?;
    Ok(path)
}

fn read_blob_json<T: DeserializeOwned>(root: &Path, digest: &Digest) -> Result<T> {
    read_json(&verified_blob_path(root, digest)?)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| LayerpkgError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(serde_json::from_slice(&content)?)
}
