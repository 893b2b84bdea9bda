//! Test fixtures: tar archives and OCI layouts built on the fly.

use std::io::Write;
use std::path::Path;

use layerpkg_common::types::Digest;
use sha2::{Digest as _, Sha256};

/// Builds an uncompressed tar archive of regular files.
pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder
            .append_data(&mut header, path, *data)
            .expect("append file");
    }
    builder.into_inner().expect("finish tar")
}

/// Gzip-compresses `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Zstd-compresses `data`.
pub fn zstd(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, 3).expect("zstd encode")
}

/// Digests of the blobs written by [`LayoutBuilder::write`].
pub struct WrittenLayout {
    /// Layer digests, root first.
    pub layers: Vec<Digest>,
}

/// Writes a minimal OCI image layout.
#[derive(Default)]
pub struct LayoutBuilder {
    labels: Vec<(String, String)>,
    created: Option<String>,
    layers: Vec<Vec<u8>>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn created(mut self, created: &str) -> Self {
        self.created = Some(created.into());
        self
    }

    pub fn layer(mut self, blob: Vec<u8>) -> Self {
        self.layers.push(blob);
        self
    }

    pub fn write(self, root: &Path) -> WrittenLayout {
        let labels: serde_json::Map<String, serde_json::Value> = self
            .labels
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        let mut config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": labels },
            "rootfs": { "type": "layers", "diff_ids": [] },
        });
        if let Some(created) = self.created {
            config["created"] = serde_json::Value::String(created);
        }

        let mut layer_digests = Vec::new();
        let mut layer_descriptors = Vec::new();
        for blob in &self.layers {
            let digest = write_blob(root, blob);
            layer_descriptors.push(serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": digest.to_string(),
                "size": blob.len(),
            }));
            layer_digests.push(digest);
        }

        let config_bytes = serde_json::to_vec(&config).expect("config json");
        let config_digest = write_blob(root, &config_bytes);
        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest.to_string(),
                "size": config_bytes.len(),
            },
            "layers": layer_descriptors,
        });
        let manifest_bytes = serde_json::to_vec(&manifest).expect("manifest json");
        let manifest_digest = write_blob(root, &manifest_bytes);

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest.to_string(),
                "size": manifest_bytes.len(),
            }],
        });
        std::fs::write(root.join("oci-layout"), br#"{"imageLayoutVersion":"1.0.0"}"#)
            .expect("oci-layout");
        std::fs::write(
            root.join("index.json"),
            serde_json::to_vec(&index).expect("index json"),
        )
        .expect("index");

        WrittenLayout {
            layers: layer_digests,
        }
    }
}

fn write_blob(root: &Path, data: &[u8]) -> Digest {
    let digest = Digest::sha256(&format!("{:x}", Sha256::digest(data))).expect("digest");
    let dir = root.join("blobs").join("sha256");
    std::fs::create_dir_all(&dir).expect("blob dir");
    std::fs::write(dir.join(digest.hex()), data).expect("blob");
    digest
}
