//! # layerpkg-image
//!
//! Container image access for layerpkg.
//!
//! Handles:
//! - **Build**: the image-builder seam used by the stage orchestrator.
//! - **Store**: the image-store seam that resolves ids to inspectable images.
//! - **OCI**: reading an OCI image layout directory.
//! - **Hashing**: SHA-256 blob verification.
//! - **Compression**: magic-byte detection and streaming decompression.
//! - **Layer**: lazy traversal of an image's top layer.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod build;
pub mod compression;
pub mod hash;
pub mod layer;
pub mod oci;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;
