//! Container-tool backend for layerpkg.
//!
//! [`buildah::Buildah`] implements the image-builder, image-store and
//! sandbox seams by shelling out to the `buildah` command through the
//! cancellable runner in [`process`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod buildah;
pub mod process;
