//! # layerpkg-package
//!
//! Turns the top layer of a built image into a binary package.
//!
//! - [`metadata`]: merges defaults, image labels, configuration and
//!   extracted relations into one [`metadata::PackageMetadata`].
//! - [`assemble`]: file records, the serializer seam, and the RPM writer.
//! - [`context`]: per-invocation build state.
//! - [`pipeline`]: runs the build stages and produces one package per
//!   declared package.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod assemble;
pub mod context;
pub mod metadata;
pub mod pipeline;
