//! Automatic dependency extraction.
//!
//! The scanner runs inside a throwaway execution context created from the
//! freshly built image, so it sees the files at their installed paths with
//! the image's own libraries and interpreters. The context is removed when
//! the [`ScopedContainer`] guard drops, whether extraction succeeded or not.

use std::path::PathBuf;

use layerpkg_common::cancel::CancelToken;
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::settings::ScannerSettings;
use layerpkg_common::types::{ContainerId, ImageId};

use crate::scanner::{RelationSet, parse_scanner_output};

/// Upper bound on the bytes of file arguments passed to one scanner run.
pub const ARG_BATCH_BYTES: usize = 64 * 1024;

/// Creates, runs commands in, and removes execution contexts.
pub trait Sandbox {
    /// Creates an execution context from `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    fn create(&self, image: &ImageId, cancel: &CancelToken) -> Result<ContainerId>;

    /// Runs `argv` inside the context and returns its standard output.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::Command` on a non-zero exit and
    /// `LayerpkgError::Cancelled` if `cancel` fires first.
    fn run(
        &self,
        container: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>>;

    /// Removes the context. Runs even after cancellation.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    fn remove(&self, container: &ContainerId) -> Result<()>;
}

/// An execution context that is removed on drop.
pub struct ScopedContainer<'s> {
    sandbox: &'s dyn Sandbox,
    id: ContainerId,
}

impl<'s> ScopedContainer<'s> {
    /// Creates a context from `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sandbox cannot create it.
    pub fn create(sandbox: &'s dyn Sandbox, image: &ImageId, cancel: &CancelToken) -> Result<Self> {
        let id = sandbox.create(image, cancel)?;
        tracing::debug!(container = %id, image = %image, "created execution context");
        Ok(Self { sandbox, id })
    }

    /// Returns the context identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Runs a command in the context.
    ///
    /// # Errors
    ///
    /// Propagates the sandbox's error.
    pub fn run(
        &self,
        argv: &[String],
        env: &[(String, String)],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>> {
        self.sandbox.run(&self.id, argv, env, cancel)
    }
}

impl Drop for ScopedContainer<'_> {
    fn drop(&mut self) {
        match self.sandbox.remove(&self.id) {
            Ok(()) => tracing::debug!(container = %self.id, "removed execution context"),
            Err(e) => tracing::warn!(container = %self.id, error = %e, "failed to remove execution context"),
        }
    }
}

/// Runs the dependency scanner over the payload files of an image.
pub struct DependencyExtractor<'s> {
    sandbox: &'s dyn Sandbox,
    scanner: ScannerSettings,
}

impl<'s> DependencyExtractor<'s> {
    /// Creates an extractor that runs `scanner` through `sandbox`.
    #[must_use]
    pub const fn new(sandbox: &'s dyn Sandbox, scanner: ScannerSettings) -> Self {
        Self { sandbox, scanner }
    }

    /// Extracts the relations of `files`, absolute paths inside `image`.
    ///
    /// An empty file list yields an empty set without creating a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created, the scanner
    /// fails, or its output is not UTF-8 or contains a malformed relation.
    pub fn extract(
        &self,
        image: &ImageId,
        files: &[PathBuf],
        cancel: &CancelToken,
    ) -> Result<RelationSet> {
        if files.is_empty() {
            tracing::debug!(image = %image, "no payload files, skipping dependency scan");
            return Ok(RelationSet::default());
        }
        cancel.check()?;

        let container = ScopedContainer::create(self.sandbox, image, cancel)?;
        let env: Vec<(String, String)> = self.scanner.env.clone();

        let mut output = String::new();
        for batch in batches(files, ARG_BATCH_BYTES) {
            cancel.check()?;
            let mut argv = Vec::with_capacity(1 + self.scanner.args.len() + batch.len());
            argv.push(self.scanner.program.clone());
            argv.extend(self.scanner.args.iter().cloned());
            argv.extend(batch.iter().map(|p| p.display().to_string()));

            tracing::debug!(
                container = %container.id(),
                files = batch.len(),
                "running dependency scanner"
            );
            let stdout = container.run(&argv, &env, cancel)?;
            let text = String::from_utf8(stdout).map_err(|e| LayerpkgError::ScannerOutput {
                program: self.scanner.program.clone(),
                offset: output.len() + e.utf8_error().valid_up_to(),
            })?;
            output.push_str(&text);
            if !output.ends_with('\n') {
                output.push('\n');
            }
        }

        let relations = parse_scanner_output(&output)?;
        tracing::info!(image = %image, files = files.len(), relations = relations.len(), "extracted dependencies");
        Ok(relations)
    }
}

/// Splits `files` into runs whose joined argument length stays within
/// `limit` bytes. A single oversized path gets a batch of its own.
fn batches(files: &[PathBuf], limit: usize) -> Vec<&[PathBuf]> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, path) in files.iter().enumerate() {
        let len = path.as_os_str().len() + 1;
        if i > start && used + len > limit {
            out.push(&files[start..i]);
            start = i;
            used = 0;
        }
        used += len;
    }
    if start < files.len() {
        out.push(&files[start..]);
    }
    out
}
