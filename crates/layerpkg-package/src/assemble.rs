//! Package assembly and serialization.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use layerpkg_common::constants::PACKAGE_EXTENSION;
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::settings::Compressor;
use layerpkg_deps::relation::{Comparator, Relation, RelationKind};
use layerpkg_image::layer::LayerEntry;

use crate::metadata::PackageMetadata;

/// A regular file shipped in the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute install path.
    pub path: PathBuf,
    /// Permission bits.
    pub mode: u32,
    /// Owning user name.
    pub user: String,
    /// Owning group name.
    pub group: String,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    /// File content.
    pub content: Vec<u8>,
}

impl FileRecord {
    /// Converts a regular layer entry. Other kinds yield `None`.
    #[must_use]
    pub fn from_entry(entry: LayerEntry) -> Option<Self> {
        if !entry.kind.is_regular() {
            return None;
        }
        Some(Self {
            path: entry.path,
            mode: entry.mode & 0o7777,
            user: entry.user,
            group: entry.group,
            mtime: entry.mtime,
            content: entry.content.unwrap_or_default(),
        })
    }
}

/// Everything a serializer needs to write one package.
#[derive(Debug, Clone)]
pub struct AssembledPackage {
    /// Final metadata, relations included.
    pub metadata: PackageMetadata,
    /// Regular files in layer order.
    pub files: Vec<FileRecord>,
}

/// Writes an assembled package in a binary package format.
///
/// The package is taken by value so file contents can move into the
/// format's payload instead of being copied.
pub trait PackageSerializer {
    /// File extension of the format, without the dot.
    fn extension(&self) -> &'static str;

    /// Serializes `package` to `out`.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::Serializer` if the package is rejected and
    /// `LayerpkgError::Io` if writing fails.
    fn write(&self, package: AssembledPackage, out: &mut dyn Write) -> Result<()>;
}

/// Returns the single timestamp stamped on the package and all of its files.
///
/// The RPM writer cannot record a modification time per file. The image
/// creation time is used, clamped to the newest file mtime so no file claims
/// to be newer than its content. Without a creation time the newest mtime
/// is used; without either the writer falls back to its own clock.
#[must_use]
pub fn payload_timestamp(build_time: Option<DateTime<Utc>>, files: &[FileRecord]) -> Option<i64> {
    let newest = files
        .iter()
        .filter_map(|file| i64::try_from(file.mtime).ok())
        .max();
    match (build_time.map(|t| t.timestamp()), newest) {
        (Some(built), Some(newest)) => Some(built.min(newest)),
        (built, newest) => built.or(newest),
    }
}

/// Writes RPM packages with the `rpm` crate.
///
/// Per-file mtimes collapse into one timestamp, see [`payload_timestamp`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmSerializer;

impl RpmSerializer {
    fn build(package: AssembledPackage) -> Result<rpm::Package> {
        let AssembledPackage {
            metadata: meta,
            files,
        } = package;
        for (field, value) in [("name", &meta.name), ("version", &meta.version)] {
            if value.is_empty() {
                return Err(LayerpkgError::Serializer {
                    message: format!("package {field} is empty"),
                });
            }
        }

        let mut builder =
            rpm::PackageBuilder::new(&meta.name, &meta.version, &meta.license, &meta.arch, &meta.summary)
                .using_config(rpm::BuildConfig::default().compression(compression(meta.compressor)))
                .epoch(meta.epoch)
                .description(&meta.description);
        if !meta.release.is_empty() {
            builder = builder.release(&meta.release);
        }
        if !meta.url.is_empty() {
            builder = builder.url(&meta.url);
        }
        if !meta.vendor.is_empty() {
            builder = builder.vendor(&meta.vendor);
        }
        if !meta.packager.is_empty() {
            builder = builder.packager(&meta.packager);
        }
        if !meta.group.is_empty() {
            builder = builder.group(&meta.group);
        }
        if let Some(time) = payload_timestamp(meta.build_time, &files) {
            let seconds = u32::try_from(time).map_err(|_| LayerpkgError::Serializer {
                message: format!("timestamp {time} does not fit an RPM timestamp"),
            })?;
            builder = builder.source_date(seconds);
        }

        for file in files {
            let mode = u16::try_from(file.mode & 0o7777).unwrap_or(0o644);
            let mut options =
                rpm::FileOptions::new(file.path.display().to_string()).mode(rpm::FileMode::regular(mode));
            if !file.user.is_empty() {
                options = options.user(&file.user);
            }
            if !file.group.is_empty() {
                options = options.group(&file.group);
            }
            builder = builder
                .with_file_contents(file.content, options)
                .map_err(serializer_error)?;
        }

        for kind in RelationKind::ALL {
            for relation in meta.relations(kind) {
                let dependency = dependency(relation);
                builder = match kind {
                    RelationKind::Requires => builder.requires(dependency),
                    RelationKind::Provides => builder.provides(dependency),
                    RelationKind::Conflicts => builder.conflicts(dependency),
                    RelationKind::Obsoletes => builder.obsoletes(dependency),
                    RelationKind::Recommends => builder.recommends(dependency),
                    RelationKind::Suggests => builder.suggests(dependency),
                };
            }
        }

        builder.build().map_err(serializer_error)
    }
}

impl PackageSerializer for RpmSerializer {
    fn extension(&self) -> &'static str {
        PACKAGE_EXTENSION
    }

    fn write(&self, package: AssembledPackage, mut out: &mut dyn Write) -> Result<()> {
        let rpm = Self::build(package)?;
        rpm.write(&mut out).map_err(serializer_error)
    }
}

const fn compression(compressor: Compressor) -> rpm::CompressionType {
    match compressor {
        Compressor::Zstd => rpm::CompressionType::Zstd,
        Compressor::Gzip => rpm::CompressionType::Gzip,
        Compressor::None => rpm::CompressionType::None,
    }
}

fn dependency(relation: &Relation) -> rpm::Dependency {
    let name = relation.name.as_str();
    match &relation.constraint {
        None => rpm::Dependency::any(name),
        Some((Comparator::Less, v)) => rpm::Dependency::less(name, v.as_str()),
        Some((Comparator::LessEq, v)) => rpm::Dependency::less_eq(name, v.as_str()),
        Some((Comparator::Equal, v)) => rpm::Dependency::eq(name, v.as_str()),
        Some((Comparator::GreaterEq, v)) => rpm::Dependency::greater_eq(name, v.as_str()),
        Some((Comparator::Greater, v)) => rpm::Dependency::greater(name, v.as_str()),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn serializer_error(e: rpm::Error) -> LayerpkgError {
    LayerpkgError::Serializer {
        message: e.to_string(),
    }
}

/// Serializes `package` to `<dir>/<name>.<ext>`.
///
/// The package is written to a temporary file in `dir` and renamed into
/// place only after the serializer succeeds, so a failed or cancelled write
/// leaves no file at the final path.
///
/// # Errors
///
/// Returns the serializer's error, or `LayerpkgError::Io` if the file cannot
/// be created or renamed.
pub fn write_package(
    serializer: &dyn PackageSerializer,
    package: AssembledPackage,
    dir: &Path,
) -> Result<PathBuf> {
    let name = package.metadata.name.clone();
    let files = package.files.len();
    let path = dir.join(format!("{name}.{}", serializer.extension()));
    let io_err = |source| LayerpkgError::Io {
        path: path.clone(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".layerpkg-")
        .tempfile_in(dir)
        .map_err(|e| LayerpkgError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    {
        let mut out = std::io::BufWriter::new(tmp.as_file_mut());
        serializer.write(package, &mut out)?;
        out.flush().map_err(io_err)?;
    }
    let _ = tmp.persist(&path).map_err(|e| io_err(e.error))?;

    tracing::info!(package = %name, path = %path.display(), files, "package written");
    Ok(path)
}
