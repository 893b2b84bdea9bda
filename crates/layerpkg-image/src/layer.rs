//! Top-layer traversal.
//!
//! A finalize build stage adds all of its content as one layer on top of its
//! base image, so the package payload is exactly the image's topmost layer.
//! [`LayerWalker`] fetches that blob, decompresses it and yields one
//! [`LayerEntry`] per archive record, lazily and at most once.

use std::borrow::Cow;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use layerpkg_common::constants::{MAX_IMAGE_LAYERS, WHITEOUT_PREFIX};
use layerpkg_common::error::{LayerpkgError, Result};
use tar::EntryType;

use crate::store::{ImageHandle, LayerRef};

/// Kind of filesystem node in a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file with content.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to another entry of the layer.
    Hardlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
}

impl EntryKind {
    /// Maps a tar record type to an entry kind.
    ///
    /// Returns `None` for record types that are not filesystem nodes
    /// (global headers, sparse or vendor extensions).
    #[must_use]
    pub fn from_tar(entry_type: EntryType) -> Option<Self> {
        match entry_type {
            EntryType::Regular | EntryType::Continuous => Some(Self::File),
            EntryType::Directory => Some(Self::Directory),
            EntryType::Symlink => Some(Self::Symlink),
            EntryType::Link => Some(Self::Hardlink),
            EntryType::Char => Some(Self::CharDevice),
            EntryType::Block => Some(Self::BlockDevice),
            EntryType::Fifo => Some(Self::Fifo),
            _ => None,
        }
    }

    /// Returns `true` for regular files.
    #[must_use]
    pub const fn is_regular(self) -> bool {
        matches!(self, Self::File)
    }
}

/// One filesystem node of the top layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    /// Absolute path, normalized against the image root.
    pub path: PathBuf,
    /// Node kind.
    pub kind: EntryKind,
    /// Permission bits.
    pub mode: u32,
    /// Owning user name.
    pub user: String,
    /// Owning group name.
    pub group: String,
    /// Modification time in seconds since the epoch.
    pub mtime: u64,
    /// Link target for symlinks and hard links.
    pub link_target: Option<PathBuf>,
    /// File content; present only for regular files.
    pub content: Option<Vec<u8>>,
}

/// Returns the topmost layer of `image`.
///
/// # Errors
///
/// Returns `LayerpkgError::LayerCount` if the image has no layers or more
/// than [`MAX_IMAGE_LAYERS`].
pub fn top_layer(image: &dyn ImageHandle) -> Result<&LayerRef> {
    let layers = image.layers();
    match layers.last() {
        Some(layer) if layers.len() <= MAX_IMAGE_LAYERS => Ok(layer),
        _ => Err(LayerpkgError::LayerCount {
            image: image.id().to_string(),
            count: layers.len(),
            max: MAX_IMAGE_LAYERS,
        }),
    }
}

/// Anchors an archive path at `/` and resolves `.` and `..` lexically.
#[must_use]
pub fn normalize_path(raw: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in raw.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                let _ = out.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn is_whiteout(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(WHITEOUT_PREFIX))
}

/// Streams the entries of an image's top layer.
pub struct LayerWalker<'a> {
    layer: String,
    archive: tar::Archive<Box<dyn Read + 'a>>,
}

impl<'a> LayerWalker<'a> {
    /// Selects the top layer of `image`, fetches its blob and prepares the
    /// decompressed archive stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer count is invalid, the blob cannot be
    /// fetched, or its compression is unsupported.
    pub fn open(image: &'a dyn ImageHandle) -> Result<Self> {
        let layer = top_layer(image)?;
        tracing::info!(
            image = %image.id(),
            layer = %layer.digest,
            size = layer.size,
            "walking top layer"
        );
        let label = layer.digest.to_string();
        let blob = image.open_blob(layer)?;
        let stream = crate::compression::auto_decompress(blob, &label)?;
        Ok(Self {
            layer: label,
            archive: tar::Archive::new(stream),
        })
    }

    /// Returns the entry sequence. The underlying stream is consumed, so the
    /// sequence can be iterated only once.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::Archive` if the archive cannot be started.
    pub fn entries(&mut self) -> Result<LayerEntries<'_, 'a>> {
        let layer = self.layer.as_str();
        let inner = self.archive.entries().map_err(|e| LayerpkgError::Archive {
            layer: layer.to_string(),
            source: e,
        })?;
        Ok(LayerEntries {
            layer,
            inner,
            finished: false,
        })
    }

    /// Invokes `visit` for every entry, stopping at the first error from
    /// either the archive or the visitor.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or visitor error.
    pub fn walk<F>(mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(LayerEntry) -> Result<()>,
    {
        for entry in self.entries()? {
            visit(entry?)?;
        }
        Ok(())
    }
}

/// Lazy, finite sequence of [`LayerEntry`] values.
///
/// After the first error the sequence ends.
pub struct LayerEntries<'w, 'a> {
    layer: &'w str,
    inner: tar::Entries<'w, Box<dyn Read + 'a>>,
    finished: bool,
}

impl LayerEntries<'_, '_> {
    fn archive_err(&self, source: std::io::Error) -> LayerpkgError {
        LayerpkgError::Archive {
            layer: self.layer.to_string(),
            source,
        }
    }
}

impl Iterator for LayerEntries<'_, '_> {
    type Item = Result<LayerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let next = match self.inner.next()? {
                Ok(entry) => read_entry(entry).map_err(|e| self.archive_err(e)),
                Err(e) => Err(self.archive_err(e)),
            };
            match next {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Converts one archive record, or returns `None` for records that are not
/// reported (whiteouts and non-filesystem record types).
fn read_entry<R: Read>(mut entry: tar::Entry<'_, R>) -> std::io::Result<Option<LayerEntry>> {
    let path = normalize_path(&entry.path()?);
    let entry_type = entry.header().entry_type();

    let Some(kind) = EntryKind::from_tar(entry_type) else {
        tracing::debug!(path = %path.display(), ?entry_type, "skipping non-filesystem record");
        return Ok(None);
    };
    if is_whiteout(&path) {
        tracing::debug!(path = %path.display(), "skipping whiteout");
        return Ok(None);
    }

    let header = entry.header();
    let mode = header.mode()?;
    let mtime = header.mtime()?;
    let user = owner_name(&path, "user", header.username_bytes());
    let group = owner_name(&path, "group", header.groupname_bytes());
    let link_target = entry.link_name()?.map(|target| target.into_owned());

    let content = if kind.is_regular() {
        let mut body = Vec::new();
        let _ = entry.read_to_end(&mut body)?;
        Some(body)
    } else {
        None
    };

    tracing::debug!(path = %path.display(), ?kind, mode, "layer entry");
    Ok(Some(LayerEntry {
        path,
        kind,
        mode,
        user,
        group,
        mtime,
        link_target,
        content,
    }))
}

/// Decodes a tar owner name. Invalid UTF-8 is replaced, not dropped, so the
/// file keeps a recognisable owner.
fn owner_name(path: &Path, field: &'static str, raw: Option<&[u8]>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let name = String::from_utf8_lossy(raw);
    if matches!(name, Cow::Owned(_)) {
        tracing::warn!(path = %path.display(), field, owner = %name, "owner name is not UTF-8");
    }
    name.into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, Utc};
    use layerpkg_common::types::{Digest, ImageId};

    use super::*;
    use crate::fixtures::{LayoutBuilder, gzip, tar_bytes, zstd};
    use crate::oci::OciImage;

    fn open_layout(dir: &Path, builder: LayoutBuilder) -> OciImage {
        let _ = builder.write(dir);
        OciImage::open(ImageId::new("test"), dir).expect("open layout")
    }

    fn collect(image: &dyn ImageHandle) -> Vec<LayerEntry> {
        let mut walker = LayerWalker::open(image).expect("open walker");
        walker
            .entries()
            .expect("entries")
            .collect::<Result<Vec<_>>>()
            .expect("walk")
    }

    fn paths(entries: &[LayerEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| e.path.display().to_string())
            .collect()
    }

    fn mixed_archive() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        dir.set_username("root").expect("uname");
        dir.set_groupname("root").expect("gname");
        dir.set_cksum();
        builder
            .append_data(&mut dir, "./usr/bin/", std::io::empty())
            .expect("dir");

        let body = b"\x7fELF fake";
        let mut file = tar::Header::new_gnu();
        file.set_entry_type(EntryType::Regular);
        file.set_size(body.len() as u64);
        file.set_mode(0o755);
        file.set_mtime(1_700_000_123);
        file.set_username("root").expect("uname");
        file.set_groupname("wheel").expect("gname");
        file.set_cksum();
        builder
            .append_data(&mut file, "./usr/bin/hello", &body[..])
            .expect("file");

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        link.set_cksum();
        builder
            .append_link(&mut link, "usr/bin/hi", "hello")
            .expect("symlink");

        let mut fifo = tar::Header::new_gnu();
        fifo.set_entry_type(EntryType::Fifo);
        fifo.set_size(0);
        fifo.set_mode(0o600);
        fifo.set_cksum();
        builder
            .append_data(&mut fifo, "run/hello.fifo", std::io::empty())
            .expect("fifo");

        let mut whiteout = tar::Header::new_gnu();
        whiteout.set_size(0);
        whiteout.set_mode(0o644);
        whiteout.set_cksum();
        builder
            .append_data(&mut whiteout, "etc/.wh.removed.conf", std::io::empty())
            .expect("whiteout");

        builder.into_inner().expect("finish")
    }

    #[test]
    fn two_layer_image_walks_only_the_top_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(
            dir.path(),
            LayoutBuilder::new()
                .layer(gzip(&tar_bytes(&[("etc/base.conf", b"base".as_slice())])))
                .layer(gzip(&tar_bytes(&[("usr/bin/hello", b"hi".as_slice())]))),
        );

        let entries = collect(&image);
        assert_eq!(paths(&entries), vec!["/usr/bin/hello"]);
        assert_eq!(entries[0].content.as_deref(), Some(b"hi".as_slice()));
    }

    #[test]
    fn single_layer_image_walks_that_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(
            dir.path(),
            LayoutBuilder::new().layer(tar_bytes(&[("only", b"1".as_slice())])),
        );
        assert_eq!(paths(&collect(&image)), vec!["/only"]);
    }

    #[test]
    fn zero_layer_image_fails_with_layer_count_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(dir.path(), LayoutBuilder::new());
        assert!(matches!(
            LayerWalker::open(&image),
            Err(LayerpkgError::LayerCount { count: 0, .. })
        ));
    }

    #[test]
    fn entries_report_kinds_metadata_and_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(dir.path(), LayoutBuilder::new().layer(zstd(&mixed_archive())));
        let entries = collect(&image);

        assert_eq!(
            paths(&entries),
            vec!["/usr/bin", "/usr/bin/hello", "/usr/bin/hi", "/run/hello.fifo"]
        );

        let dir_entry = &entries[0];
        assert_eq!(dir_entry.kind, EntryKind::Directory);
        assert!(dir_entry.content.is_none());

        let file = &entries[1];
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.mode, 0o755);
        assert_eq!(file.mtime, 1_700_000_123);
        assert_eq!(file.user, "root");
        assert_eq!(file.group, "wheel");
        assert_eq!(file.content.as_deref(), Some(b"\x7fELF fake".as_slice()));

        let link = &entries[2];
        assert_eq!(link.kind, EntryKind::Symlink);
        assert_eq!(link.link_target, Some(PathBuf::from("hello")));
        assert!(link.content.is_none());

        assert_eq!(entries[3].kind, EntryKind::Fifo);
        assert!(entries[3].content.is_none());
    }

    #[test]
    fn non_utf8_owner_is_kept_lossily() {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(1);
        header.set_mode(0o644);
        let gnu = header.as_gnu_mut().expect("gnu header");
        gnu.uname[..3].copy_from_slice(b"b\xffn");
        gnu.gname[..5].copy_from_slice(b"staff");
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_data(&mut header, "etc/owned", &b"x"[..])
            .expect("append");
        let archive = builder.into_inner().expect("finish");

        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(dir.path(), LayoutBuilder::new().layer(archive));
        let entries = collect(&image);

        assert_eq!(entries[0].user, "b\u{fffd}n");
        assert_eq!(entries[0].group, "staff");
    }

    #[test]
    fn walk_stops_at_first_visitor_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = open_layout(
            dir.path(),
            LayoutBuilder::new().layer(tar_bytes(&[
                ("a", b"a".as_slice()),
                ("b", b"b".as_slice()),
                ("c", b"c".as_slice()),
            ])),
        );

        let mut seen = Vec::new();
        let result = LayerWalker::open(&image).expect("open").walk(|entry| {
            seen.push(entry.path.clone());
            if entry.path == Path::new("/b") {
                return Err(LayerpkgError::Config {
                    message: "stop".into(),
                });
            }
            Ok(())
        });

        assert!(matches!(result, Err(LayerpkgError::Config { .. })));
        assert_eq!(seen, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn corrupt_header_ends_sequence_after_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut archive = tar_bytes(&[("big", vec![7u8; 4096].as_slice())]);
        // breaks the header checksum
        archive[0] ^= 0xff;
        let image = open_layout(dir.path(), LayoutBuilder::new().layer(archive));

        let mut walker = LayerWalker::open(&image).expect("open");
        let mut entries = walker.entries().expect("entries");
        assert!(matches!(entries.next(), Some(Err(LayerpkgError::Archive { .. }))));
        assert!(entries.next().is_none());
    }

    #[test]
    fn normalize_path_anchors_and_resolves() {
        assert_eq!(normalize_path(Path::new("./usr/bin/")), PathBuf::from("/usr/bin"));
        assert_eq!(normalize_path(Path::new("usr/./lib/../bin")), PathBuf::from("/usr/bin"));
        assert_eq!(normalize_path(Path::new("../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("/"));
    }

    #[test]
    fn from_tar_uses_an_explicit_kind_set() {
        assert_eq!(EntryKind::from_tar(EntryType::Regular), Some(EntryKind::File));
        assert_eq!(EntryKind::from_tar(EntryType::Link), Some(EntryKind::Hardlink));
        assert_eq!(EntryKind::from_tar(EntryType::Block), Some(EntryKind::BlockDevice));
        assert_eq!(EntryKind::from_tar(EntryType::Char), Some(EntryKind::CharDevice));
        assert_eq!(EntryKind::from_tar(EntryType::XGlobalHeader), None);
        assert!(!EntryKind::Symlink.is_regular());
    }

    struct NoLayers {
        id: ImageId,
        labels: BTreeMap<String, String>,
        layers: Vec<LayerRef>,
    }

    impl ImageHandle for NoLayers {
        fn id(&self) -> &ImageId {
            &self.id
        }
        fn labels(&self) -> &BTreeMap<String, String> {
            &self.labels
        }
        fn created(&self) -> Option<DateTime<Utc>> {
            None
        }
        fn layers(&self) -> &[LayerRef] {
            &self.layers
        }
        fn open_blob(&self, _layer: &LayerRef) -> Result<Box<dyn Read + '_>> {
            unreachable!("layer selection fails first")
        }
    }

    #[test]
    fn top_layer_rejects_too_many_layers() {
        let digest = Digest::sha256(&"0".repeat(64)).expect("digest");
        let layer = LayerRef {
            digest,
            media_type: "application/vnd.oci.image.layer.v1.tar".into(),
            size: 0,
        };
        let image = NoLayers {
            id: ImageId::new("huge"),
            labels: BTreeMap::new(),
            layers: vec![layer; MAX_IMAGE_LAYERS + 1],
        };
        assert!(matches!(
            top_layer(&image),
            Err(LayerpkgError::LayerCount { .. })
        ));
    }
}
