//! Layer blob decompression.
//!
//! The compression format is detected from the blob's leading magic bytes,
//! not from the manifest media type, so mislabelled blobs still decode.

use std::io::{BufRead, BufReader, Read};

use layerpkg_common::error::{LayerpkgError, Result};

/// Compression formats recognised by their magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain, uncompressed data.
    None,
    /// gzip (`1f 8b`).
    Gzip,
    /// Zstandard (`28 b5 2f fd`).
    Zstd,
    /// bzip2 (`BZh`).
    Bzip2,
    /// xz (`fd 37 7a 58 5a 00`).
    Xz,
}

impl Compression {
    /// Detects the format from the first bytes of a stream.
    #[must_use]
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zstd
        } else if magic.starts_with(b"BZh") {
            Self::Bzip2
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Self::Xz
        } else {
            Self::None
        }
    }

    /// Short name of the format.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }
}

/// Wraps `reader` in the decoder matching its magic bytes.
///
/// `label` names the stream in error messages.
///
/// # Errors
///
/// Returns `LayerpkgError::UnsupportedCompression` for bzip2 and xz, and
/// `LayerpkgError::Archive` if the stream cannot be read.
pub fn auto_decompress<'a, R: Read + 'a>(reader: R, label: &str) -> Result<Box<dyn Read + 'a>> {
    let archive_err = |e| LayerpkgError::Archive {
        layer: label.to_string(),
        source: e,
    };
    let mut buffered = BufReader::new(reader);
    let format = Compression::detect(buffered.fill_buf().map_err(archive_err)?);
    tracing::debug!(layer = label, format = format.name(), "detected layer compression");

    match format {
        Compression::None => Ok(Box::new(buffered)),
        Compression::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(buffered))),
        Compression::Zstd => Ok(Box::new(
            zstd::stream::read::Decoder::with_buffer(buffered).map_err(archive_err)?,
        )),
        Compression::Bzip2 | Compression::Xz => Err(LayerpkgError::UnsupportedCompression {
            format: format.name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const PAYLOAD: &[u8] = b"layer payload bytes";

    fn read_all(reader: &mut dyn Read) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out).expect("read");
        out
    }

    #[test]
    fn detect_recognises_magic_bytes() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(Compression::detect(&[0x28, 0xb5, 0x2f, 0xfd, 0]), Compression::Zstd);
        assert_eq!(Compression::detect(b"BZh91AY"), Compression::Bzip2);
        assert_eq!(
            Compression::detect(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]),
            Compression::Xz
        );
        assert_eq!(Compression::detect(b"usr/"), Compression::None);
        assert_eq!(Compression::detect(&[]), Compression::None);
    }

    #[test]
    fn auto_decompress_passes_plain_data_through() {
        let mut reader = auto_decompress(PAYLOAD, "plain").expect("open");
        assert_eq!(read_all(&mut reader), PAYLOAD);
    }

    #[test]
    fn auto_decompress_decodes_gzip() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(PAYLOAD).expect("write");
        let compressed = encoder.finish().expect("finish");

        let mut reader = auto_decompress(compressed.as_slice(), "gz").expect("open");
        assert_eq!(read_all(&mut reader), PAYLOAD);
    }

    #[test]
    fn auto_decompress_decodes_zstd() {
        let compressed = zstd::encode_all(PAYLOAD, 3).expect("encode");
        let mut reader = auto_decompress(compressed.as_slice(), "zst").expect("open");
        assert_eq!(read_all(&mut reader), PAYLOAD);
    }

    #[test]
    fn auto_decompress_rejects_xz() {
        let data = [0xfd, b'7', b'z', b'X', b'Z', 0x00, 0x00];
        assert!(matches!(
            auto_decompress(&data[..], "xz"),
            Err(LayerpkgError::UnsupportedCompression { format: "xz" })
        ));
    }
}
