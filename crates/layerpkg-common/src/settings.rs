//! Tool settings that are not part of the package configuration document.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::LayerpkgError;

/// Payload compression of the produced package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compressor {
    /// Zstandard.
    #[default]
    Zstd,
    /// Gzip.
    Gzip,
    /// Uncompressed payload.
    None,
}

impl fmt::Display for Compressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zstd => write!(f, "zstd"),
            Self::Gzip => write!(f, "gzip"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for Compressor {
    type Err = LayerpkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zstd" => Ok(Self::Zstd),
            "gzip" => Ok(Self::Gzip),
            "none" => Ok(Self::None),
            other => Err(LayerpkgError::Config {
                message: format!("unknown compressor: {other}"),
            }),
        }
    }
}

/// How the dependency scanner is invoked inside the execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerSettings {
    /// Absolute path of the scanner inside the image.
    pub program: String,
    /// Arguments placed before the file list.
    pub args: Vec<String>,
    /// Environment passed to the scanner.
    pub env: Vec<(String, String)>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            program: constants::DEFAULT_SCANNER.to_string(),
            args: constants::DEFAULT_SCANNER_ARGS
                .iter()
                .map(ToString::to_string)
                .collect(),
            env: vec![(
                constants::SCANNER_ROOT_ENV.to_string(),
                constants::SCANNER_ROOT.to_string(),
            )],
        }
    }
}

/// Settings for one `layerpkg build` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Image-builder program.
    pub builder: String,
    /// Build recipe, relative to the build-context directory unless absolute.
    pub recipe: PathBuf,
    /// Target distribution release (e.g. `f41`, `el9`).
    pub release: String,
    /// Scanner invocation.
    pub scanner: ScannerSettings,
    /// Payload compressor.
    pub compressor: Compressor,
    /// Where packages are written; the build-context directory when unset.
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            builder: constants::DEFAULT_BUILDER.to_string(),
            recipe: PathBuf::from(constants::DEFAULT_RECIPE),
            release: String::new(),
            scanner: ScannerSettings::default(),
            compressor: Compressor::default(),
            output_dir: None,
        }
    }
}

impl Settings {
    /// Returns the dist tag derived from the target release.
    #[must_use]
    pub fn dist_tag(&self) -> String {
        dist_tag(&self.release)
    }
}

/// Derives the short dist tag from a distribution release name.
///
/// `f41` becomes `41`, `el9` becomes `9`; unknown families yield an
/// empty tag.
#[must_use]
pub fn dist_tag(release: &str) -> String {
    if let Some(rest) = release.strip_prefix("el") {
        rest.to_string()
    } else if let Some(rest) = release.strip_prefix('f') {
        rest.to_string()
    } else {
        String::new()
    }
}
