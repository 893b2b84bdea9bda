//! System-wide constants and default values.

/// Application name used in CLI output and temporary names.
pub const APP_NAME: &str = "layerpkg";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "layerpkg";

/// Default image-builder program.
pub const DEFAULT_BUILDER: &str = "buildah";

/// Default build recipe file name inside the build-context directory.
pub const DEFAULT_RECIPE: &str = "Containerfile";

/// Default dependency scanner binary inside the built image.
pub const DEFAULT_SCANNER: &str = "/usr/lib/rpm/rpmdeps";

/// Arguments passed to the scanner before the file list.
pub const DEFAULT_SCANNER_ARGS: &[&str] = &["--alldeps"];

/// Environment variable that tells the scanner where the filesystem root is.
pub const SCANNER_ROOT_ENV: &str = "RPM_BUILD_ROOT";

/// Filesystem root handed to the scanner.
pub const SCANNER_ROOT: &str = "/";

/// Operating system recorded in every package.
pub const PACKAGE_OS: &str = "linux";

/// File extension of the produced packages.
pub const PACKAGE_EXTENSION: &str = "rpm";

/// Target name of the build-time dependency resolution stage.
pub const BUILDREQUIRES_STAGE: &str = "buildrequires";

/// Target name of the main build stage.
pub const BUILD_STAGE: &str = "build";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers accepted in a built image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Prefix marking OCI whiteout entries in a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Well-known image label keys read into package metadata.
pub mod labels {
    /// Package version.
    pub const VERSION: &str = "org.opencontainers.image.version";
    /// Project URL.
    pub const URL: &str = "org.opencontainers.image.url";
    /// One-line summary.
    pub const TITLE: &str = "org.opencontainers.image.title";
    /// Long description.
    pub const DESCRIPTION: &str = "org.opencontainers.image.description";
    /// License expression.
    pub const LICENSES: &str = "org.opencontainers.image.licenses";
    /// Package name.
    pub const NAME: &str = "org.rpm.name";
    /// Package release.
    pub const RELEASE: &str = "org.rpm.release";
    /// Package epoch.
    pub const EPOCH: &str = "org.rpm.epoch";
}
