//! Metadata merging.
//!
//! Sources are applied in a fixed order, each stage overriding the previous
//! one field by field:
//!
//! | Stage | Source | Overrides when |
//! |-------|--------|----------------|
//! | 1 | built-in defaults (OS, compressor, host architecture) | always |
//! | 2 | image labels, image creation time | label present and non-empty |
//! | 3 | package configuration | value non-empty, epoch non-zero |
//!
//! Relations are not merged: declared relations are appended first, then
//! extracted relations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use layerpkg_common::config::PackageConfig;
use layerpkg_common::constants::{PACKAGE_OS, labels};
use layerpkg_common::error::{LayerpkgError, Result};
use layerpkg_common::settings::Compressor;
use layerpkg_deps::relation::{Relation, RelationKind};
use layerpkg_deps::scanner::RelationSet;
use serde::Serialize;

/// Final metadata of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageMetadata {
    /// Package name.
    pub name: String,
    /// Upstream version.
    pub version: String,
    /// Package release.
    pub release: String,
    /// Epoch.
    pub epoch: u32,
    /// License expression.
    pub license: String,
    /// One-line summary.
    pub summary: String,
    /// Long description.
    pub description: String,
    /// Project URL.
    pub url: String,
    /// Package group.
    pub group: String,
    /// Vendor.
    pub vendor: String,
    /// Packager.
    pub packager: String,
    /// Target architecture.
    pub arch: String,
    /// Operating system.
    pub os: String,
    /// Build time, taken from the image creation time.
    pub build_time: Option<DateTime<Utc>>,
    /// Payload compressor.
    pub compressor: Compressor,
    relations: BTreeMap<RelationKind, Vec<Relation>>,
}

impl PackageMetadata {
    /// Returns the relations of one kind, declared ones first.
    #[must_use]
    pub fn relations(&self, kind: RelationKind) -> &[Relation] {
        self.relations.get(&kind).map_or(&[], Vec::as_slice)
    }
}

/// Text fields that labels or configuration may set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Version,
    Release,
    License,
    Summary,
    Description,
    Url,
    Group,
    Vendor,
    Packager,
    Arch,
}

impl Field {
    fn slot(self, meta: &mut PackageMetadata) -> &mut String {
        match self {
            Self::Name => &mut meta.name,
            Self::Version => &mut meta.version,
            Self::Release => &mut meta.release,
            Self::License => &mut meta.license,
            Self::Summary => &mut meta.summary,
            Self::Description => &mut meta.description,
            Self::Url => &mut meta.url,
            Self::Group => &mut meta.group,
            Self::Vendor => &mut meta.vendor,
            Self::Packager => &mut meta.packager,
            Self::Arch => &mut meta.arch,
        }
    }

    fn configured(self, config: &PackageConfig) -> &str {
        match self {
            Self::Name => &config.name,
            Self::Version => &config.version,
            Self::Release => &config.release,
            Self::License => &config.license,
            Self::Summary => &config.summary,
            Self::Description => &config.description,
            Self::Url => &config.url,
            Self::Group => &config.group,
            Self::Vendor => &config.vendor,
            Self::Packager => &config.packager,
            Self::Arch => &config.build_arch,
        }
    }
}

/// Label keys read in stage 2. The epoch label is handled separately.
const LABEL_FIELDS: &[(&str, Field)] = &[
    (labels::VERSION, Field::Version),
    (labels::URL, Field::Url),
    (labels::TITLE, Field::Summary),
    (labels::DESCRIPTION, Field::Description),
    (labels::LICENSES, Field::License),
    (labels::NAME, Field::Name),
    (labels::RELEASE, Field::Release),
];

/// Fields read from configuration in stage 3. Epoch is handled separately.
const CONFIG_FIELDS: &[Field] = &[
    Field::Name,
    Field::Version,
    Field::Release,
    Field::Summary,
    Field::Description,
    Field::Url,
    Field::License,
    Field::Group,
    Field::Vendor,
    Field::Packager,
    Field::Arch,
];

/// Builds a [`PackageMetadata`] one merge stage at a time.
///
/// Every fallible step consumes the builder, so a failure leaves no
/// partially merged metadata behind.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    meta: PackageMetadata,
}

impl MetadataBuilder {
    /// Stage 1: built-in defaults.
    #[must_use]
    pub fn new(compressor: Compressor) -> Self {
        Self {
            meta: PackageMetadata {
                name: String::new(),
                version: String::new(),
                release: String::new(),
                epoch: 0,
                license: String::new(),
                summary: String::new(),
                description: String::new(),
                url: String::new(),
                group: String::new(),
                vendor: String::new(),
                packager: String::new(),
                arch: std::env::consts::ARCH.to_string(),
                os: PACKAGE_OS.to_string(),
                build_time: None,
                compressor,
                relations: BTreeMap::new(),
            },
        }
    }

    /// Stage 2: values from image labels and the image creation time.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::InvalidEpoch` if the epoch label is not a
    /// non-negative integer.
    pub fn labels(
        mut self,
        image_labels: &BTreeMap<String, String>,
        created: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        for (key, field) in LABEL_FIELDS {
            if let Some(value) = image_labels.get(*key).filter(|v| !v.is_empty()) {
                value.clone_into(field.slot(&mut self.meta));
            }
        }
        if let Some(value) = image_labels.get(labels::EPOCH).filter(|v| !v.trim().is_empty()) {
            self.meta.epoch = parse_epoch(value)?;
        }
        if created.is_some() {
            self.meta.build_time = created;
        }
        Ok(self)
    }

    /// Stage 3: explicit configuration.
    #[must_use]
    pub fn config(mut self, config: &PackageConfig) -> Self {
        for field in CONFIG_FIELDS {
            let value = field.configured(config);
            if !value.is_empty() {
                value.clone_into(field.slot(&mut self.meta));
            }
        }
        if config.epoch != 0 {
            self.meta.epoch = config.epoch;
        }
        self
    }

    /// Appends the relations declared in `config`.
    ///
    /// Every `Requires(...)` variant is collapsed into requires.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::InvalidRelation` for the first declared
    /// expression that does not parse.
    pub fn declared_relations(mut self, config: &PackageConfig) -> Result<Self> {
        let declared: [(RelationKind, Vec<&String>); 6] = [
            (RelationKind::Requires, config.all_requires().collect()),
            (RelationKind::Provides, config.provides.iter().collect()),
            (RelationKind::Conflicts, config.conflicts.iter().collect()),
            (RelationKind::Obsoletes, config.obsoletes.iter().collect()),
            (RelationKind::Recommends, config.recommends.iter().collect()),
            (RelationKind::Suggests, config.suggests.iter().collect()),
        ];
        for (kind, expressions) in declared {
            for expression in expressions {
                let relation = Relation::parse(expression)?;
                self.push(kind, relation);
            }
        }
        Ok(self)
    }

    /// Appends automatically extracted relations after the declared ones.
    #[must_use]
    pub fn extracted_relations(mut self, set: &RelationSet) -> Self {
        for (kind, relations) in set.iter() {
            for relation in relations {
                self.push(kind, relation.clone());
            }
        }
        self
    }

    /// Returns the finished metadata.
    #[must_use]
    pub fn build(self) -> PackageMetadata {
        self.meta
    }

    fn push(&mut self, kind: RelationKind, relation: Relation) {
        self.meta.relations.entry(kind).or_default().push(relation);
    }
}

fn parse_epoch(value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| LayerpkgError::InvalidEpoch {
            value: value.to_string(),
        })
}
