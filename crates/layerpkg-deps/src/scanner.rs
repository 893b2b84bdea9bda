//! Parser for the dependency scanner's line protocol.
//!
//! The scanner prints one header line per inspected file (a file index
//! followed by the path) and one line per discovered relation, prefixed by a
//! single marker character:
//!
//! | Marker | Kind |
//! |--------|------|
//! | `R` | requires |
//! | `r` | recommends |
//! | `P` | provides |
//! | `C` | conflicts |
//! | `O` | obsoletes |
//! | `s` | suggests |
//!
//! Supplements (`S`), enhances (`e`), order hints (`o`) and any other marker
//! are ignored.

use std::collections::BTreeMap;

use layerpkg_common::error::Result;

use crate::relation::{Relation, RelationKind};

/// Maps a scanner marker character to the relation kind it reports.
#[must_use]
pub const fn kind_for_marker(marker: char) -> Option<RelationKind> {
    match marker {
        'R' => Some(RelationKind::Requires),
        'r' => Some(RelationKind::Recommends),
        'P' => Some(RelationKind::Provides),
        'C' => Some(RelationKind::Conflicts),
        'O' => Some(RelationKind::Obsoletes),
        's' => Some(RelationKind::Suggests),
        _ => None,
    }
}

/// Deduplicated relations grouped by kind.
///
/// Within a kind, relations are unique by expression text and sorted by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSet {
    by_kind: BTreeMap<RelationKind, Vec<Relation>>,
}

impl RelationSet {
    /// Returns the relations of one kind; empty if none were found.
    #[must_use]
    pub fn get(&self, kind: RelationKind) -> &[Relation] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Iterates over the non-empty kinds and their relations.
    pub fn iter(&self) -> impl Iterator<Item = (RelationKind, &[Relation])> {
        self.by_kind.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Total number of relations across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    /// Returns true when no relation was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

/// Parses scanner output into a [`RelationSet`].
///
/// Blank lines and lines whose first non-blank character is a digit are
/// skipped. Each relation expression is parsed once, the first time its
/// exact text is seen for a given kind.
///
/// # Errors
///
/// Returns `LayerpkgError::InvalidRelation` for the first expression that
/// does not match the relation grammar.
pub fn parse_scanner_output(output: &str) -> Result<RelationSet> {
    let mut seen: BTreeMap<RelationKind, BTreeMap<String, Relation>> = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim();
        let mut chars = line.chars();
        let Some(marker) = chars.next() else {
            continue;
        };
        if marker.is_ascii_digit() {
            continue;
        }
        let Some(kind) = kind_for_marker(marker) else {
            tracing::trace!(marker = %marker, "ignoring scanner line");
            continue;
        };

        let expression = chars.as_str().trim();
        let bucket = seen.entry(kind).or_default();
        if bucket.contains_key(expression) {
            continue;
        }
        let relation = Relation::parse(expression)?;
        let _ = bucket.insert(expression.to_string(), relation);
    }

    let by_kind = seen
        .into_iter()
        .map(|(kind, bucket)| (kind, bucket.into_values().collect()))
        .collect();
    Ok(RelationSet { by_kind })
}

#[cfg(test)]
mod tests {
    use layerpkg_common::error::LayerpkgError;

    use super::*;

    const TWO_FILES: &str = "  0 /usr/lib64/libabrt.so.0.1.0
    R libgobject-2.0.so.0()(64bit)
    R libc.so.6(GLIBC_2.2.5)(64bit)
    R libc.so.6(GLIBC_2.3.4)(64bit)
    R libc.so.6(GLIBC_2.33)(64bit)
    R libc.so.6(GLIBC_2.3)(64bit)
    R libc.so.6(GLIBC_2.4)(64bit)
    R libc.so.6(GLIBC_2.38)(64bit)
    R libc.so.6(GLIBC_ABI_DT_RELR)(64bit)
    R libgcc_s.so.1(GCC_3.3.1)(64bit)
    P libabrt.so.0(LIBRABRT_2.14.5)(64bit)
    R libreport.so.2(LIBREPORT_2.13.1)(64bit)
    P libabrt.so.0()(64bit)
    R libgcc_s.so.1(GCC_3.0)(64bit)
    R libreport.so.2()(64bit)
    R libglib-2.0.so.0()(64bit)
    R libsatyr.so.4()(64bit)
    R libjson-c.so.5()(64bit)
    R libgcc_s.so.1()(64bit)
    R libc.so.6()(64bit)
    R rtld(GNU_HASH)
    R libgio-2.0.so.0()(64bit)
    S libsupplement.so()(64bit)
    e libenhance.so()(64bit)
  1 /usr/lib64/libacl.so.1.1.2302
    P libacl.so.1(ACL_1.2)(64bit)
    R libc.so.6(GLIBC_2.38)(64bit)
    R libc.so.6(GLIBC_ABI_DT_RELR)(64bit)
    P libacl.so.1()(64bit)
    R libc.so.6(GLIBC_2.4)(64bit)
    P libacl.so.1(ACL_1.2)(64bit)
    P libacl.so.1(ACL_1.1)(64bit)
    P libacl.so.1(ACL_1.0)(64bit)
    R libc.so.6(GLIBC_2.33)(64bit)
    R libc.so.6(GLIBC_2.3.4)(64bit)
    R rtld(GNU_HASH)
    R libc.so.6()(64bit)
    R libattr.so.1()(64bit)
    R libc.so.6(GLIBC_2.2.5)(64bit)
    R libc.so.6(GLIBC_2.3)(64bit)
    o liborder.so()(64bit)";

    fn names(set: &RelationSet, kind: RelationKind) -> Vec<&str> {
        set.get(kind).iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn two_files_aggregate_and_deduplicate() {
        let set = parse_scanner_output(TWO_FILES).expect("parse");
        assert_eq!(set.get(RelationKind::Requires).len(), 20);
        assert_eq!(set.get(RelationKind::Provides).len(), 6);
        for kind in [
            RelationKind::Recommends,
            RelationKind::Suggests,
            RelationKind::Conflicts,
            RelationKind::Obsoletes,
        ] {
            assert!(set.get(kind).is_empty(), "{kind} should be empty");
        }

        let requires = names(&set, RelationKind::Requires);
        assert!(requires.contains(&"libc.so.6(GLIBC_2.38)(64bit)"));
        assert!(requires.contains(&"rtld(GNU_HASH)"));
        assert!(names(&set, RelationKind::Provides).contains(&"libacl.so.1(ACL_1.2)(64bit)"));
    }

    #[test]
    fn relations_are_sorted_by_expression() {
        let set = parse_scanner_output(TWO_FILES).expect("parse");
        let requires: Vec<&str> = set
            .get(RelationKind::Requires)
            .iter()
            .map(Relation::expression)
            .collect();
        let mut sorted = requires.clone();
        sorted.sort_unstable();
        assert_eq!(requires, sorted);
    }

    #[test]
    fn every_marker_maps_to_its_kind() {
        let input = "0 /usr/lib64/test.so
  R required.so()(64bit)
  r recommended.so()(64bit)
  P provided.so()(64bit)
  C conflicted.so()(64bit)
  O itself < 1.0
  s some-symbol";
        let set = parse_scanner_output(input).expect("parse");
        for (kind, expected) in [
            (RelationKind::Requires, "required.so()(64bit)"),
            (RelationKind::Recommends, "recommended.so()(64bit)"),
            (RelationKind::Provides, "provided.so()(64bit)"),
            (RelationKind::Conflicts, "conflicted.so()(64bit)"),
            (RelationKind::Obsoletes, "itself"),
            (RelationKind::Suggests, "some-symbol"),
        ] {
            assert_eq!(names(&set, kind), vec![expected], "{kind}");
        }
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn versioned_obsoletes_keeps_constraint() {
        let set = parse_scanner_output("O itself < 1.0").expect("parse");
        let rel = &set.get(RelationKind::Obsoletes)[0];
        assert_eq!(rel.constraint, Some((crate::relation::Comparator::Less, "1.0".into())));
    }

    #[test]
    fn ignored_markers_and_blank_input_yield_empty_set() {
        let set = parse_scanner_output("\n  S a\n e b\n o c\n x d\n\n").expect("parse");
        assert!(set.is_empty());
        assert!(parse_scanner_output("").expect("parse").is_empty());
    }

    #[test]
    fn parsing_is_deterministic() {
        let first = parse_scanner_output(TWO_FILES).expect("parse");
        let second = parse_scanner_output(TWO_FILES).expect("parse");
        assert_eq!(first, second);
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let set = parse_scanner_output("0 /bin/x\r\nR libc.so.6()(64bit)\r\n").expect("parse");
        assert_eq!(names(&set, RelationKind::Requires), vec!["libc.so.6()(64bit)"]);
    }

    #[test]
    fn malformed_relation_fails_with_literal() {
        let err = parse_scanner_output("R good\nR bad >=\n").expect_err("should fail");
        assert!(matches!(
            err,
            LayerpkgError::InvalidRelation { ref expression, .. } if expression == "bad >="
        ));
    }
}
