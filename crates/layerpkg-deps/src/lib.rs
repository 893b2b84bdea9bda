//! # layerpkg-deps
//!
//! Package relations and automatic dependency discovery.
//!
//! Handles:
//! - **Relation**: the `name [op version]` dependency grammar.
//! - **Scanner**: parsing the dependency scanner's line protocol into a
//!   deduplicated, sorted [`scanner::RelationSet`].
//! - **Extract**: running the scanner inside a disposable execution context.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod extract;
pub mod relation;
pub mod scanner;
