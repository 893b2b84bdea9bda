//! Dependency expressions, parsed with `nom`.
//!
//! A relation is a capability name optionally followed by a comparison
//! operator and a version:
//!
//! ```text
//! libc.so.6(GLIBC_2.34)(64bit)
//! bash >= 5.1
//! config(hello) = 1:2.0-3
//! ```

use std::fmt;
use std::str::FromStr;

use layerpkg_common::error::{LayerpkgError, Result};
use nom::{
    IResult,
    bytes::complete::take_while1,
    character::complete::space0,
    error::ErrorKind,
};
use serde::{Deserialize, Serialize};

/// Kind of relation a package declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationKind {
    /// Hard runtime requirement.
    Requires,
    /// Capability offered.
    Provides,
    /// Cannot be installed alongside.
    Conflicts,
    /// Replaces.
    Obsoletes,
    /// Weak requirement.
    Recommends,
    /// Weaker requirement.
    Suggests,
}

impl RelationKind {
    /// Every kind, in a fixed order.
    pub const ALL: [Self; 6] = [
        Self::Requires,
        Self::Provides,
        Self::Conflicts,
        Self::Obsoletes,
        Self::Recommends,
        Self::Suggests,
    ];

    /// Lower-case name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::Provides => "provides",
            Self::Conflicts => "conflicts",
            Self::Obsoletes => "obsoletes",
            Self::Recommends => "recommends",
            Self::Suggests => "suggests",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Version comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `=`
    Equal,
    /// `>=`
    GreaterEq,
    /// `>`
    Greater,
}

impl Comparator {
    /// Parses an operator symbol.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Self::Less),
            "<=" => Some(Self::LessEq),
            "=" => Some(Self::Equal),
            ">=" => Some(Self::GreaterEq),
            ">" => Some(Self::Greater),
            _ => None,
        }
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Equal => "=",
            Self::GreaterEq => ">=",
            Self::Greater => ">",
        }
    }
}

/// A parsed dependency expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Capability name.
    pub name: String,
    /// Optional version constraint.
    pub constraint: Option<(Comparator, String)>,
    expression: String,
}

impl Relation {
    /// Parses a dependency expression.
    ///
    /// # Errors
    ///
    /// Returns `LayerpkgError::InvalidRelation`, carrying the expression
    /// verbatim, if the name is missing or has unbalanced parentheses, the
    /// operator is unknown, the version is missing, or text follows the
    /// version.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: &str| LayerpkgError::InvalidRelation {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };
        let trimmed = expression.trim();

        let (rest, name) = capability(trimmed).map_err(|e| match e {
            nom::Err::Failure(_) => invalid("unbalanced parentheses"),
            _ => invalid("missing capability name"),
        })?;
        let rest = skip_space(rest);
        if rest.is_empty() {
            return Ok(Self {
                name: name.to_string(),
                constraint: None,
                expression: trimmed.to_string(),
            });
        }

        let (rest, symbol) = operator(rest).map_err(|_| invalid("unexpected text after name"))?;
        let comparator =
            Comparator::from_symbol(symbol).ok_or_else(|| invalid("unknown comparison operator"))?;
        let rest = skip_space(rest);
        let (rest, version) = version(rest).map_err(|_| invalid("missing version"))?;
        if !skip_space(rest).is_empty() {
            return Err(invalid("unexpected text after version"));
        }

        Ok(Self {
            name: name.to_string(),
            constraint: Some((comparator, version.to_string())),
            expression: trimmed.to_string(),
        })
    }

    /// The expression this relation was parsed from, trimmed.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for Relation {
    type Err = LayerpkgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{} {} {version}", self.name, op.symbol()),
            None => f.write_str(&self.name),
        }
    }
}

const fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=')
}

/// Takes a capability name. Parentheses nest, and whitespace or operator
/// characters inside them belong to the name, so rich dependencies such as
/// `(a or b)` and qualifiers such as `font(:lang=en)` stay whole.
fn capability(input: &str) -> IResult<&str, &str> {
    let mut depth = 0usize;
    let mut end = input.len();
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 && (c.is_whitespace() || is_operator_char(c)) => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    if depth > 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Char)));
    }
    if end == 0 {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::TakeWhile1)));
    }
    Ok((&input[end..], &input[..end]))
}

fn operator(input: &str) -> IResult<&str, &str> {
    take_while1(is_operator_char)(input)
}

fn version(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn skip_space(input: &str) -> &str {
    space0::<&str, nom::error::Error<&str>>(input).map_or(input, |(rest, _)| rest)
}
