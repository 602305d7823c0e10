//! Numeric comparison operators used by channel-count predicates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six numeric comparison operators.
///
/// Serialized as its operator symbol (`"=="`, `"<="`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumberComparator {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">=")]
    GreaterOrEqual,
}

impl NumberComparator {
    /// All operators, in display order.
    pub const ALL: [NumberComparator; 6] = [
        Self::Equal,
        Self::NotEqual,
        Self::LessThan,
        Self::GreaterThan,
        Self::LessOrEqual,
        Self::GreaterOrEqual,
    ];

    /// Evaluate `lhs <op> rhs`.
    pub fn compare<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
            Self::LessThan => lhs < rhs,
            Self::GreaterThan => lhs > rhs,
            Self::LessOrEqual => lhs <= rhs,
            Self::GreaterOrEqual => lhs >= rhs,
        }
    }

    /// The operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
        }
    }
}

impl fmt::Display for NumberComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for NumberComparator {
    type Err = ef_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.symbol() == s.trim())
            .ok_or_else(|| ef_core::Error::Configuration(format!("unknown comparator '{s}'")))
    }
}
