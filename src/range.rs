// Range expansion: user-facing inclusive ranges into ordered index tuples.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::template::IndexTuple;

/// Inclusive, 1-based range. Not validated until expanded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub from: u32,
    pub to: u32,
}

impl IndexRange {
    pub const fn new(from: u32, to: u32) -> Self {
        IndexRange { from, to }
    }

    pub const fn single(index: u32) -> Self {
        IndexRange {
            from: index,
            to: index,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.from > self.to {
            return Err(ValidationError::InvertedRange {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }

    /// Check that both ends fall inside `1..=max`.
    pub fn check_bounds(&self, axis: &'static str, max: u32) -> Result<(), ValidationError> {
        for index in [self.from, self.to] {
            if index < 1 || index > max {
                return Err(ValidationError::OutOfBounds { axis, index, max });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// Accepts "N" or "A-B". Ordering is checked later, by `expand`.
impl FromStr for IndexRange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::BadRangeSyntax(s.to_string());
        let trimmed = s.trim();
        match trimmed.split_once('-') {
            Some((from, to)) => {
                let from = from.trim().parse().map_err(|_| bad())?;
                let to = to.trim().parse().map_err(|_| bad())?;
                Ok(IndexRange::new(from, to))
            }
            None => trimmed.parse().map(IndexRange::single).map_err(|_| bad()),
        }
    }
}

/// Expand one or two ranges into tuples. The primary axis varies slowest.
pub fn expand(
    primary: IndexRange,
    secondary: Option<IndexRange>,
) -> Result<Vec<IndexTuple>, ValidationError> {
    primary.validate()?;
    if let Some(secondary) = secondary {
        secondary.validate()?;
    }

    let tuples = match secondary {
        None => (primary.from..=primary.to).map(IndexTuple::single).collect(),
        Some(secondary) => (primary.from..=primary.to)
            .flat_map(|p| (secondary.from..=secondary.to).map(move |s| IndexTuple::pair(p, s)))
            .collect(),
    };
    Ok(tuples)
}
