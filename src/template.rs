// Parameter templates and the resolver that binds them to concrete device ids.
//
// Pattern syntax: dot-separated path components with a trailing type tag,
// e.g. "530.x.12@i". A component that is exactly "x" takes the zero-based
// primary index, "y" takes the zero-based secondary index.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, ResolveError};

pub const PRIMARY_PLACEHOLDER: &str = "x";
pub const SECONDARY_PLACEHOLDER: &str = "y";

pub const FALSE_TRUE: &[&str] = &["False", "True"];
pub const DISABLE_ENABLE: &[&str] = &["Disable", "Enable"];

/// What values a template accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    Numeric {
        min: i64,
        max: i64,
        unit: &'static str,
    },
    /// Two-valued selector. The device stores the selection index.
    Choice(&'static [&'static str]),
}

impl Domain {
    pub fn is_selector(&self) -> bool {
        matches!(self, Domain::Choice(_))
    }

    pub fn check(&self, value: i64) -> Result<(), DomainError> {
        let ok = match self {
            Domain::Numeric { min, max, .. } => (*min..=*max).contains(&value),
            Domain::Choice(labels) => value >= 0 && (value as usize) < labels.len(),
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError {
                value,
                expected: self.describe(),
            })
        }
    }

    /// Human-readable range, e.g. "0 to 100 %" or "False/True".
    pub fn describe(&self) -> String {
        match self {
            Domain::Numeric { min, max, unit } if unit.is_empty() => format!("{} to {}", min, max),
            Domain::Numeric { min, max, unit } => format!("{} to {} {}", min, max, unit),
            Domain::Choice(labels) => labels.join("/"),
        }
    }

    /// Label for a selector value, if it names a valid choice.
    pub fn label(&self, value: i64) -> Option<&'static str> {
        match self {
            Domain::Choice(labels) if value >= 0 => labels.get(value as usize).copied(),
            _ => None,
        }
    }
}

/// A named device setting with up to two index placeholders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterTemplate {
    pub name: &'static str,
    pub pattern: &'static str,
    pub domain: Domain,
    pub default: i64,
    /// Notification group for Toggle-All. Only selectors carry one.
    pub group: Option<&'static str>,
}

impl ParameterTemplate {
    pub const fn numeric(
        name: &'static str,
        pattern: &'static str,
        min: i64,
        max: i64,
        unit: &'static str,
    ) -> Self {
        ParameterTemplate {
            name,
            pattern,
            domain: Domain::Numeric { min, max, unit },
            default: min,
            group: None,
        }
    }

    /// Selectors default to their second choice (True/Enable).
    pub const fn selector(
        name: &'static str,
        pattern: &'static str,
        labels: &'static [&'static str],
        group: &'static str,
    ) -> Self {
        ParameterTemplate {
            name,
            pattern,
            domain: Domain::Choice(labels),
            default: 1,
            group: Some(group),
        }
    }

    pub const fn with_default(mut self, default: i64) -> Self {
        self.default = default;
        self
    }

    fn components(&self) -> impl Iterator<Item = &'static str> {
        let path = match self.pattern.rsplit_once('@') {
            Some((path, _)) => path,
            None => self.pattern,
        };
        path.split('.')
    }

    pub fn uses_primary(&self) -> bool {
        self.components().any(|c| c == PRIMARY_PLACEHOLDER)
    }

    pub fn uses_secondary(&self) -> bool {
        self.components().any(|c| c == SECONDARY_PLACEHOLDER)
    }

    /// The trailing type tag without its '@', e.g. "i".
    pub fn type_tag(&self) -> Option<&'static str> {
        self.pattern.rsplit_once('@').map(|(_, tag)| tag)
    }
}

/// One addressed unit, numbered from 1 the way the user sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexTuple {
    pub primary: u32,
    pub secondary: Option<u32>,
}

impl IndexTuple {
    pub const fn single(primary: u32) -> Self {
        IndexTuple {
            primary,
            secondary: None,
        }
    }

    pub const fn pair(primary: u32, secondary: u32) -> Self {
        IndexTuple {
            primary,
            secondary: Some(secondary),
        }
    }
}

/// Bind `template` to `tuple`, producing the device parameter id.
///
/// `x` becomes `primary - 1`. `y` becomes `secondary - secondary_offset`; the
/// offset comes from the page's secondary axis and may differ between Load and
/// Apply (see `registry::SecondaryAxis`).
pub fn resolve(
    template: &ParameterTemplate,
    tuple: IndexTuple,
    secondary_offset: u32,
) -> Result<String, ResolveError> {
    let mut parts = Vec::new();
    for component in template.components() {
        let part = match component {
            PRIMARY_PLACEHOLDER => tuple.primary.saturating_sub(1).to_string(),
            SECONDARY_PLACEHOLDER => {
                let secondary = tuple.secondary.ok_or(ResolveError {
                    pattern: template.pattern,
                    placeholder: 'y',
                })?;
                secondary.saturating_sub(secondary_offset).to_string()
            }
            literal => literal.to_string(),
        };
        parts.push(part);
    }

    let mut id = parts.join(".");
    if let Some(tag) = template.type_tag() {
        id.push('@');
        id.push_str(tag);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO: ParameterTemplate = ParameterTemplate::numeric("Freeze", "530.x.12@i", 0, 600, "seconds");
    const AUDIO: ParameterTemplate =
        ParameterTemplate::selector("Loss trap", "853.x.y.1@i", FALSE_TRUE, "Audio Traps");
    const FIXED: ParameterTemplate =
        ParameterTemplate::selector("CPU Usage too high", "850.2@i", FALSE_TRUE, "System Notify");

    #[test]
    fn primary_is_zero_based() {
        assert_eq!(resolve(&VIDEO, IndexTuple::single(1), 1).unwrap(), "530.0.12@i");
        assert_eq!(resolve(&VIDEO, IndexTuple::single(32), 1).unwrap(), "530.31.12@i");
    }

    #[test]
    fn secondary_uses_axis_offset() {
        let tuple = IndexTuple::pair(3, 4);
        assert_eq!(resolve(&AUDIO, tuple, 1).unwrap(), "853.2.3.1@i");
        assert_eq!(resolve(&AUDIO, tuple, 0).unwrap(), "853.2.4.1@i");
    }

    #[test]
    fn fixed_pattern_ignores_tuple() {
        for tuple in [IndexTuple::single(1), IndexTuple::single(9), IndexTuple::pair(4, 7)] {
            assert_eq!(resolve(&FIXED, tuple, 1).unwrap(), "850.2@i");
        }
    }

    #[test]
    fn missing_secondary_is_an_error() {
        let err = resolve(&AUDIO, IndexTuple::single(1), 1).unwrap_err();
        assert_eq!(err.placeholder, 'y');
    }

    #[test]
    fn placeholder_detection() {
        assert!(VIDEO.uses_primary());
        assert!(!VIDEO.uses_secondary());
        assert!(AUDIO.uses_secondary());
        assert!(!FIXED.uses_primary());
        assert_eq!(FIXED.type_tag(), Some("i"));
    }

    #[test]
    fn domain_checks() {
        let numeric = Domain::Numeric { min: 0, max: 100, unit: "%" };
        assert!(numeric.check(100).is_ok());
        assert_eq!(numeric.check(101).unwrap_err().value, 101);
        assert_eq!(numeric.describe(), "0 to 100 %");

        let choice = Domain::Choice(DISABLE_ENABLE);
        assert!(choice.check(1).is_ok());
        assert!(choice.check(2).is_err());
        assert!(choice.check(-1).is_err());
        assert_eq!(choice.label(0), Some("Disable"));
        assert_eq!(choice.label(5), None);
    }
}
