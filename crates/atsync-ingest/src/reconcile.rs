//! Employee identifier reconciliation
//!
//! Raw badge/login values become canonical `ATS<digits>` codes. A value that
//! already embeds `ats<digits>` (any case, anywhere) is self-describing and is
//! canonicalised directly; only otherwise is the alias table consulted.

use atsync_common::{Result, SyncError};
use regex::Regex;

use crate::mapping::AliasTable;
use crate::table::Cell;

const CANONICAL_PATTERN: &str = r"(?i)ats\d+";

/// Outcome of resolving one raw identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Canonical code embedded in the value itself
    Pattern(String),
    /// Canonical code found in the alias table
    Alias(String),
    /// Embedded code and alias entry disagree; the embedded code wins
    Ambiguous { pattern: String, alias: String },
    Unresolved,
}

impl Resolution {
    pub fn canonical(&self) -> Option<&str> {
        match self {
            Resolution::Pattern(id) | Resolution::Alias(id) => Some(id),
            Resolution::Ambiguous { pattern, .. } => Some(pattern),
            Resolution::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.canonical().is_some()
    }
}

pub struct Reconciler {
    pattern: Regex,
    aliases: AliasTable,
}

impl Reconciler {
    pub fn new(aliases: AliasTable) -> Result<Self> {
        let pattern = Regex::new(CANONICAL_PATTERN)
            .map_err(|e| SyncError::Config(format!("invalid identifier pattern: {}", e)))?;
        Ok(Self { pattern, aliases })
    }

    /// Resolve a raw cell. Numbers are matched by their printed form and a
    /// missing cell by the empty string.
    pub fn resolve_cell(&self, cell: &Cell) -> Resolution {
        self.resolve(&cell.to_string())
    }

    pub fn resolve(&self, raw: &str) -> Resolution {
        let value = raw.trim();
        let alias = self.aliases.get(value);

        match self.pattern.find(value) {
            Some(found) => {
                let canonical = found.as_str().to_uppercase();
                match alias {
                    Some(alias) if alias != canonical => Resolution::Ambiguous {
                        pattern: canonical,
                        alias: alias.to_string(),
                    },
                    _ => Resolution::Pattern(canonical),
                }
            },
            None => match alias {
                Some(alias) => Resolution::Alias(alias.to_string()),
                None => Resolution::Unresolved,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn reconciler(entries: &[(&str, &str)]) -> Reconciler {
        let aliases = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Reconciler::new(aliases).unwrap()
    }

    #[test]
    fn test_embedded_code_wins() {
        let r = reconciler(&[]);
        assert_eq!(r.resolve("foo_ATS1234_bar"), Resolution::Pattern("ATS1234".into()));
        assert_eq!(r.resolve("  ats0042 "), Resolution::Pattern("ATS0042".into()));
        assert_eq!(r.resolve("AtS7-ATS8"), Resolution::Pattern("ATS7".into()));
    }

    #[test]
    fn test_alias_fallback() {
        let r = reconciler(&[("jdoe@x.com", "ATS9999")]);
        assert_eq!(r.resolve("jdoe@x.com"), Resolution::Alias("ATS9999".into()));
        assert_eq!(r.resolve(" jdoe@x.com "), Resolution::Alias("ATS9999".into()));
        assert_eq!(r.resolve("unknown@x.com"), Resolution::Unresolved);
        assert_eq!(r.resolve("ats"), Resolution::Unresolved);
    }

    #[test]
    fn test_alias_lookup_is_verbatim() {
        let r = reconciler(&[("jdoe@x.com", "ATS9999")]);
        assert_eq!(r.resolve("JDOE@x.com"), Resolution::Unresolved);
    }

    #[test]
    fn test_pattern_precedence_over_disagreeing_alias() {
        let r = reconciler(&[("ats100", "ATS200"), ("ATS300", "ATS300")]);

        let resolution = r.resolve("ats100");
        assert_eq!(
            resolution,
            Resolution::Ambiguous {
                pattern: "ATS100".into(),
                alias: "ATS200".into()
            }
        );
        assert_eq!(resolution.canonical(), Some("ATS100"));

        // Agreeing alias entry is not ambiguous
        assert_eq!(r.resolve("ATS300"), Resolution::Pattern("ATS300".into()));
    }

    #[test]
    fn test_non_text_cells() {
        let r = reconciler(&[("1234", "ATS1234"), ("00123", "ATS5")]);
        assert_eq!(r.resolve_cell(&Cell::infer("1234")), Resolution::Alias("ATS1234".into()));
        // Leading zeros are part of the key
        assert_eq!(r.resolve_cell(&Cell::infer("00123")), Resolution::Alias("ATS5".into()));
        assert_eq!(r.resolve_cell(&Cell::infer("123")), Resolution::Unresolved);
        assert_eq!(r.resolve_cell(&Cell::Missing), Resolution::Unresolved);
        assert!(!Resolution::Unresolved.is_resolved());
    }
}
