//! Operator-maintained mapping tables
//!
//! Two headerless CSV files live in the map directory:
//!
//! - `map.csv`: `source directory, employee column, formula`
//! - `id.csv`: `alternate identifier, canonical identifier`
//!
//! Both are read once per run and never modified.

use atsync_common::{Result, SyncError};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// How one source directory is transformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub source_directory: String,
    pub employee_column: String,
    pub formula: String,
}

/// Mapping rules keyed by source directory, in file order
#[derive(Debug, Clone, Default)]
pub struct MappingRules {
    rules: Vec<MappingRule>,
}

impl MappingRules {
    /// Add a rule. A later rule for the same directory replaces the earlier
    /// one but keeps its position.
    pub fn insert(&mut self, rule: MappingRule) {
        match self
            .rules
            .iter_mut()
            .find(|existing| existing.source_directory == rule.source_directory)
        {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn get(&self, source_directory: &str) -> Option<&MappingRule> {
        self.rules
            .iter()
            .find(|rule| rule.source_directory == source_directory)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<MappingRule> for MappingRules {
    fn from_iter<I: IntoIterator<Item = MappingRule>>(iter: I) -> Self {
        let mut rules = MappingRules::default();
        for rule in iter {
            rules.insert(rule);
        }
        rules
    }
}

/// Alternate identifier -> canonical identifier
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(String::as_str)
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.entries.insert(alias.into(), canonical.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Load `map.csv`. A missing file is fatal, as is a file with no usable rule.
pub fn load_rules(path: &Path) -> Result<MappingRules> {
    if !path.exists() {
        return Err(SyncError::MappingNotFound(path.display().to_string()));
    }

    let text = decode(std::fs::read(path)?);
    let rules = parse_rules(&text)?;
    if rules.is_empty() {
        return Err(SyncError::Config(format!(
            "no mapping rules in {}",
            path.display()
        )));
    }

    info!(path = %path.display(), rules = rules.len(), "Loaded mapping rules");
    Ok(rules)
}

/// Load `id.csv`. A missing file leaves every identifier to the embedded
/// code pattern.
pub fn load_aliases(path: &Path) -> Result<AliasTable> {
    if !path.exists() {
        warn!(path = %path.display(), "Identifier alias file not found, continuing without aliases");
        return Ok(AliasTable::default());
    }

    let text = decode(std::fs::read(path)?);
    let aliases = parse_aliases(&text)?;

    info!(path = %path.display(), aliases = aliases.len(), "Loaded identifier aliases");
    Ok(aliases)
}

pub fn parse_rules(text: &str) -> Result<MappingRules> {
    let mut rules = MappingRules::default();

    for (line, record) in positional_records(text).enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).map(str::to_string).filter(|f| !f.is_empty());

        match (field(0), field(1), field(2)) {
            (Some(source_directory), Some(employee_column), Some(formula)) => {
                rules.insert(MappingRule {
                    source_directory,
                    employee_column,
                    formula,
                })
            },
            _ => warn!(line = line + 1, "Incomplete mapping rule, ignoring"),
        }
    }

    Ok(rules)
}

pub fn parse_aliases(text: &str) -> Result<AliasTable> {
    let mut aliases = AliasTable::default();

    for (line, record) in positional_records(text).enumerate() {
        let record = record?;
        match (record.get(0), record.get(1)) {
            (Some(alias), Some(canonical)) if !canonical.trim().is_empty() => {
                aliases.insert(alias, canonical)
            },
            _ => debug!(line = line + 1, "Alias row without canonical identifier, ignoring"),
        }
    }

    Ok(aliases)
}

fn positional_records(text: &str) -> csv::StringRecordsIntoIter<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
        .into_records()
}

/// UTF-8 first, Latin-1 when the bytes are not valid UTF-8
fn decode(bytes: Vec<u8>) -> String {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!("Mapping file is not UTF-8, decoding as Latin-1");
            err.into_bytes().into_iter().map(char::from).collect()
        },
    };
    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}
