//! YAML configuration for field mappings, defaults, and filters.
//!
//! Three small documents drive a migration:
//!
//! ```yaml
//! # fields.yml - source header to attribute path(s)
//! First: Parent.name
//! Street: Parent.household.address.street1
//! Notes:            # blank value skips the column
//! ```
//!
//! ```yaml
//! # defaults.yml - attribute path to literal
//! Parent.household.address.state: IL
//! ```
//!
//! ```yaml
//! # filters.yml - attribute path to ordered rewrite rules
//! Parent.household.address.street1:
//!   "/(.*) Street$/": "$1 St"
//!   "N/A": ~
//! ```
//!
//! All three preserve document order; `~` encodes absent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::filter::{FilterSpec, SpecKey};
use crate::value::Value;

/// Field-mapping configuration: header string to attribute paths.
#[derive(Debug, Clone, Default)]
pub struct FieldConfig {
    entries: IndexMap<String, Vec<String>>,
}

impl FieldConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = expect_mapping(&doc, "field mapping")?;

        let mut entries = IndexMap::new();
        for (key, value) in mapping {
            let header = scalar_string(key).ok_or_else(|| ConfigError::BadEntry {
                key: format!("{key:?}"),
                message: "header must be a string".into(),
            })?;
            let paths = match value {
                serde_yaml::Value::Null => Vec::new(),
                other => {
                    let text = scalar_string(other).ok_or_else(|| ConfigError::BadEntry {
                        key: header.clone(),
                        message: "expected a comma-separated path list".into(),
                    })?;
                    text.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                }
            };
            entries.insert(header, paths);
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&read_config(path.as_ref())?)
    }

    /// (header, paths) pairs in document order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Test/builder convenience.
    pub fn map(mut self, header: &str, paths: &str) -> Self {
        self.entries.insert(
            header.to_string(),
            paths
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        );
        self
    }
}

/// Defaults configuration: attribute path to literal.
#[derive(Debug, Clone, Default)]
pub struct DefaultsConfig {
    entries: IndexMap<String, Value>,
}

impl DefaultsConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = expect_mapping(&doc, "defaults")?;

        let mut entries = IndexMap::new();
        for (key, value) in mapping {
            let path = scalar_string(key).ok_or_else(|| ConfigError::BadEntry {
                key: format!("{key:?}"),
                message: "path must be a string".into(),
            })?;
            let literal = scalar_value(value).ok_or_else(|| ConfigError::BadEntry {
                key: path.clone(),
                message: "default must be a scalar".into(),
            })?;
            entries.insert(path, literal);
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&read_config(path.as_ref())?)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Test/builder convenience.
    pub fn set(mut self, path: &str, literal: impl Into<Value>) -> Self {
        self.entries.insert(path.to_string(), literal.into());
        self
    }
}

/// Filter configuration: attribute path to ordered filter spec.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    entries: IndexMap<String, FilterSpec>,
}

impl FilterConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(text)?;
        let mapping = expect_mapping(&doc, "filters")?;

        let mut entries = IndexMap::new();
        for (key, value) in mapping {
            let path = scalar_string(key).ok_or_else(|| ConfigError::BadEntry {
                key: format!("{key:?}"),
                message: "path must be a string".into(),
            })?;
            let rules = value.as_mapping().ok_or_else(|| ConfigError::BadEntry {
                key: path.clone(),
                message: "filter spec must be a map".into(),
            })?;

            let mut spec = FilterSpec::new();
            for (rule_key, rule_value) in rules {
                let spec_key = match rule_key {
                    serde_yaml::Value::Bool(b) => SpecKey::Bool(*b),
                    other => SpecKey::Literal(scalar_string(other).ok_or_else(|| {
                        ConfigError::BadEntry {
                            key: path.clone(),
                            message: "filter keys must be scalars".into(),
                        }
                    })?),
                };
                let target = scalar_value(rule_value).ok_or_else(|| ConfigError::BadEntry {
                    key: path.clone(),
                    message: "filter targets must be scalars".into(),
                })?;
                spec.push(spec_key, target);
            }
            entries.insert(path, spec);
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&read_config(path.as_ref())?)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &FilterSpec)> {
        self.entries.iter()
    }

    /// Test/builder convenience.
    pub fn with(mut self, path: &str, spec: FilterSpec) -> Self {
        self.entries.insert(path.to_string(), spec);
        self
    }
}

/// Driver options: record window, create flag, progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    /// First record to migrate, 1-based inclusive.
    #[serde(default = "default_from")]
    pub from: usize,

    /// Stop before this record, 1-based exclusive.
    #[serde(default)]
    pub to: Option<usize>,

    /// Advisory create flag forwarded to the persistence layer.
    #[serde(default)]
    pub create: bool,

    /// Textual progress after each emitted target.
    #[serde(default)]
    pub progress: bool,

    /// Run registered uniquifiers on secondary keys.
    #[serde(default)]
    pub unique_keys: bool,
}

fn default_from() -> usize {
    1
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            from: 1,
            to: None,
            create: false,
            progress: false,
            unique_keys: false,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn expect_mapping<'a>(
    doc: &'a serde_yaml::Value,
    what: &str,
) -> Result<&'a serde_yaml::Mapping, ConfigError> {
    doc.as_mapping().ok_or_else(|| ConfigError::BadEntry {
        key: what.to_string(),
        message: "document must be a YAML map".into(),
    })
}

/// Render a YAML scalar as its string form.
fn scalar_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convert a YAML scalar into a typed [`Value`]; `~` becomes absent.
fn scalar_value(value: &serde_yaml::Value) -> Option<Value> {
    match value {
        serde_yaml::Value::Null => Some(Value::Absent),
        serde_yaml::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        serde_yaml::Value::String(s) => Some(Value::Str(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_config_parses_paths() {
        let config = FieldConfig::from_yaml_str(
            "First: Parent.name\nStreet: Parent.household.address.street1, note\nSkip:\n",
        )
        .unwrap();
        let entries: Vec<_> = config.entries().collect();
        assert_eq!(entries[0].0, "First");
        assert_eq!(entries[0].1, &vec!["Parent.name".to_string()]);
        assert_eq!(
            entries[1].1,
            &vec![
                "Parent.household.address.street1".to_string(),
                "note".to_string()
            ]
        );
        // blank value: column is skipped
        assert!(entries[2].1.is_empty());
    }

    #[test]
    fn test_field_config_preserves_order() {
        let config = FieldConfig::from_yaml_str("B: x\nA: y\nC: z\n").unwrap();
        let headers: Vec<_> = config.entries().map(|(h, _)| h.as_str()).collect();
        assert_eq!(headers, ["B", "A", "C"]);
    }

    #[test]
    fn test_defaults_config_types() {
        let config = DefaultsConfig::from_yaml_str(
            "Parent.household.address.state: IL\nParent.weight: 3\nParent.active: true\n",
        )
        .unwrap();
        let entries: Vec<_> = config.entries().collect();
        assert_eq!(entries[0].1, &Value::Str("IL".into()));
        assert_eq!(entries[1].1, &Value::Int(3));
        assert_eq!(entries[2].1, &Value::Bool(true));
    }

    #[test]
    fn test_filter_config_with_regex_and_null() {
        let text = "Parent.household.address.street1:\n  \"/(.*) Street$/\": \"$1 St\"\n  \"N/A\": ~\n";
        let config = FilterConfig::from_yaml_str(text).unwrap();
        let (path, spec) = config.entries().next().unwrap();
        assert_eq!(path, "Parent.household.address.street1");
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_filter_config_boolean_keys() {
        let text = "Parent.retired:\n  \"X\": true\n  true: \"yes\"\n";
        let config = FilterConfig::from_yaml_str(text).unwrap();
        assert_eq!(config.entries().count(), 1);
    }

    #[test]
    fn test_non_map_document_rejected() {
        assert!(matches!(
            FieldConfig::from_yaml_str("- a\n- b\n"),
            Err(ConfigError::BadEntry { .. })
        ));
    }

    #[test]
    fn test_non_scalar_default_rejected() {
        assert!(matches!(
            DefaultsConfig::from_yaml_str("Parent.name:\n  - nested\n"),
            Err(ConfigError::BadEntry { .. })
        ));
    }

    #[test]
    fn test_engine_options_defaults() {
        let options: EngineOptions = serde_yaml::from_str("{}").unwrap();
        assert_eq!(options.from, 1);
        assert!(options.to.is_none());
        assert!(!options.create);

        let windowed: EngineOptions = serde_yaml::from_str("from: 2\nto: 5\n").unwrap();
        assert_eq!(windowed.from, 2);
        assert_eq!(windowed.to, Some(5));
    }
}
