//! Declarative value filters.
//!
//! A filter is compiled from an ordered spec mapping literals or
//! `/pattern/flags` regex keys to replacement scalars (`~` encodes
//! absent). Application order: optional pre-block, literal hit, first
//! matching regex (with `$n` capture templates), catch-all (`/.*/`),
//! else the value passes through unchanged.
//!
//! Boolean-typed attributes get a split filter: the string-keyed rules
//! run first; when they yield absent the input is parsed as a boolean
//! and run through the boolean-keyed rules.

use indexmap::IndexMap;
use regex::{Regex, RegexBuilder};
use std::fmt;

use crate::error::FilterError;
use crate::value::Value;

/// One spec key: a plain literal or a boolean (YAML `true`/`false` keys
/// feed the boolean sub-filter).
#[derive(Debug, Clone, PartialEq)]
pub enum SpecKey {
    Literal(String),
    Bool(bool),
}

/// Ordered filter specification, as loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    entries: Vec<(SpecKey, Value)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: SpecKey, target: Value) {
        self.entries.push((key, target));
    }

    /// Builder-style literal entry.
    pub fn rule(mut self, key: &str, target: impl Into<Value>) -> Self {
        self.entries.push((SpecKey::Literal(key.into()), target.into()));
        self
    }

    /// Builder-style entry mapping to absent.
    pub fn erase(mut self, key: &str) -> Self {
        self.entries.push((SpecKey::Literal(key.into()), Value::Absent));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn split_boolean(self) -> (FilterSpec, IndexMap<bool, Value>) {
        let mut string_spec = FilterSpec::new();
        let mut bool_rules = IndexMap::new();
        for (key, target) in self.entries {
            match key {
                SpecKey::Bool(b) => {
                    bool_rules.entry(b).or_insert(target);
                }
                literal => string_spec.push(literal, target),
            }
        }
        (string_spec, bool_rules)
    }
}

/// External transform applied before the compiled rules.
pub type FilterBlock = Box<dyn Fn(Value) -> Value>;

struct RegexRule {
    regex: Regex,
    target: Value,
}

/// Compiled rule set shared by plain and boolean filters.
#[derive(Default)]
struct Rules {
    literal_map: IndexMap<String, Value>,
    regex_rules: Vec<RegexRule>,
    catch_all: Option<Value>,
}

impl Rules {
    fn compile(spec: FilterSpec) -> Result<Self, FilterError> {
        let mut rules = Rules::default();
        for (key, target) in spec.entries {
            let literal = match key {
                SpecKey::Literal(s) => s,
                SpecKey::Bool(b) => b.to_string(),
            };
            match parse_regex_key(&literal)? {
                Some((pattern, ignore_case)) => {
                    if pattern == ".*" {
                        rules.catch_all.get_or_insert(target);
                        continue;
                    }
                    let regex = RegexBuilder::new(&pattern)
                        .case_insensitive(ignore_case)
                        .build()
                        .map_err(|e| FilterError::BadPattern {
                            key: literal.clone(),
                            message: e.to_string(),
                        })?;
                    rules.regex_rules.push(RegexRule { regex, target });
                }
                None => {
                    rules.literal_map.entry(literal).or_insert(target);
                }
            }
        }
        Ok(rules)
    }

    /// `None` when no rule fired.
    fn apply(&self, v: &Value) -> Option<Value> {
        let text = v.render();
        if let Some(target) = self.literal_map.get(&text) {
            return Some(target.clone());
        }
        for rule in &self.regex_rules {
            if rule.regex.is_match(&text) {
                return Some(rewrite(&rule.regex, &text, &rule.target));
            }
        }
        self.catch_all.clone()
    }
}

/// Rewrite the first match of `regex` in `text` with a string template
/// (`$n` expands to captures); an empty result becomes absent. Non-string
/// targets replace the value wholesale.
fn rewrite(regex: &Regex, text: &str, target: &Value) -> Value {
    let template = match target {
        Value::Str(s) => s,
        other => return other.clone(),
    };
    let rewritten = regex.replace(text, template.as_str()).to_string();
    if rewritten.is_empty() {
        Value::Absent
    } else {
        Value::Str(rewritten)
    }
}

/// Parse `/pattern/flags` keys; `Ok(None)` for plain literals. Only the
/// `i` flag is recognized.
fn parse_regex_key(key: &str) -> Result<Option<(String, bool)>, FilterError> {
    if !key.starts_with('/') || key.len() < 2 {
        return Ok(None);
    }
    let Some(close) = key.rfind('/') else {
        return Ok(None);
    };
    if close == 0 {
        return Ok(None);
    }
    let pattern = key[1..close].to_string();
    let flags = &key[close + 1..];
    let mut ignore_case = false;
    for flag in flags.chars() {
        match flag {
            'i' => ignore_case = true,
            other => {
                return Err(FilterError::UnsupportedFlag {
                    key: key.to_string(),
                    flag: other,
                });
            }
        }
    }
    Ok(Some((pattern, ignore_case)))
}

enum Kind {
    Plain(Rules),
    Boolean {
        string_part: Rules,
        bool_rules: IndexMap<bool, Value>,
    },
}

/// A compiled value transformer.
pub struct Filter {
    block: Option<FilterBlock>,
    kind: Kind,
}

impl Filter {
    /// Compile a plain filter. An empty spec is a configuration error.
    pub fn new(spec: FilterSpec) -> Result<Self, FilterError> {
        if spec.is_empty() {
            return Err(FilterError::EmptySpec);
        }
        Ok(Self {
            block: None,
            kind: Kind::Plain(Rules::compile(spec)?),
        })
    }

    /// Compile with an external pre-block; the spec may then be empty.
    pub fn with_block(spec: FilterSpec, block: FilterBlock) -> Result<Self, FilterError> {
        Ok(Self {
            block: Some(block),
            kind: Kind::Plain(Rules::compile(spec)?),
        })
    }

    /// Split filter for boolean-typed attributes.
    pub fn boolean(spec: FilterSpec) -> Result<Self, FilterError> {
        let (string_spec, bool_rules) = spec.split_boolean();
        Ok(Self {
            block: None,
            kind: Kind::Boolean {
                string_part: Rules::compile(string_spec)?,
                bool_rules,
            },
        })
    }

    /// The implicit string-to-boolean filter every boolean attribute
    /// carries when no spec is configured.
    pub fn implicit_boolean() -> Self {
        Self {
            block: None,
            kind: Kind::Boolean {
                string_part: Rules::default(),
                bool_rules: IndexMap::new(),
            },
        }
    }

    /// Run the filter. Absent stays absent.
    pub fn apply(&self, v: Value) -> Value {
        let v = match &self.block {
            Some(block) => block(v),
            None => v,
        };
        if v.is_absent() {
            return Value::Absent;
        }
        match &self.kind {
            Kind::Plain(rules) => rules.apply(&v).unwrap_or(v),
            Kind::Boolean {
                string_part,
                bool_rules,
            } => {
                match string_part.apply(&v) {
                    Some(hit) if !hit.is_absent() => hit,
                    // String rules missed or erased the value: fall back
                    // to boolean parsing plus the boolean-keyed rules.
                    _ => match Value::parse_bool(&v.render()) {
                        Some(b) => bool_rules
                            .get(&b)
                            .cloned()
                            .unwrap_or(Value::Bool(b)),
                        None => Value::Absent,
                    },
                }
            }
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Plain(_) => "plain",
            Kind::Boolean { .. } => "boolean",
        };
        f.debug_struct("Filter")
            .field("kind", &kind)
            .field("has_block", &self.block.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(filter: &Filter, s: &str) -> Value {
        filter.apply(Value::Str(s.into()))
    }

    #[test]
    fn test_literal_mapping() {
        let filter = Filter::new(FilterSpec::new().rule("Chicago", "CHI")).unwrap();
        assert_eq!(apply(&filter, "Chicago"), Value::Str("CHI".into()));
        assert_eq!(apply(&filter, "Boston"), Value::Str("Boston".into()));
    }

    #[test]
    fn test_regex_template_substitution() {
        let filter =
            Filter::new(FilterSpec::new().rule("/(.*) Street$/", "$1 St")).unwrap();
        assert_eq!(
            apply(&filter, "123 Oak Street"),
            Value::Str("123 Oak St".into())
        );
    }

    #[test]
    fn test_regex_rewrites_matched_portion() {
        let filter = Filter::new(FilterSpec::new().rule("/Street/", "St")).unwrap();
        assert_eq!(
            apply(&filter, "123 Oak Street"),
            Value::Str("123 Oak St".into())
        );
    }

    #[test]
    fn test_regex_insertion_order_wins() {
        let spec = FilterSpec::new()
            .rule("/^a.*/", "first")
            .rule("/^ab.*/", "second");
        let filter = Filter::new(spec).unwrap();
        assert_eq!(apply(&filter, "abc"), Value::Str("first".into()));
    }

    #[test]
    fn test_case_insensitive_flag() {
        let filter = Filter::new(FilterSpec::new().rule("/street/i", "St")).unwrap();
        assert_eq!(apply(&filter, "STREET"), Value::Str("St".into()));
    }

    #[test]
    fn test_unsupported_flag_is_fatal() {
        let err = Filter::new(FilterSpec::new().rule("/x/g", "y")).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedFlag { flag: 'g', .. }));
    }

    #[test]
    fn test_empty_substitution_is_absent() {
        let filter = Filter::new(FilterSpec::new().rule("/^x(\\d*)$/", "$1")).unwrap();
        assert_eq!(apply(&filter, "x"), Value::Absent);
        assert_eq!(apply(&filter, "x42"), Value::Str("42".into()));
    }

    #[test]
    fn test_catch_all() {
        let spec = FilterSpec::new().rule("keep", "kept").rule("/.*/", "other");
        let filter = Filter::new(spec).unwrap();
        assert_eq!(apply(&filter, "keep"), Value::Str("kept".into()));
        assert_eq!(apply(&filter, "anything"), Value::Str("other".into()));
    }

    #[test]
    fn test_erase_to_absent() {
        let filter = Filter::new(FilterSpec::new().erase("N/A")).unwrap();
        assert_eq!(apply(&filter, "N/A"), Value::Absent);
    }

    #[test]
    fn test_empty_spec_without_block_is_fatal() {
        assert!(matches!(
            Filter::new(FilterSpec::new()),
            Err(FilterError::EmptySpec)
        ));
    }

    #[test]
    fn test_block_runs_first() {
        let spec = FilterSpec::new().rule("chicago", "CHI");
        let filter = Filter::with_block(
            spec,
            Box::new(|v| match v {
                Value::Str(s) => Value::Str(s.to_lowercase()),
                other => other,
            }),
        )
        .unwrap();
        assert_eq!(apply(&filter, "CHICAGO"), Value::Str("CHI".into()));
    }

    #[test]
    fn test_implicit_boolean() {
        let filter = Filter::implicit_boolean();
        assert_eq!(apply(&filter, "yes"), Value::Bool(true));
        assert_eq!(apply(&filter, "0"), Value::Bool(false));
        assert_eq!(apply(&filter, "maybe"), Value::Absent);
    }

    #[test]
    fn test_boolean_split_string_rules_first() {
        let mut spec = FilterSpec::new().rule("X", true).rule("-", false);
        spec.push(SpecKey::Bool(true), Value::Str("on".into()));
        let filter = Filter::boolean(spec).unwrap();
        // string rule hit
        assert_eq!(apply(&filter, "X"), Value::Bool(true));
        // string miss, parsed boolean routed through the bool rules
        assert_eq!(apply(&filter, "true"), Value::Str("on".into()));
        assert_eq!(apply(&filter, "no"), Value::Bool(false));
        // both sub-filters miss
        assert_eq!(apply(&filter, "junk"), Value::Absent);
    }

    #[test]
    fn test_absent_stays_absent() {
        let filter = Filter::new(FilterSpec::new().rule("/.*/", "x")).unwrap();
        assert_eq!(filter.apply(Value::Absent), Value::Absent);
    }

    #[test]
    fn test_idempotent_spec_applied_twice() {
        let filter = Filter::new(FilterSpec::new().rule("/ Street$/", " St")).unwrap();
        let once = apply(&filter, "Oak Street");
        assert_eq!(once, Value::Str("Oak St".into()));
        let twice = filter.apply(once.clone());
        assert_eq!(once, twice);
    }
}
