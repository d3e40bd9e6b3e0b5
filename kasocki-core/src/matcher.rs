//! Path-accessor & matcher factory: compiles a [`FilterSpec`] into a total
//! predicate over decoded messages.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::error::KasockiError;

/// A dotted path mapped to the compiled form of its criterion.
pub type FilterSpec = BTreeMap<String, Criterion>;

/// A regex literal, compiled once at filter-install time and never
/// recompiled per message.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pattern: String,
    flags: String,
    regex: Regex,
}

impl CompiledRegex {
    /// Parse and compile a `/pattern/flags` literal.
    ///
    /// # Errors
    ///
    /// Returns [`KasockiError::InvalidFilter`] if the literal is malformed,
    /// fails to compile, or is rejected by the catastrophic-backtracking
    /// safety check.
    pub fn parse(literal: &str) -> Result<Self, KasockiError> {
        let (pattern, flags) = split_regex_literal(literal).ok_or_else(|| {
            KasockiError::InvalidFilter(format!("not a regex literal: {literal}"))
        })?;

        if is_unsafe_pattern(pattern) {
            return Err(KasockiError::InvalidFilter(format!(
                "pattern rejected as prone to catastrophic backtracking: {pattern}"
            )));
        }

        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                },
                's' => {
                    builder.dot_matches_new_line(true);
                },
                'm' => {
                    builder.multi_line(true);
                },
                'x' => {
                    builder.ignore_whitespace(true);
                },
                other => {
                    return Err(KasockiError::InvalidFilter(format!(
                        "unsupported regex flag: {other}"
                    )));
                },
            }
        }
        let regex = builder
            .build()
            .map_err(|e| KasockiError::InvalidFilter(format!("invalid regex /{pattern}/{flags}: {e}")))?;

        Ok(Self { pattern: pattern.to_string(), flags: flags.to_string(), regex })
    }

    /// Render this regex back to its `/pattern/flags` wire form.
    #[must_use]
    pub fn render(&self) -> String {
        format!("/{}/{}", self.pattern, self.flags)
    }

    fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Whether a string looks like a regex literal (`/pattern/flags`), as
/// opposed to a plain scalar string. Does not validate that `pattern`
/// itself compiles.
#[must_use]
pub fn looks_like_regex_literal(value: &str) -> bool {
    split_regex_literal(value).is_some()
}

fn split_regex_literal(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    let pattern = &rest[..end];
    let flags = &rest[end + 1..];
    if pattern.is_empty() || !flags.chars().all(|c| c.is_ascii_lowercase()) {
        return None;
    }
    Some((pattern, flags))
}

fn unsafe_pattern_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Nested unbounded quantifier inside a group, itself quantified
        // again outside the group: e.g. `(a+)+`, `(a*)*`, `(a+){10}`.
        Regex::new(r"\([^()]*[+*][^()]*\)\s*(?:[+*]|\{\d)").expect("static pattern is valid")
    })
}

/// Heuristic check rejecting patterns prone to catastrophic backtracking:
/// a parenthesized group containing an unbounded quantifier, itself
/// quantified again outside the group.
#[must_use]
pub fn is_unsafe_pattern(pattern: &str) -> bool {
    unsafe_pattern_regex().is_match(pattern)
}

/// A single criterion a message field value must satisfy.
#[derive(Debug, Clone)]
pub enum Criterion {
    /// Strict equality (type + value) against a scalar.
    Scalar(Value),
    /// Value coerced to string and matched against the regex.
    Regex(CompiledRegex),
    /// Membership (scalar value) or subset-containment (sequence value).
    Sequence(Vec<ScalarOrRegex>),
}

/// An element of a sequence criterion: either a scalar or a regex literal.
#[derive(Debug, Clone)]
pub enum ScalarOrRegex {
    /// A scalar element.
    Scalar(Value),
    /// A regex literal element.
    Regex(CompiledRegex),
}

impl ScalarOrRegex {
    fn satisfies_scalar(&self, value: &Value, path: &str, errors: &mut Vec<String>) -> bool {
        match self {
            Self::Scalar(expected) => expected == value,
            Self::Regex(regex) => match coerce_to_string(value) {
                Some(text) => regex.is_match(&text),
                None => {
                    errors.push(format!(
                        "{path}: regex criterion cannot coerce {value} to a string"
                    ));
                    false
                },
            },
        }
    }

    fn render(&self) -> Value {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Regex(regex) => Value::String(regex.render()),
        }
    }
}

impl Criterion {
    /// Render this criterion back to its wire form (regexes rendered as
    /// `/pat/flags` strings).
    #[must_use]
    pub fn render(&self) -> Value {
        match self {
            Self::Scalar(value) => value.clone(),
            Self::Regex(regex) => Value::String(regex.render()),
            Self::Sequence(elements) => Value::Array(elements.iter().map(ScalarOrRegex::render).collect()),
        }
    }

    fn satisfies(&self, value: &Value, path: &str, errors: &mut Vec<String>) -> bool {
        match self {
            Self::Scalar(expected) => match value {
                Value::Array(items) => items.iter().any(|item| item == expected),
                other => other == expected,
            },
            Self::Regex(regex) => match value {
                Value::Array(items) => items.iter().any(|item| match coerce_to_string(item) {
                    Some(text) => regex.is_match(&text),
                    None => {
                        errors.push(format!(
                            "{path}: regex criterion cannot coerce array element {item} to a string"
                        ));
                        false
                    },
                }),
                other => match coerce_to_string(other) {
                    Some(text) => regex.is_match(&text),
                    None => {
                        errors.push(format!(
                            "{path}: regex criterion cannot coerce {other} to a string"
                        ));
                        false
                    },
                },
            },
            Self::Sequence(elements) => match value {
                Value::Array(items) => elements.iter().all(|criterion| {
                    items.iter().any(|item| criterion.satisfies_scalar(item, path, errors))
                }),
                other => {
                    elements.iter().any(|criterion| criterion.satisfies_scalar(other, path, errors))
                },
            },
        }
    }
}

fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Compile a raw filter map into a [`Matcher`].
///
/// # Errors
///
/// Returns [`KasockiError::InvalidFilter`] if any key is not a non-empty
/// dotted path, any value is a nested mapping, or any regex literal fails
/// to parse/compile/pass the safety check.
pub fn compile_matcher(raw: &BTreeMap<String, Value>) -> Result<Matcher, KasockiError> {
    let mut spec = FilterSpec::new();
    for (path, value) in raw {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(KasockiError::InvalidFilter(format!(
                "invalid dotted path: {path:?}"
            )));
        }
        let criterion = compile_criterion(value)?;
        spec.insert(path.clone(), criterion);
    }
    Ok(Matcher { spec, errors: Vec::new() })
}

fn compile_criterion(value: &Value) -> Result<Criterion, KasockiError> {
    match value {
        Value::Object(_) => Err(KasockiError::InvalidFilter(
            "nested mappings are not valid filter criteria".to_string(),
        )),
        Value::String(s) if looks_like_regex_literal(s) => {
            Ok(Criterion::Regex(CompiledRegex::parse(s)?))
        },
        Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for item in items {
                elements.push(compile_sequence_element(item)?);
            }
            Ok(Criterion::Sequence(elements))
        },
        scalar => Ok(Criterion::Scalar(scalar.clone())),
    }
}

fn compile_sequence_element(value: &Value) -> Result<ScalarOrRegex, KasockiError> {
    match value {
        Value::Object(_) | Value::Array(_) => Err(KasockiError::InvalidFilter(
            "sequence criterion elements must be scalars or regex literals".to_string(),
        )),
        Value::String(s) if looks_like_regex_literal(s) => {
            Ok(ScalarOrRegex::Regex(CompiledRegex::parse(s)?))
        },
        scalar => Ok(ScalarOrRegex::Scalar(scalar.clone())),
    }
}

/// A compiled, total predicate over decoded messages, derived from a
/// [`FilterSpec`]. Absence of a matcher (at the session level) is
/// equivalent to match-all.
#[derive(Debug, Clone)]
pub struct Matcher {
    spec: FilterSpec,
    errors: Vec<String>,
}

impl Matcher {
    /// The compiled filter this matcher was built from, for rendering back
    /// to the client or for logging.
    #[must_use]
    pub const fn source(&self) -> &FilterSpec {
        &self.spec
    }

    /// Non-fatal anomalies recorded during `matches` calls (e.g. a regex
    /// criterion evaluated against a value that could not be coerced to a
    /// string). Local to this matcher; cleared implicitly when a new
    /// filter replaces it.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Render the compiled filter back to its wire view (regexes rendered
    /// as `/pat/flags`).
    #[must_use]
    pub fn render(&self) -> BTreeMap<String, Value> {
        self.spec.iter().map(|(path, criterion)| (path.clone(), criterion.render())).collect()
    }

    /// Evaluate this matcher against a message. Total: never panics,
    /// always classifies the message as match or non-match. A missing
    /// intermediate path segment makes that entry non-satisfied, which
    /// makes the whole predicate false.
    pub fn matches(&mut self, message: &Value) -> bool {
        for (path, criterion) in &self.spec {
            match resolve_path(message, path) {
                Some(value) => {
                    if !criterion.satisfies(value, path, &mut self.errors) {
                        return false;
                    }
                },
                None => return false,
            }
        }
        true
    }
}

/// Descend a dotted path into a JSON value. Returns `None` if any
/// intermediate segment is missing or not an object.
#[must_use]
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// A matcher factory: compiles a raw filter map into a [`Matcher`].
/// Pluggable via [`crate::SessionConfig::matcher_factory`] for alternate
/// filter dialects.
pub type MatcherFactory = Arc<dyn Fn(&BTreeMap<String, Value>) -> Result<Matcher, KasockiError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn scalar_criterion_requires_exact_equality() {
        let mut matcher = compile_matcher(&raw(&[("name", json!("Berry"))])).unwrap();
        assert!(matcher.matches(&json!({"name": "Berry"})));
        assert!(!matcher.matches(&json!({"name": "berry"})));
    }

    #[test]
    fn dotted_path_descends_nested_objects() {
        let mut matcher = compile_matcher(&raw(&[("user.last_name", json!("Berry"))])).unwrap();
        assert!(matcher.matches(&json!({"user": {"last_name": "Berry"}})));
        assert!(!matcher.matches(&json!({"user": {"first_name": "Berry"}})));
    }

    #[test]
    fn missing_path_is_non_match_not_panic() {
        let mut matcher = compile_matcher(&raw(&[("user.last_name", json!("Berry"))])).unwrap();
        assert!(!matcher.matches(&json!({"other": 1})));
    }

    #[test]
    fn regex_criterion_matches_coerced_string() {
        let mut matcher =
            compile_matcher(&raw(&[("name", json!("/(green|red) doors?$/"))])).unwrap();
        assert!(matcher.matches(&json!({"name": "the green doors"})));
        assert!(!matcher.matches(&json!({"name": "the blue doors"})));
    }

    #[test]
    fn sequence_criterion_is_membership_against_scalar() {
        let mut matcher = compile_matcher(&raw(&[("status", json!(["open", "pending"]))])).unwrap();
        assert!(matcher.matches(&json!({"status": "open"})));
        assert!(!matcher.matches(&json!({"status": "closed"})));
    }

    #[test]
    fn sequence_criterion_is_subset_against_sequence_value() {
        let mut matcher = compile_matcher(&raw(&[("tags", json!(["a", "b"]))])).unwrap();
        assert!(matcher.matches(&json!({"tags": ["a", "b", "c"]})));
        assert!(!matcher.matches(&json!({"tags": ["a"]})));
    }

    #[test]
    fn scalar_criterion_matches_any_element_of_sequence_value() {
        let mut matcher = compile_matcher(&raw(&[("tags", json!("a"))])).unwrap();
        assert!(matcher.matches(&json!({"tags": ["a", "b"]})));
        assert!(!matcher.matches(&json!({"tags": ["b", "c"]})));
    }

    #[test]
    fn rejects_empty_path_segment() {
        let err = compile_matcher(&raw(&[("user..name", json!(1))])).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidFilter(_)));
    }

    #[test]
    fn rejects_nested_mapping_value() {
        let err = compile_matcher(&raw(&[("user", json!({"name": "a"}))])).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidFilter(_)));
    }

    #[test]
    fn rejects_catastrophic_backtracking_pattern() {
        let err = compile_matcher(&raw(&[("name", json!("/(a+){10}/"))])).unwrap_err();
        assert!(matches!(err, KasockiError::InvalidFilter(_)));
    }

    #[test]
    fn rejects_nested_plus_plus_pattern() {
        assert!(is_unsafe_pattern("(a+)+"));
        assert!(is_unsafe_pattern("(a*)*"));
        assert!(!is_unsafe_pattern("a+b*"));
    }

    #[test]
    fn renders_regex_criterion_back_to_literal_form() {
        let matcher = compile_matcher(&raw(&[("name", json!("/green$/i"))])).unwrap();
        let rendered = matcher.render();
        assert_eq!(rendered["name"], json!("/green$/i"));
    }

    #[test]
    fn empty_filter_spec_matches_everything() {
        let mut matcher = compile_matcher(&BTreeMap::new()).unwrap();
        assert!(matcher.matches(&json!({"anything": true})));
    }

    #[test]
    fn regex_against_uncoercible_value_is_non_match_and_recorded() {
        let mut matcher = compile_matcher(&raw(&[("tags", json!("/^a/"))])).unwrap();
        assert!(matcher.errors().is_empty());
        assert!(!matcher.matches(&json!({"tags": {"nested": true}})));
        assert_eq!(matcher.errors().len(), 1);
        assert!(matcher.errors()[0].contains("tags"));
    }

    #[test]
    fn regex_against_uncoercible_array_element_is_recorded() {
        let mut matcher = compile_matcher(&raw(&[("tags", json!("/^a/"))])).unwrap();
        assert!(!matcher.matches(&json!({"tags": [{"nested": true}]})));
        assert_eq!(matcher.errors().len(), 1);
    }
}
