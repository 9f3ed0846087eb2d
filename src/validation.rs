use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
});

/// RuleKind
///
/// The fixed set of checks a column may declare. `Unique` is repository-bound:
/// it is evaluated by the owning repository, which issues a lookup against
/// its own table or, when `entity` is set, against another entity's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleKind {
    Required,
    Email,
    Length { min: usize, max: usize },
    Unique { entity: Option<String> },
}

/// ValidationRule
///
/// A rule descriptor: the rule kind (with its arguments) plus an optional
/// custom failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRule {
    pub kind: RuleKind,
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn required() -> Self {
        Self::new(RuleKind::Required)
    }

    pub fn email() -> Self {
        Self::new(RuleKind::Email)
    }

    pub fn length(min: usize, max: usize) -> Self {
        Self::new(RuleKind::Length { min, max })
    }

    /// Value must not already be stored in the owning repository.
    pub fn unique() -> Self {
        Self::new(RuleKind::Unique { entity: None })
    }

    /// Value must not already be stored in `entity`.
    pub fn unique_in(entity: impl Into<String>) -> Self {
        Self::new(RuleKind::Unique {
            entity: Some(entity.into()),
        })
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_repository_bound(&self) -> bool {
        matches!(self.kind, RuleKind::Unique { .. })
    }

    /// Message reported when the rule fails.
    pub fn failure_message(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        match &self.kind {
            RuleKind::Required => "is required".to_string(),
            RuleKind::Email => "is not a valid email address".to_string(),
            RuleKind::Length { min, max } => {
                format!("must be between {min} and {max} characters")
            }
            RuleKind::Unique { .. } => "is already in use".to_string(),
        }
    }

    /// Evaluates a static rule. Repository-bound rules always pass here.
    ///
    /// Only `Required` rejects a missing or empty value; the other rules skip it.
    pub fn check(&self, value: Option<&serde_json::Value>) -> bool {
        let text = value.and_then(text_of);
        match &self.kind {
            RuleKind::Required => text.is_some_and(|t| !t.trim().is_empty()),
            RuleKind::Email => text
                .filter(|t| !t.is_empty())
                .is_none_or(|t| EMAIL.is_match(&t)),
            RuleKind::Length { min, max } => text
                .filter(|t| !t.is_empty())
                .is_none_or(|t| (*min..=*max).contains(&t.chars().count())),
            RuleKind::Unique { .. } => true,
        }
    }
}

/// Text form of a submitted value; `None` for null.
pub(crate) fn text_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// ValidationErrors
///
/// Failure messages keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        let messages = self.0.entry(field.into()).or_default();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.0 {
            for message in messages {
                self.add(field.clone(), message);
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{field} {}", messages.join(", ")))
            .collect();
        f.write_str(&parts.join("; "))
    }
}
