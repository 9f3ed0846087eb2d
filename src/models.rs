use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::ValidationRule;

// --- Stored Values ---

/// Value
///
/// A single scalar cell as it travels to and from the store. Structured values
/// only exist above the persistence layer; they are flattened to text by an
/// `onSave` transform before reaching this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Flattens a JSON value into a cell. Arrays and objects are stored as their
/// JSON text.
impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Integer(*b as i64),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Real(r) => serde_json::Number::from_f64(r)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
        }
    }
}

/// Record
///
/// One stored row. Rows read back from the store always carry `id`, `created`
/// and `updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(column.into(), value.into())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.get(column).is_some_and(|v| !v.is_null())
    }

    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    pub fn created(&self) -> Option<&str> {
        self.get("created").and_then(Value::as_str)
    }

    pub fn updated(&self) -> Option<&str> {
        self.get("updated").and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Document
///
/// The repository-level view of a record: structured values are allowed once
/// `onRead` transforms have run.
pub type Document = serde_json::Map<String, serde_json::Value>;

// --- Filters ---

/// Condition
///
/// The constrained grammar a filter entry may express.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`. An `Eq(Value::Null)` is treated as [`Condition::IsNull`].
    Eq(Value),
    /// `column IN (...)`.
    In(Vec<Value>),
    /// `column IS NULL`.
    IsNull,
}

/// Filter
///
/// An ordered conjunction of per-column conditions. There is no OR, no nesting
/// and no join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Vec<(String, Condition)>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let condition = if value.is_null() {
            Condition::IsNull
        } else {
            Condition::Eq(value)
        };
        self.0.push((column.into(), condition));
        self
    }

    pub fn any_of<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.0.push((
            column.into(),
            Condition::In(values.into_iter().map(Into::into).collect()),
        ));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.0.push((column.into(), Condition::IsNull));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.0.iter().map(|(k, c)| (k.as_str(), c))
    }
}

/// Every record column becomes an equality (or null) condition.
impl From<&Record> for Filter {
    fn from(record: &Record) -> Self {
        record
            .iter()
            .fold(Filter::new(), |f, (k, v)| f.eq(k.clone(), v.clone()))
    }
}

// --- Schema Declarations ---

/// LogicalType
///
/// Column types callers may declare. Unknown names parse permissively to
/// [`LogicalType::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicalType {
    Int,
    Float,
    String,
    #[default]
    Text,
    Timestamp,
}

impl LogicalType {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => LogicalType::Int,
            "float" | "double" => LogicalType::Float,
            "string" => LogicalType::String,
            "timestamp" => LogicalType::Timestamp,
            _ => LogicalType::Text,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, LogicalType::Int | LogicalType::Float)
    }
}

/// Transform
///
/// Identifiers for the per-field lifecycle hooks a repository runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Structured value <-> JSON text.
    Json,
    /// One-way password hashing. Only meaningful as an `onSave` hook.
    PasswordHash,
}

/// ColumnDefinition
#[derive(Debug, Clone, Default)]
pub struct ColumnDefinition {
    pub logical_type: LogicalType,
    pub label: Option<String>,
    pub default: Option<Value>,
    pub rules: Vec<ValidationRule>,
    pub on_save: Option<Transform>,
    pub on_read: Option<Transform>,
}

impl ColumnDefinition {
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            ..Default::default()
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn on_save(mut self, transform: Transform) -> Self {
        self.on_save = Some(transform);
        self
    }

    pub fn on_read(mut self, transform: Transform) -> Self {
        self.on_read = Some(transform);
        self
    }
}

/// EntitySchema
///
/// Ordered field declarations for one entity. The reserved `id`, `created` and
/// `updated` columns are injected by the persistence layer and may not appear here.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    columns: Vec<(String, ColumnDefinition)>,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, definition: ColumnDefinition) -> Self {
        self.columns.push((name.into(), definition));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnDefinition)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// ColumnInfo
///
/// What the store reports about an existing column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub default: Option<String>,
    // Set when the column forbids NULL.
    pub required: bool,
}
