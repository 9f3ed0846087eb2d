//! Pure translation of filters and schema declarations into SQLite text.
//!
//! Identifiers are always quoted and values always travel as bindings. Named
//! placeholders (`:name`) keep the generated text readable; [`expand_named`]
//! rewrites them to the numbered form the driver binds positionally.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::models::{Condition, EntitySchema, Filter, LogicalType, Value};

/// Columns the persistence layer manages itself.
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "created", "updated"];

/// A named parameter and the value bound to it. Names carry no leading `:`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub value: Value,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        Self {
            name: name.trim_start_matches(':').to_string(),
            value: value.into(),
        }
    }
}

/// WhereClause
///
/// Clause text without the `WHERE` keyword. Empty when the filter is empty, in
/// which case callers omit `WHERE` entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub bindings: Vec<Binding>,
}

impl WhereClause {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Placeholder-safe form of a column name.
pub fn param_name(column: &str) -> String {
    column
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// build_where
///
/// - sequence ⇒ `"k" IN (:k_0, :k_1, ...)` with one binding per element
/// - null ⇒ `"k" IS NULL` with no binding
/// - scalar ⇒ `"k" = :k`
///
/// Entries are joined with `AND`.
pub fn build_where(filter: &Filter) -> WhereClause {
    build_where_prefixed(filter, "")
}

/// Like [`build_where`], with every binding name prefixed. Used when the clause
/// shares a statement with other generated bindings.
pub fn build_where_prefixed(filter: &Filter, prefix: &str) -> WhereClause {
    let mut names = ParamNames::new();
    let mut parts = Vec::new();
    let mut bindings = Vec::new();

    for (column, condition) in filter.iter() {
        let ident = quote_ident(column);
        let base = format!("{prefix}{}", param_name(column));
        match condition {
            Condition::In(values) => {
                let mut placeholders = Vec::with_capacity(values.len());
                for (idx, value) in values.iter().enumerate() {
                    let name = names.claim(&format!("{base}_{idx}"));
                    placeholders.push(format!(":{name}"));
                    bindings.push(Binding::new(name, value.clone()));
                }
                parts.push(format!("{ident} IN ({})", placeholders.join(", ")));
            }
            Condition::IsNull | Condition::Eq(Value::Null) => {
                parts.push(format!("{ident} IS NULL"));
            }
            Condition::Eq(value) => {
                let name = names.claim(&base);
                parts.push(format!("{ident} = :{name}"));
                bindings.push(Binding::new(name, value.clone()));
            }
        }
    }

    WhereClause {
        sql: parts.join(" AND "),
        bindings,
    }
}

/// ParamNames
///
/// Hands out placeholder names that are unique within one statement. Distinct
/// columns can sanitise to the same name (`a-b` and `a_b`), and list entries
/// (`k_0`) can shadow a real column of that name.
#[derive(Debug, Default)]
pub struct ParamNames {
    used: HashSet<String>,
}

impl ParamNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base` while it is free, else the first free `base_2`, `base_3`, ...
    pub fn claim(&mut self, base: &str) -> String {
        let mut name = base.to_string();
        let mut n = 1;
        while !self.used.insert(name.clone()) {
            n += 1;
            name = format!("{base}_{n}");
        }
        name
    }
}

/// Store-native type for a logical column type.
pub fn map_type(logical: LogicalType) -> &'static str {
    match logical {
        LogicalType::Int => "INTEGER",
        LogicalType::Float => "REAL",
        LogicalType::String | LogicalType::Text => "TEXT",
        LogicalType::Timestamp => "TIMESTAMP",
    }
}

/// DDL for a create-if-absent statement.
///
/// SQLite cannot bind parameters inside DDL, so declared defaults are rendered
/// from their typed value: numbers verbatim, text as an escaped literal. A
/// numeric column with a non-numeric default is a `Schema` error.
pub fn create_table_sql(name: &str, schema: &EntitySchema) -> Result<String> {
    let mut defs = vec!["\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for (column, definition) in schema.iter() {
        let store_type = map_type(definition.logical_type);
        let mut def = format!("{} {store_type}", quote_ident(column));
        if let Some(default) = &definition.default {
            def.push_str(" DEFAULT ");
            let literal = default_literal(definition.logical_type, default).ok_or_else(|| {
                Error::Schema(format!(
                    "default {default} of {name}.{column} is not a number"
                ))
            })?;
            def.push_str(&literal);
        }
        defs.push(def);
    }
    defs.push("\"created\" TIMESTAMP".to_string());
    defs.push("\"updated\" TIMESTAMP".to_string());
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(name),
        defs.join(", ")
    ))
}

fn default_literal(logical: LogicalType, value: &Value) -> Option<String> {
    match (logical.is_numeric(), value) {
        (_, Value::Null) => Some("NULL".to_string()),
        (true, Value::Integer(i)) => Some(i.to_string()),
        (true, Value::Real(r)) => Some(r.to_string()),
        (true, Value::Text(s)) => s.trim().parse::<f64>().ok().map(|n| n.to_string()),
        (false, other) => Some(format!("'{}'", other.to_string().replace('\'', "''"))),
    }
}

/// expand_named
///
/// Rewrites every `:name` placeholder to `?N`, where `N` is the 1-based position
/// of the binding with that name. Placeholders inside quoted strings or quoted
/// identifiers are left alone. A placeholder without a binding, or two bindings
/// sharing a name, is an error.
pub fn expand_named(sql: &str, bindings: &[Binding]) -> Result<String> {
    for (idx, binding) in bindings.iter().enumerate() {
        if bindings[..idx].iter().any(|b| b.name == binding.name) {
            return Err(Error::Schema(format!(
                "parameter :{} is bound twice",
                binding.name
            )));
        }
    }

    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == ':'
                && prev != Some(':')
                && chars.peek().is_some_and(|n| n.is_ascii_alphanumeric() || *n == '_') =>
            {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let position = bindings
                    .iter()
                    .position(|b| b.name == name)
                    .ok_or_else(|| Error::Schema(format!("unbound parameter :{name}")))?;
                out.push_str(&format!("?{}", position + 1));
                prev = name.chars().last();
                continue;
            }
            None => out.push(c),
        }
        prev = Some(c);
    }

    Ok(out)
}
