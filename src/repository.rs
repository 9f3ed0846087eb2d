use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::auth::{PasswordHasher, SaltedSha256};
use crate::error::{Error, Result};
use crate::models::{Document, EntitySchema, Filter, Record, Transform, Value};
use crate::persistence::PersistenceState;
use crate::validation::{RuleKind, ValidationErrors, ValidationRule, text_of};

/// Repository
///
/// Binds one entity schema to one backing table and is the only surface
/// application code touches. The table is created on first access.
///
/// Values pass through the column's `onSave` transform before they are written
/// and through its `onRead` transform after they are loaded. Columns not declared
/// in the schema are dropped on save; the reserved `id`, `created` and `updated`
/// columns are always returned on read.
pub struct Repository {
    name: String,
    schema: EntitySchema,
    store: PersistenceState,
    hasher: Arc<dyn PasswordHasher>,
    ready: OnceCell<()>,
}

impl Repository {
    pub fn new(name: impl Into<String>, schema: EntitySchema, store: PersistenceState) -> Self {
        Self {
            name: name.into(),
            schema,
            store,
            hasher: Arc::new(SaltedSha256),
            ready: OnceCell::new(),
        }
    }

    /// Replaces the capability used by `PasswordHash` transforms.
    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Creates the backing table once per repository instance.
    async fn ensure_table(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| self.store.create_table(&self.name, &self.schema))
            .await?;
        Ok(())
    }

    // --- Reads ---

    pub async fn get(&self, id: i64) -> Result<Option<Document>> {
        self.ensure_table().await?;
        let record = self.store.get(&self.name, id).await?;
        Ok(record.map(|r| self.read_document(r)))
    }

    /// All matching documents in id order.
    pub async fn list(&self, filter: &Filter) -> Result<Vec<Document>> {
        self.list_page(filter, 0, 0, "\"id\" ASC").await
    }

    pub async fn list_page(
        &self,
        filter: &Filter,
        offset: i64,
        limit: i64,
        order: &str,
    ) -> Result<Vec<Document>> {
        self.ensure_table().await?;
        let records = self
            .store
            .select(&self.name, offset, limit, order, filter)
            .await?;
        Ok(records
            .into_iter()
            .map(|r| self.read_document(r))
            .collect())
    }

    /// The first matching document, if any.
    pub async fn first(&self, filter: &Filter) -> Result<Option<Document>> {
        Ok(self
            .list_page(filter, 0, 1, "\"id\" ASC")
            .await?
            .into_iter()
            .next())
    }

    pub async fn count(&self, filter: &Filter) -> Result<i64> {
        self.ensure_table().await?;
        self.store.count(&self.name, filter).await
    }

    // --- Writes ---

    /// save
    ///
    /// Validates every document first and writes nothing if any fails; the
    /// returned `Error::Validation` carries all collected messages. Unique
    /// fields must also differ between documents of the same batch. Documents
    /// carrying an `id` are updated, the rest inserted; an `id` with no stored
    /// row is `NotFound`. Writes after validation are independent: a store
    /// failure part-way leaves earlier writes in place.
    ///
    /// Returns the ids of the saved documents in input order.
    pub async fn save(&self, documents: Vec<Document>) -> Result<Vec<i64>> {
        self.ensure_table().await?;

        let mut errors = ValidationErrors::new();
        for document in &documents {
            if let Some(id) = document_id(document) {
                if self.store.get(&self.name, id).await?.is_none() {
                    return Err(Error::NotFound(format!("{} #{id}", self.name)));
                }
            }
            errors.merge(self.validate(document).await?);
        }
        errors.merge(self.batch_conflicts(&documents));
        if !errors.is_empty() {
            tracing::debug!(entity = %self.name, %errors, "save rejected by validation");
            return Err(Error::Validation(errors));
        }

        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let record = self.write_record(&document);
            match document_id(&document) {
                Some(id) => {
                    let affected = self.store.update(&self.name, id, record).await?;
                    if affected == 0 {
                        tracing::warn!(entity = %self.name, id, "update matched no row");
                        return Err(Error::NotFound(format!("{} #{id}", self.name)));
                    }
                    ids.push(id);
                }
                None => ids.push(self.store.insert(&self.name, record).await?),
            }
        }
        Ok(ids)
    }

    pub async fn delete(&self, id: i64) -> Result<u64> {
        self.ensure_table().await?;
        self.store.delete(&self.name, id).await
    }

    pub async fn delete_all(&self, filter: &Filter) -> Result<u64> {
        self.ensure_table().await?;
        self.store.delete_all(&self.name, filter).await
    }

    // --- Validation ---

    /// Runs every declared rule against one document, plus a `required` check
    /// for columns the store reports as NOT NULL.
    pub async fn validate(&self, document: &Document) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let own_id = document_id(document);

        for (field, definition) in self.schema.iter() {
            let value = document.get(field);
            // Updates only validate the fields they carry.
            if own_id.is_some() && value.is_none() {
                continue;
            }
            for rule in &definition.rules {
                let passed = if rule.is_repository_bound() {
                    self.check_bound(rule, field, value, own_id).await?
                } else {
                    rule.check(value)
                };
                if !passed {
                    errors.add(field, rule.failure_message());
                }
            }
        }

        if own_id.is_none() {
            for column in self.store.columns_of(&self.name).await? {
                let declared = self.schema.get(&column.name).is_some();
                if declared
                    && column.required
                    && column.default.is_none()
                    && !ValidationRule::required().check(document.get(&column.name))
                {
                    errors.add(column.name, ValidationRule::required().failure_message());
                }
            }
        }

        Ok(errors)
    }

    /// Unique values repeated between documents of one batch. Rules bound to
    /// another entity are left to the stored lookup.
    fn batch_conflicts(&self, documents: &[Document]) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for (field, definition) in self.schema.iter() {
            for rule in &definition.rules {
                let RuleKind::Unique { entity } = &rule.kind else {
                    continue;
                };
                if entity.as_deref().is_some_and(|e| e != self.name) {
                    continue;
                }
                let mut seen = HashSet::new();
                for document in documents {
                    let Some(text) = document
                        .get(field)
                        .and_then(text_of)
                        .filter(|t| !t.is_empty())
                    else {
                        continue;
                    };
                    if !seen.insert(text) {
                        errors.add(field, rule.failure_message());
                    }
                }
            }
        }
        errors
    }

    async fn check_bound(
        &self,
        rule: &ValidationRule,
        field: &str,
        value: Option<&serde_json::Value>,
        own_id: Option<i64>,
    ) -> Result<bool> {
        match &rule.kind {
            RuleKind::Unique { entity } => {
                let Some(text) = value.and_then(text_of).filter(|t| !t.is_empty()) else {
                    return Ok(true);
                };
                let table = entity.as_deref().unwrap_or(&self.name);
                let filter = Filter::new().eq(field, text);
                let existing = match self.store.select(table, 0, 0, "", &filter).await {
                    Ok(records) => records,
                    // A table that does not exist yet holds no conflicting value.
                    Err(Error::NotFound(_)) => Vec::new(),
                    Err(e) => return Err(e),
                };
                Ok(existing
                    .iter()
                    .all(|r| own_id.is_some() && r.id() == own_id && entity.is_none()))
            }
            _ => Ok(rule.check(value)),
        }
    }

    // --- Transforms ---

    fn write_record(&self, document: &Document) -> Record {
        let mut record = Record::new();
        for (field, definition) in self.schema.iter() {
            let Some(value) = document.get(field) else {
                continue;
            };
            let stored = match definition.on_save {
                Some(Transform::Json) if !value.is_null() => Value::Text(value.to_string()),
                Some(Transform::PasswordHash) => match value {
                    serde_json::Value::String(plain) if !plain.is_empty() => {
                        if self.hasher.is_hashed(plain) {
                            Value::Text(plain.clone())
                        } else {
                            Value::Text(self.hasher.hash(plain))
                        }
                    }
                    other => Value::from(other),
                },
                _ => Value::from(value),
            };
            record.insert(field, stored);
        }
        for dropped in document
            .keys()
            .filter(|k| self.schema.get(k).is_none() && !matches!(k.as_str(), "id" | "created" | "updated"))
        {
            tracing::debug!(entity = %self.name, field = %dropped, "ignoring undeclared field");
        }
        record
    }

    fn read_document(&self, record: Record) -> Document {
        record
            .into_iter()
            .map(|(column, value)| {
                let on_read = self.schema.get(&column).and_then(|d| d.on_read);
                let json = match (on_read, value) {
                    (Some(Transform::Json), Value::Text(text)) => serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text)),
                    (_, value) => value.into(),
                };
                (column, json)
            })
            .collect()
    }
}

/// The positive `id` a document carries, if any.
pub fn document_id(document: &Document) -> Option<i64> {
    document
        .get("id")
        .map(Value::from)
        .and_then(|v| v.as_i64())
        .filter(|id| *id > 0)
}
