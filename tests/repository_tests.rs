use cms_core::{
    Error,
    auth::{PasswordHasher, SaltedSha256},
    entities::{self, Repositories},
    models::{ColumnDefinition, Document, EntitySchema, Filter, LogicalType, Transform},
    persistence::{Persistence, PersistenceState, SqliteEngine},
    repository::Repository,
    validation::ValidationRule,
};
use serde_json::json;
use std::sync::Arc;

// --- Test Context and Setup ---

async fn store() -> PersistenceState {
    Arc::new(SqliteEngine::in_memory().await.expect("in-memory store should open"))
}

fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn member_schema() -> EntitySchema {
    EntitySchema::new()
        .column(
            "login",
            ColumnDefinition::new(LogicalType::String)
                .rule(ValidationRule::required())
                .rule(ValidationRule::unique())
                .rule(ValidationRule::length(3, 12)),
        )
        .column(
            "email",
            ColumnDefinition::new(LogicalType::String)
                .rule(ValidationRule::email().with_message("bad address")),
        )
        .column(
            "prefs",
            ColumnDefinition::new(LogicalType::Text)
                .on_save(Transform::Json)
                .on_read(Transform::Json),
        )
        .column("visits", ColumnDefinition::new(LogicalType::Int).default_value(0))
}

async fn members() -> (Repository, PersistenceState) {
    let store = store().await;
    (Repository::new("Member", member_schema(), store.clone()), store)
}

// --- Save / Read ---

#[tokio::test]
async fn test_save_inserts_and_returns_ids_in_order() {
    let (repo, _) = members().await;

    let ids = repo
        .save(vec![
            doc(json!({"login": "alice"})),
            doc(json!({"login": "bob", "email": "bob@example.com"})),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2]);

    let bob = repo.get(2).await.unwrap().expect("bob stored");
    assert_eq!(bob["login"], json!("bob"));
    assert_eq!(bob["visits"], json!(0));
    assert!(bob.contains_key("created"));
    assert!(bob.contains_key("updated"));
}

#[tokio::test]
async fn test_save_with_id_updates_in_place() {
    let (repo, _) = members().await;
    let id = repo.save(vec![doc(json!({"login": "alice"}))]).await.unwrap()[0];

    let ids = repo
        .save(vec![doc(json!({"id": id, "email": "alice@example.com"}))])
        .await
        .unwrap();
    assert_eq!(ids, vec![id]);

    let alice = repo.get(id).await.unwrap().unwrap();
    assert_eq!(alice["login"], json!("alice"));
    assert_eq!(alice["email"], json!("alice@example.com"));
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_undeclared_fields_are_dropped() {
    let (repo, store) = members().await;
    let id = repo
        .save(vec![doc(json!({"login": "carol", "isAdmin": 1}))])
        .await
        .unwrap()[0];

    let columns: Vec<String> = store
        .columns_of("Member")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(!columns.contains(&"isAdmin".to_string()));
    assert!(!repo.get(id).await.unwrap().unwrap().contains_key("isAdmin"));
}

#[tokio::test]
async fn test_json_transform_round_trips_structured_values() {
    let (repo, store) = members().await;
    let prefs = json!({"theme": "dark", "tags": ["a", "b"]});
    let id = repo
        .save(vec![doc(json!({"login": "dave", "prefs": prefs}))])
        .await
        .unwrap()[0];

    // Stored as text.
    let raw = store.get("Member", id).await.unwrap().unwrap();
    assert!(raw.get("prefs").and_then(|v| v.as_str()).is_some());

    let read = repo.get(id).await.unwrap().unwrap();
    assert_eq!(read["prefs"], prefs);
}

#[tokio::test]
async fn test_list_and_first_follow_id_order() {
    let (repo, _) = members().await;
    repo.save(vec![
        doc(json!({"login": "zed", "visits": 2})),
        doc(json!({"login": "amy", "visits": 2})),
        doc(json!({"login": "kim", "visits": 1})),
    ])
    .await
    .unwrap();

    let frequent = repo.list(&Filter::new().eq("visits", 2)).await.unwrap();
    let logins: Vec<&str> = frequent.iter().filter_map(|d| d["login"].as_str()).collect();
    assert_eq!(logins, vec!["zed", "amy"]);

    let first = repo.first(&Filter::new().eq("visits", 1)).await.unwrap().unwrap();
    assert_eq!(first["login"], json!("kim"));
    assert!(repo.first(&Filter::new().eq("visits", 9)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_and_delete_all() {
    let (repo, _) = members().await;
    let ids = repo
        .save(vec![
            doc(json!({"login": "one", "visits": 1})),
            doc(json!({"login": "two", "visits": 1})),
            doc(json!({"login": "three"})),
        ])
        .await
        .unwrap();

    assert_eq!(repo.delete(ids[2]).await.unwrap(), 1);
    assert_eq!(repo.delete_all(&Filter::new().eq("visits", 1)).await.unwrap(), 2);
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_all_without_condition_is_rejected() {
    let (repo, _) = members().await;
    repo.save(vec![doc(json!({"login": "keep"}))]).await.unwrap();

    let err = repo.delete_all(&Filter::new()).await.unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_save_with_unknown_id_is_not_found() {
    let (repo, _) = members().await;
    let id = repo.save(vec![doc(json!({"login": "real"}))]).await.unwrap()[0];

    let err = repo
        .save(vec![
            doc(json!({"id": id, "login": "renamed"})),
            doc(json!({"id": id + 40, "login": "ghost"})),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // The valid update in the same batch was not applied either.
    let stored = repo.get(id).await.unwrap().unwrap();
    assert_eq!(stored["login"], json!("real"));
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 1);
}

// --- Validation ---

#[tokio::test]
async fn test_batch_with_one_invalid_document_writes_nothing() {
    let (repo, _) = members().await;

    let err = repo
        .save(vec![
            doc(json!({"login": "valid"})),
            doc(json!({"login": "", "email": "not-an-email"})),
        ])
        .await
        .unwrap_err();

    let Error::Validation(errors) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(errors.get("login"), Some(&["is required".to_string()][..]));
    assert_eq!(errors.get("email"), Some(&["bad address".to_string()][..]));
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_length_rule() {
    let (repo, _) = members().await;
    let err = repo
        .save(vec![doc(json!({"login": "ab"}))])
        .await
        .unwrap_err();
    assert_eq!(err.code(), 422);
}

#[tokio::test]
async fn test_unique_rule_checks_stored_rows_but_not_itself() {
    let (repo, _) = members().await;
    let id = repo.save(vec![doc(json!({"login": "erin"}))]).await.unwrap()[0];

    let duplicate = repo.save(vec![doc(json!({"login": "erin"}))]).await;
    assert!(matches!(duplicate, Err(Error::Validation(_))));

    // Re-saving the owner of the value is not a conflict.
    repo.save(vec![doc(json!({"id": id, "login": "erin"}))])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unique_rule_applies_within_one_batch() {
    let (repo, _) = members().await;

    let err = repo
        .save(vec![
            doc(json!({"login": "twin"})),
            doc(json!({"login": "other"})),
            doc(json!({"login": "twin"})),
        ])
        .await
        .unwrap_err();

    let Error::Validation(errors) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(errors.get("login"), Some(&["is already in use".to_string()][..]));
    assert_eq!(repo.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_manager_batch_with_duplicate_login_writes_nothing() {
    let repos = Repositories::new(store().await);

    let result = repos
        .managers
        .save(vec![
            doc(json!({"managerId": "boss", "password": "pw", "name": "A", "email": "a@example.com"})),
            doc(json!({"managerId": "boss", "password": "pw", "name": "B", "email": "b@example.com"})),
        ])
        .await;

    let Err(Error::Validation(errors)) = result else {
        panic!("expected a validation error");
    };
    assert!(errors.get("managerId").is_some());
    assert!(errors.get("email").is_none());
    assert_eq!(repos.managers.count(&Filter::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unique_in_other_entity() {
    let store = store().await;
    let users = Repository::new(entities::USER, entities::user_schema(), store.clone());
    users
        .save(vec![doc(json!({"userId": "frank", "password": "pw"}))])
        .await
        .unwrap();

    let schema = EntitySchema::new().column(
        "userId",
        ColumnDefinition::new(LogicalType::String).rule(ValidationRule::unique_in(entities::USER)),
    );
    let invites = Repository::new("Invite", schema, store);

    assert!(invites.save(vec![doc(json!({"userId": "frank"}))]).await.is_err());
    invites.save(vec![doc(json!({"userId": "gina"}))]).await.unwrap();
}

#[tokio::test]
async fn test_not_null_columns_without_default_are_required() {
    let engine = SqliteEngine::in_memory().await.unwrap();
    sqlx::query("CREATE TABLE \"Ticket\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"code\" TEXT NOT NULL, \"state\" TEXT NOT NULL DEFAULT 'open', \"created\" TIMESTAMP, \"updated\" TIMESTAMP)")
        .execute(engine.pool())
        .await
        .unwrap();
    let store: PersistenceState = Arc::new(engine);

    let schema = EntitySchema::new()
        .column("code", ColumnDefinition::new(LogicalType::String))
        .column("state", ColumnDefinition::new(LogicalType::String));
    let tickets = Repository::new("Ticket", schema, store);

    let Err(Error::Validation(errors)) = tickets.save(vec![doc(json!({"state": "new"}))]).await
    else {
        panic!("expected a validation error");
    };
    assert!(errors.get("code").is_some());
    assert!(errors.get("state").is_none());

    tickets.save(vec![doc(json!({"code": "T-1"}))]).await.unwrap();
}

// --- Built-in entities ---

#[tokio::test]
async fn test_manager_passwords_are_hashed_once() {
    let repos = Repositories::new(store().await);
    let id = repos
        .managers
        .save(vec![doc(json!({
            "managerId": "root",
            "password": "secret",
            "name": "Root",
            "email": "root@example.com",
            "info": {"phone": "123"}
        }))])
        .await
        .unwrap()[0];

    let stored = repos.managers.get(id).await.unwrap().unwrap();
    let hashed = stored["password"].as_str().unwrap().to_string();
    assert_ne!(hashed, "secret");
    assert!(SaltedSha256.verify("secret", &hashed));
    assert_eq!(stored["info"], json!({"phone": "123"}));

    // Saving the stored document back must not hash the hash.
    repos.managers.save(vec![stored]).await.unwrap();
    let again = repos.managers.get(id).await.unwrap().unwrap();
    assert_eq!(again["password"], json!(hashed));
}

#[tokio::test]
async fn test_manager_requires_its_mandatory_fields() {
    let repos = Repositories::new(store().await);
    let Err(Error::Validation(errors)) = repos
        .managers
        .save(vec![doc(json!({"managerId": "m"}))])
        .await
    else {
        panic!("expected a validation error");
    };
    let fields: Vec<&str> = errors.fields().collect();
    assert_eq!(fields, vec!["email", "name", "password"]);
}
