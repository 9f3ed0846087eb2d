use cms_core::{
    Error,
    auth::{
        AuthRequirement, MemorySessionStore, PasswordHasher, SaltedSha256, SessionData,
        SessionPrincipal, SessionStore, authorize_page, load_principal,
    },
    entities::Repositories,
    models::Document,
    persistence::{PersistenceState, SqliteEngine},
};
use serde_json::json;
use std::sync::Arc;

// --- Test Context and Setup ---

async fn repos() -> Repositories {
    let store: PersistenceState =
        Arc::new(SqliteEngine::in_memory().await.expect("in-memory store should open"));
    Repositories::new(store)
}

fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn session(value: serde_json::Value) -> SessionData {
    doc(value).into_iter().collect()
}

// --- Requirements ---

#[test]
fn test_requirement_checks_are_independent() {
    let admin_manager = SessionPrincipal {
        is_admin: true,
        manager_id: Some(3),
        user_id: None,
    };

    assert!(AuthRequirement::None.is_authorized(&SessionPrincipal::anonymous()));
    assert!(AuthRequirement::Admin.is_authorized(&admin_manager));
    assert!(AuthRequirement::Manager.is_authorized(&admin_manager));
    assert!(!AuthRequirement::User.is_authorized(&admin_manager));
}

#[test]
fn test_failed_requirement_names_its_login_path() {
    let anonymous = SessionPrincipal::anonymous();
    for (requirement, login) in [
        (AuthRequirement::User, "user/login"),
        (AuthRequirement::Manager, "manager/login"),
        (AuthRequirement::Admin, "admin/login"),
    ] {
        match requirement.authenticate(&anonymous) {
            Err(Error::Unauthorized { login: got }) => assert_eq!(got, login),
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }
    assert!(AuthRequirement::None.authenticate(&anonymous).is_ok());
}

#[test]
fn test_unauthorized_is_not_not_found() {
    let err = AuthRequirement::Admin
        .authenticate(&SessionPrincipal::anonymous())
        .unwrap_err();
    assert_eq!(err.code(), 401);
    assert_eq!(Error::NotFound("x".into()).code(), 404);
}

// --- Principal Loading ---

#[tokio::test]
async fn test_load_principal_keeps_existing_identities() {
    let repos = repos().await;
    let user_id = repos
        .users
        .save(vec![doc(json!({"userId": "u1", "password": "pw"}))])
        .await
        .unwrap()[0];

    let principal = load_principal(
        &session(json!({"user_id": user_id, "manager_id": 77, "is_admin": true})),
        &repos,
    )
    .await
    .unwrap();

    assert_eq!(principal.user_id, Some(user_id));
    // No such manager row.
    assert_eq!(principal.manager_id, None);
    assert!(principal.is_admin);
}

#[tokio::test]
async fn test_load_principal_of_empty_session_is_anonymous() {
    let repos = repos().await;
    let principal = load_principal(&SessionData::new(), &repos).await.unwrap();
    assert_eq!(principal, SessionPrincipal::anonymous());
}

#[test]
fn test_from_session_ignores_malformed_ids() {
    let principal =
        SessionPrincipal::from_session(&session(json!({"user_id": "abc", "manager_id": -2, "is_admin": 1})));
    assert_eq!(principal.user_id, None);
    assert_eq!(principal.manager_id, None);
    assert!(principal.is_admin);
}

#[test]
fn test_memory_session_store() {
    let store = MemorySessionStore::new();
    assert!(store.load("s1").is_none());

    store.store("s1", session(json!({"user_id": 5})));
    assert_eq!(store.load("s1").unwrap()["user_id"], json!(5));

    store.remove("s1");
    assert!(store.load("s1").is_none());
}

// --- Page Access ---

#[tokio::test]
async fn test_page_with_empty_group_list_is_public() {
    let repos = repos().await;
    let page = doc(json!({"id": 1, "allowedUserGroupIds": ""}));
    authorize_page(&page, &SessionPrincipal::anonymous(), &repos)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_page_requires_group_membership() {
    let repos = repos().await;
    let ids = repos
        .user_groups
        .save(vec![
            doc(json!({"name": "staff", "userIds": "|1|"})),
            doc(json!({"name": "guests", "userIds": "|2|3|"})),
        ])
        .await
        .unwrap();
    let page = doc(json!({"id": 9, "allowedUserGroupIds": format!("|{}|", ids[1])}));

    assert!(authorize_page(&page, &SessionPrincipal::user(3), &repos).await.is_ok());
    assert!(authorize_page(&page, &SessionPrincipal::admin(), &repos).await.is_ok());

    let denied = authorize_page(&page, &SessionPrincipal::user(1), &repos).await;
    assert!(matches!(denied, Err(Error::Unauthorized { .. })));
    let anonymous = authorize_page(&page, &SessionPrincipal::anonymous(), &repos).await;
    assert!(matches!(anonymous, Err(Error::Unauthorized { .. })));
}

// --- Password Hashing ---

#[test]
fn test_hash_format_and_salting() {
    let hasher = SaltedSha256;
    let first = hasher.hash("pw");
    let second = hasher.hash("pw");

    assert_ne!(first, second);
    let (digest, rest) = first.split_once(':').unwrap();
    assert_eq!(digest.len(), 64);
    assert!(rest.ends_with("$0$"));
    assert!(hasher.verify("pw", &second));
    assert!(!hasher.verify("pw", "garbage"));
}
