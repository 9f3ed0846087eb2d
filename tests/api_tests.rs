use cms_core::{
    AppConfig, AppState, create_router,
    auth::{AuthRequirement, MemorySessionStore, SessionData, SessionStore},
    config::UnauthorizedPolicy,
    models::Document,
    persistence::{PersistenceState, SqliteEngine},
    services::{ActionDefinition, ServiceDefinition, ServiceRegistry},
};
use reqwest::{StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn services() -> ServiceRegistry {
    ServiceRegistry::builtin().register(
        ServiceDefinition::new("test")
            .action(ActionDefinition::public("action"))
            .action(ActionDefinition::gated("auth1", AuthRequirement::User))
            .action(ActionDefinition::gated("auth2", AuthRequirement::Admin)),
    )
}

async fn spawn_app(config: AppConfig) -> TestApp {
    let store: PersistenceState = Arc::new(
        SqliteEngine::in_memory()
            .await
            .expect("Failed to open the in-memory store"),
    );

    let sessions = Arc::new(MemorySessionStore::new());
    let mut admin_session = SessionData::new();
    admin_session.insert("is_admin".to_string(), json!(true));
    sessions.store("admin-session", admin_session);

    let state = AppState::new(store, services(), sessions, config);

    state
        .repos
        .users
        .save(vec![doc(json!({"userId": "member", "password": "pw"}))])
        .await
        .expect("seed user");
    state
        .repos
        .user_groups
        .save(vec![doc(json!({"name": "members", "userIds": "|1|"}))])
        .await
        .expect("seed group");
    state
        .repos
        .pages
        .save(vec![
            doc(json!({"name": "top", "path": "", "published": 1})),
            doc(json!({"name": "hidden", "path": "hidden", "published": 0})),
            doc(json!({"name": "member", "path": "member", "published": 1, "allowedUserGroupIds": "|1|"})),
        ])
        .await
        .expect("seed pages");

    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp { address, client }
}

impl TestApp {
    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("req fail")
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app(AppConfig::default()).await;
    let response = app.get("/health").await;
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_service_dispatch_descriptor() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app.get("/test/action/7.json").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["printer"], "service");
    assert_eq!(body["format"], "json");
    assert_eq!(body["service"], "test");
    assert_eq!(body["action"], "action");
    assert_eq!(body["action_method"], "action");
    assert_eq!(body["action_params"], json!(["7"]));
    assert_eq!(body["page_id"], Value::Null);
    assert_eq!(body["request_method"], "GET");
}

#[tokio::test]
async fn test_page_dispatch_descriptor() {
    let app = spawn_app(AppConfig::default()).await;

    let body: Value = app.get("/").await.json().await.unwrap();
    assert_eq!(body["printer"], "page");
    assert_eq!(body["page_id"], 1);
    assert_eq!(body["service"], "");
}

#[tokio::test]
async fn test_not_found_paths() {
    let app = spawn_app(AppConfig::default()).await;
    for path in ["/hidden", "/favicon.ico", "/no/such/thing", "/test/missing"] {
        assert_eq!(app.get(path).await.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_unauthorized_redirects_to_login() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app.get("/test/auth2").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/admin/login");

    let response = app.get("/member").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/user/login");
}

#[tokio::test]
async fn test_reject_policy_answers_401() {
    let app = spawn_app(AppConfig {
        unauthorized_policy: UnauthorizedPolicy::Reject,
        ..AppConfig::default()
    })
    .await;
    assert_eq!(app.get("/test/auth1").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_development_headers_identify_the_principal() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app
        .client
        .get(format!("{}/member", app.address))
        .header("x-user-id", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Unknown users are dropped from the principal.
    let response = app
        .client
        .get(format!("{}/test/auth1", app.address))
        .header("x-user-id", "42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_admin_header_grants_nothing() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app
        .client
        .get(format!("{}/test/auth2", app.address))
        .header("x-admin", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/admin/login");
}

#[tokio::test]
async fn test_unresolved_headers_fall_through_to_the_cookie() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app
        .client
        .get(format!("{}/test/auth2", app.address))
        .header("x-user-id", "42")
        .header(header::COOKIE, "cms_session=admin-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["action_method"], "auth2Admin");
}

#[tokio::test]
async fn test_session_cookie_identifies_the_principal() {
    let app = spawn_app(AppConfig::default()).await;

    let response = app
        .client
        .get(format!("{}/test/auth2", app.address))
        .header(header::COOKIE, "cms_session=admin-session")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .client
        .get(format!("{}/test/auth2", app.address))
        .header(header::COOKIE, "cms_session=unknown")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_unactivated_site_serves_activation() {
    let app = spawn_app(AppConfig {
        activated: false,
        ..AppConfig::default()
    })
    .await;

    let body: Value = app.get("/member").await.json().await.unwrap();
    assert_eq!(body["service"], "admin");
    assert_eq!(body["action"], "activate");

    assert_eq!(app.get("/fabicon.ico").await.status(), StatusCode::NOT_FOUND);
}
