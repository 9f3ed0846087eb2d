use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::{AppConfig, RunMode},
    entities::Repositories,
    error::{Error, Result},
    models::{Document, Filter, Value},
};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "cms_session";

// --- Principal ---

/// SessionPrincipal
///
/// Who is making the current request. The admin flag is orthogonal to the
/// manager and user identities and may co-occur with either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPrincipal {
    pub is_admin: bool,
    pub manager_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl SessionPrincipal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Self::default()
        }
    }

    pub fn user(id: i64) -> Self {
        Self {
            user_id: Some(id),
            ..Self::default()
        }
    }

    pub fn manager(id: i64) -> Self {
        Self {
            manager_id: Some(id),
            ..Self::default()
        }
    }

    /// Reads the unverified principal out of a session snapshot. Ids that are
    /// not positive integers are ignored.
    pub fn from_session(session: &SessionData) -> Self {
        let id = |key: &str| {
            session
                .get(key)
                .map(Value::from)
                .and_then(|v| v.as_i64())
                .filter(|id| *id > 0)
        };
        Self {
            is_admin: session
                .get("is_admin")
                .is_some_and(|v| v.as_bool() == Some(true) || v.as_i64() == Some(1)),
            manager_id: id("manager_id"),
            user_id: id("user_id"),
        }
    }
}

/// load_principal
///
/// Resolves the principal of a session, keeping only manager and user ids
/// that still exist in their repositories.
pub async fn load_principal(session: &SessionData, repos: &Repositories) -> Result<SessionPrincipal> {
    let mut principal = SessionPrincipal::from_session(session);

    if let Some(id) = principal.manager_id {
        if repos.managers.get(id).await?.is_none() {
            tracing::debug!(manager_id = id, "session manager no longer exists");
            principal.manager_id = None;
        }
    }
    if let Some(id) = principal.user_id {
        if repos.users.get(id).await?.is_none() {
            tracing::debug!(user_id = id, "session user no longer exists");
            principal.user_id = None;
        }
    }

    Ok(principal)
}

// --- Session Store ---

/// One session's key-value snapshot.
pub type SessionData = HashMap<String, serde_json::Value>;

/// SessionStore
///
/// Opaque key-value session storage. Transport (cookies, expiry) is the HTTP
/// layer's concern; this trait only loads and stores snapshots by id.
pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Option<SessionData>;
    fn store(&self, session_id: &str, data: SessionData);
    fn remove(&self, session_id: &str);
}

pub type SessionState = Arc<dyn SessionStore>;

/// Process-local session storage.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_id: &str) -> Option<SessionData> {
        self.sessions.read().get(session_id).cloned()
    }

    fn store(&self, session_id: &str, data: SessionData) {
        self.sessions.write().insert(session_id.to_string(), data);
    }

    fn remove(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }
}

// --- Access Policy ---

/// AuthRequirement
///
/// The gate an action binding declares. Variants are ordered from least to
/// most strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthRequirement {
    None,
    User,
    Manager,
    Admin,
}

impl AuthRequirement {
    pub fn is_authorized(self, principal: &SessionPrincipal) -> bool {
        match self {
            AuthRequirement::None => true,
            AuthRequirement::User => principal.user_id.is_some(),
            AuthRequirement::Manager => principal.manager_id.is_some(),
            AuthRequirement::Admin => principal.is_admin,
        }
    }

    /// Lowercase component name, also the first segment of its login path.
    pub fn name(self) -> &'static str {
        match self {
            AuthRequirement::None => "",
            AuthRequirement::User => "user",
            AuthRequirement::Manager => "manager",
            AuthRequirement::Admin => "admin",
        }
    }

    /// Suffix appended to an action name to form the bound method name.
    pub fn method_suffix(self) -> &'static str {
        match self {
            AuthRequirement::None => "",
            AuthRequirement::User => "User",
            AuthRequirement::Manager => "Manager",
            AuthRequirement::Admin => "Admin",
        }
    }

    /// Login entry point derived from the component name, e.g. `admin/login`.
    pub fn login_path(self) -> String {
        match self {
            AuthRequirement::None => "login".to_string(),
            other => format!("{}/login", other.name()),
        }
    }

    pub fn authenticate(self, principal: &SessionPrincipal) -> Result<()> {
        if self.is_authorized(principal) {
            Ok(())
        } else {
            tracing::debug!(requirement = self.name(), "authorization failed");
            Err(Error::unauthorized(self.login_path()))
        }
    }
}

/// authorize_page
///
/// A page with an empty allowed-group list is public. Otherwise the principal
/// must be an admin or a user belonging to one of the listed groups.
pub async fn authorize_page(
    page: &Document,
    principal: &SessionPrincipal,
    repos: &Repositories,
) -> Result<()> {
    let allowed = parse_id_list(page.get("allowedUserGroupIds"));
    if allowed.is_empty() || principal.is_admin {
        return Ok(());
    }

    let Some(user_id) = principal.user_id else {
        return Err(Error::unauthorized(AuthRequirement::User.login_path()));
    };

    let groups = repos
        .user_groups
        .list(&Filter::new().any_of("id", allowed))
        .await?;
    let member = groups
        .iter()
        .any(|group| parse_id_list(group.get("userIds")).contains(&user_id));

    if member {
        Ok(())
    } else {
        tracing::debug!(user_id, "user is not in any group allowed on the page");
        Err(Error::unauthorized(AuthRequirement::User.login_path()))
    }
}

/// Parses a `|1|2|` (or comma separated) id list.
pub fn parse_id_list(value: Option<&serde_json::Value>) -> Vec<i64> {
    match value {
        Some(serde_json::Value::String(s)) => s
            .split(['|', ','])
            .filter_map(|part| part.trim().parse().ok())
            .collect(),
        Some(serde_json::Value::Number(n)) => n.as_i64().into_iter().collect(),
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(|v| v.as_i64()).collect(),
        _ => Vec::new(),
    }
}

// --- Password Hashing ---

/// Password hashing capability consumed by `PasswordHash` transforms.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
    fn verify(&self, password: &str, hashed: &str) -> bool;
    /// True when `value` already has this hasher's output shape.
    fn is_hashed(&self, value: &str) -> bool;
}

/// Salted SHA-256 in `hash:salt$version$` form.
pub struct SaltedSha256;

const HASH_VERSION: u32 = 0;

impl SaltedSha256 {
    fn digest(password: &str, salt: &str, version: u32) -> String {
        let hash = Sha256::digest(format!("{password}{salt}").as_bytes());
        format!("{hash:x}:{salt}${version}$")
    }

    fn split(hashed: &str) -> Option<(&str, &str, u32)> {
        let (hash, rest) = hashed.split_once(':')?;
        let mut parts = rest.split('$');
        let salt = parts.next()?;
        let version = parts.next()?.parse().ok()?;
        match parts.next() {
            Some("") if parts.next().is_none() => Some((hash, salt, version)),
            _ => None,
        }
    }
}

impl PasswordHasher for SaltedSha256 {
    fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; 24];
        rand::rng().fill_bytes(&mut salt);
        let salt: String = salt.iter().map(|b| format!("{b:02x}")).collect();
        Self::digest(password, &salt, HASH_VERSION)
    }

    fn verify(&self, password: &str, hashed: &str) -> bool {
        match Self::split(hashed) {
            Some((_, salt, version)) => Self::digest(password, salt, version) == hashed,
            None => false,
        }
    }

    fn is_hashed(&self, value: &str) -> bool {
        Self::split(value)
            .is_some_and(|(hash, _, _)| hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

// --- HTTP Extraction ---

/// Resolves the principal for an HTTP request.
///
/// 1. Development bypass: `x-manager-id` and `x-user-id` headers are treated
///    as a session snapshot. Admin rights are never taken from a header.
/// 2. Ids are verified against their repositories. A header snapshot that
///    resolves to no identity falls through to step 3.
/// 3. The `cms_session` cookie names a snapshot in the session store, which is
///    verified the same way.
///
/// Requests with no session are anonymous.
impl<S> FromRequestParts<S> for SessionPrincipal
where
    S: Send + Sync,
    SessionState: FromRef<S>,
    Repositories: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let config = AppConfig::from_ref(state);
        let repos = Repositories::from_ref(state);

        // 1. & 2. Header bypass, kept only when the ids exist
        if config.run_mode == RunMode::Development {
            if let Some(session) = header_session(&parts.headers) {
                let principal = load_principal(&session, &repos).await?;
                if principal != SessionPrincipal::anonymous() {
                    tracing::debug!(?principal, "principal taken from development headers");
                    return Ok(principal);
                }
                tracing::debug!("development headers name no stored identity");
            }
        }

        // 3. Cookie session
        let Some(session_id) = session_cookie(&parts.headers) else {
            return Ok(SessionPrincipal::anonymous());
        };
        let sessions = SessionState::from_ref(state);
        match sessions.load(&session_id) {
            Some(session) => load_principal(&session, &repos).await,
            None => Ok(SessionPrincipal::anonymous()),
        }
    }
}

fn header_session(headers: &HeaderMap) -> Option<SessionData> {
    let mut session = SessionData::new();
    for (header, key) in [("x-manager-id", "manager_id"), ("x-user-id", "user_id")] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            session.insert(
                key.to_string(),
                serde_json::Value::String(value.trim().to_string()),
            );
        }
    }
    (!session.is_empty()).then_some(session)
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}
