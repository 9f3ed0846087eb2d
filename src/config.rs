use std::{env, path::PathBuf, time::Duration};

/// AppConfig
///
/// Holds the configuration consumed by the persistence layer and the request router.
/// Immutable once loaded and cheap to clone, so it can be pulled out of the
/// application state via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Store connection string, e.g. `sqlite://cms.sqlite?mode=rwc` or `sqlite::memory:`.
    pub db_url: String,
    // How long a statement waits on a locked store before failing.
    pub busy_timeout: Duration,
    // Root of the bundled system assets.
    pub dir_system: PathBuf,
    // Root of the site-specific application assets.
    pub dir_app: PathBuf,
    // False until first-run activation has completed. Every routable request is
    // sent to the activation action while this is false.
    pub activated: bool,
    pub run_mode: RunMode,
    pub bind_addr: String,
    pub unauthorized_policy: UnauthorizedPolicy,
}

/// RunMode
///
/// Development enables the header-based principal bypass and pretty logs;
/// production switches to JSON logs and mandatory settings.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunMode {
    Development,
    Production,
}

/// What the HTTP surface does with an authorization failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnauthorizedPolicy {
    /// Redirect to the login entry point of the failing requirement.
    Redirect,
    /// Answer with a bare 401.
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 20;

impl Default for AppConfig {
    /// Safe values for tests: a private in-memory store, an activated site and
    /// development mode.
    fn default() -> Self {
        Self {
            db_url: "sqlite::memory:".to_string(),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
            dir_system: PathBuf::from("."),
            dir_app: PathBuf::from("app"),
            activated: true,
            run_mode: RunMode::Development,
            bind_addr: "127.0.0.1:0".to_string(),
            unauthorized_policy: UnauthorizedPolicy::Redirect,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the process environment. Production refuses
    /// to start without an explicit `DATABASE_URL`; development falls back to a
    /// local file store.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = match env::var("APP_ENV").as_deref() {
            Ok("production") => RunMode::Production,
            _ => RunMode::Development,
        };

        let db_url = match (run_mode, env::var("DATABASE_URL")) {
            (_, Ok(url)) => url,
            (RunMode::Production, Err(_)) => return Err(ConfigError::Missing("DATABASE_URL")),
            (RunMode::Development, Err(_)) => "sqlite://cms.sqlite?mode=rwc".to_string(),
        };

        let busy_timeout = match env::var("DB_BUSY_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "DB_BUSY_TIMEOUT_SECS",
                value: raw.clone(),
            })?),
            Err(_) => Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
        };

        let activated = match env::var("CMS_ACTIVATED") {
            Ok(raw) => parse_flag("CMS_ACTIVATED", &raw)?,
            Err(_) => false,
        };

        let unauthorized_policy = match env::var("CMS_UNAUTHORIZED").as_deref() {
            Ok("reject") => UnauthorizedPolicy::Reject,
            _ => UnauthorizedPolicy::Redirect,
        };

        Ok(Self {
            db_url,
            busy_timeout,
            dir_system: env::var("CMS_DIR_SYSTEM")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            dir_app: env::var("CMS_DIR_APP")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("app")),
            activated,
            run_mode,
            bind_addr: env::var("CMS_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            unauthorized_policy,
        })
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}
