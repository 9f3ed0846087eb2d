use std::sync::Arc;

use serde::Serialize;

use crate::auth::{self, SessionPrincipal};
use crate::config::AppConfig;
use crate::entities::Repositories;
use crate::error::{Error, Result};
use crate::models::{Document, Filter};
use crate::repository::document_id;
use crate::services::ServiceRegistry;

/// Action a bare service path resolves to.
pub const DEFAULT_ACTION: &str = "index";

/// OutputFormat
///
/// Chosen by the request path's extension; a path without one renders HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Html,
    Json,
    Csv,
    Xml,
    Svg,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Some(OutputFormat::Html),
            "json" => Some(OutputFormat::Json),
            "csv" => Some(OutputFormat::Csv),
            "xml" => Some(OutputFormat::Xml),
            "svg" => Some(OutputFormat::Svg),
            _ => None,
        }
    }
}

/// Which printer renders the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterKind {
    Service,
    Page,
}

/// RouteMatch
///
/// The resolved target before authorization. Exactly one of service or page
/// dispatch is active.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteMatch {
    Service {
        service_path: Vec<String>,
        action: String,
        action_params: Vec<String>,
    },
    Page {
        page_id: i64,
        page: Document,
    },
}

/// Dispatch
///
/// The authorized dispatch descriptor. For page dispatch the service fields are
/// empty and `page_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub printer: PrinterKind,
    pub format: OutputFormat,
    pub service_path: Vec<String>,
    pub action: String,
    // The concrete bound method, e.g. `editUser` for the user variant of `edit`.
    pub action_method: String,
    pub action_params: Vec<String>,
    pub page_id: Option<i64>,
    pub request_method: String,
}

impl Dispatch {
    /// Slash-joined service path, e.g. `myserv/test`.
    pub fn service(&self) -> String {
        self.service_path.join("/")
    }
}

/// ParsedPath
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub segments: Vec<String>,
    pub format: OutputFormat,
}

/// RequestRouter
///
/// Maps a request onto a service action or a content page:
///
/// 1. parse: split into segments, pick the output format from the extension
/// 2. activation gate: before first-run activation everything routable goes to
///    `admin/activate`
/// 3. resolve: longest registered service prefix, else a published page
/// 4. authorize: action binding requirement, or the page's group restriction
///
/// Parsing failures and unresolved paths are `NotFound`; authorization
/// failures are `Unauthorized`.
pub struct RequestRouter {
    services: Arc<ServiceRegistry>,
    repos: Repositories,
    activated: bool,
}

impl RequestRouter {
    pub fn new(services: Arc<ServiceRegistry>, repos: Repositories, config: &AppConfig) -> Self {
        Self {
            services,
            repos,
            activated: config.activated,
        }
    }

    pub async fn route(
        &self,
        request_method: &str,
        path: &str,
        principal: &SessionPrincipal,
    ) -> Result<Dispatch> {
        let request_method = request_method.to_ascii_uppercase();

        // 1. Parse (NotFound for hidden or favicon paths)
        let parsed = parse_path(path)?;

        // 2. Activation gate, keeping the requested format
        if !self.activated {
            tracing::info!(path = %path, "site not activated, routing to activation");
            return Ok(Dispatch {
                printer: PrinterKind::Service,
                format: parsed.format,
                service_path: vec!["admin".to_string()],
                action: "activate".to_string(),
                action_method: "activate".to_string(),
                action_params: Vec::new(),
                page_id: None,
                request_method,
            });
        }

        // 3. Resolve to a service action or a page
        let matched = self.resolve(&parsed).await?;

        // 4. Authorize against the principal
        let dispatch = self
            .authorize(matched, parsed.format, request_method, principal)
            .await?;
        tracing::debug!(
            path = %path,
            printer = ?dispatch.printer,
            service = %dispatch.service(),
            action = %dispatch.action_method,
            "route resolved"
        );
        Ok(dispatch)
    }

    /// resolve
    ///
    /// Tries the longest run of leading segments that names a registered
    /// service. The next segment is the action (default `index`) and the rest
    /// are passed through as action parameters. Falls back to a published page
    /// whose path equals the whole request path.
    pub async fn resolve(&self, parsed: &ParsedPath) -> Result<RouteMatch> {
        let segments = &parsed.segments;

        for len in (1..=segments.len()).rev() {
            let service_path = segments[..len].join("/");
            let Some(service) = self.services.get(&service_path) else {
                continue;
            };
            let action = segments
                .get(len)
                .cloned()
                .unwrap_or_else(|| DEFAULT_ACTION.to_string());
            if service.get(&action).is_some() {
                return Ok(RouteMatch::Service {
                    service_path: segments[..len].to_vec(),
                    action,
                    action_params: segments.get(len + 1..).unwrap_or_default().to_vec(),
                });
            }
            tracing::debug!(service = %service_path, action = %action, "unknown action");
            break;
        }

        let page_path = segments.join("/");
        let page = self
            .repos
            .pages
            .first(&Filter::new().eq("path", page_path.as_str()).eq("published", 1))
            .await?;
        match page.and_then(|p| document_id(&p).map(|id| (id, p))) {
            Some((page_id, page)) => Ok(RouteMatch::Page { page_id, page }),
            None => Err(Error::NotFound(format!("no route for /{page_path}"))),
        }
    }

    async fn authorize(
        &self,
        matched: RouteMatch,
        format: OutputFormat,
        request_method: String,
        principal: &SessionPrincipal,
    ) -> Result<Dispatch> {
        match matched {
            RouteMatch::Service {
                service_path,
                action,
                action_params,
            } => {
                let service = self
                    .services
                    .get(&service_path.join("/"))
                    .ok_or_else(|| Error::NotFound(format!("service {}", service_path.join("/"))))?;
                let definition = service
                    .get(&action)
                    .ok_or_else(|| Error::NotFound(format!("action {action}")))?;
                let binding = definition.select_binding(&request_method, principal)?;
                Ok(Dispatch {
                    printer: PrinterKind::Service,
                    format,
                    service_path,
                    action_method: binding.method.clone(),
                    action,
                    action_params,
                    page_id: None,
                    request_method,
                })
            }
            RouteMatch::Page { page_id, page } => {
                auth::authorize_page(&page, principal, &self.repos).await?;
                Ok(Dispatch {
                    printer: PrinterKind::Page,
                    format,
                    service_path: Vec::new(),
                    action: String::new(),
                    action_method: String::new(),
                    action_params: Vec::new(),
                    page_id: Some(page_id),
                    request_method,
                })
            }
        }
    }
}

/// parse_path
///
/// Accepts a bare path or a full URL. Query string and fragment are dropped,
/// empty segments ignored. An extension on the last segment must name an
/// output format; anything else (asset-like paths included) is `NotFound`.
pub fn parse_path(path: &str) -> Result<ParsedPath> {
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |idx| &rest[idx..]),
        None => path,
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let mut segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let mut format = OutputFormat::Html;
    if let Some(last) = segments.last_mut() {
        if let Some((stem, ext)) = last.rsplit_once('.') {
            format = OutputFormat::from_extension(ext)
                .filter(|_| !stem.is_empty())
                .ok_or_else(|| Error::NotFound(format!("unsupported extension .{ext}")))?;
            *last = stem.to_string();
        }
    }

    Ok(ParsedPath { segments, format })
}
