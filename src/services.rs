use std::collections::BTreeMap;

use crate::auth::{AuthRequirement, SessionPrincipal};
use crate::error::{Error, Result};

/// ActionBinding
///
/// One concrete handler method an action can dispatch to, gated by an auth
/// requirement and optionally restricted to some request methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBinding {
    pub method: String,
    pub requirement: AuthRequirement,
    // Uppercase verbs; empty accepts any.
    pub verbs: Vec<String>,
}

impl ActionBinding {
    fn accepts(&self, verb: &str) -> bool {
        self.verbs.is_empty() || self.verbs.iter().any(|v| v.eq_ignore_ascii_case(verb))
    }
}

/// ActionDefinition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDefinition {
    pub name: String,
    pub bindings: Vec<ActionBinding>,
}

impl ActionDefinition {
    /// An action with no bindings yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    /// An ungated action bound to a method of the same name.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new(name).allow(AuthRequirement::None)
    }

    /// An action bound only for principals meeting `requirement`.
    pub fn gated(name: impl Into<String>, requirement: AuthRequirement) -> Self {
        Self::new(name).allow(requirement)
    }

    /// Adds a binding whose method name is the action name plus the
    /// requirement's suffix, e.g. `edit` + `Admin` = `editAdmin`.
    pub fn allow(self, requirement: AuthRequirement) -> Self {
        let method = format!("{}{}", self.name, requirement.method_suffix());
        self.bind(method, requirement)
    }

    pub fn bind(mut self, method: impl Into<String>, requirement: AuthRequirement) -> Self {
        self.bindings.push(ActionBinding {
            method: method.into(),
            requirement,
            verbs: Vec::new(),
        });
        self
    }

    /// Restricts the most recently added binding to the given verbs.
    pub fn on(mut self, verbs: &[&str]) -> Self {
        if let Some(binding) = self.bindings.last_mut() {
            binding.verbs = verbs.iter().map(|v| v.to_ascii_uppercase()).collect();
        }
        self
    }

    /// select_binding
    ///
    /// Picks the strictest binding the principal satisfies, so an admin reaches
    /// the admin variant even when an anonymous one exists. When bindings exist
    /// but none is satisfied, the failure names the least strict requirement's
    /// login entry point. No binding for the verb is `NotFound`.
    pub fn select_binding(&self, verb: &str, principal: &SessionPrincipal) -> Result<&ActionBinding> {
        let mut candidates: Vec<&ActionBinding> =
            self.bindings.iter().filter(|b| b.accepts(verb)).collect();
        if candidates.is_empty() {
            return Err(Error::NotFound(format!(
                "action {} does not accept {verb}",
                self.name
            )));
        }
        candidates.sort_by(|a, b| b.requirement.cmp(&a.requirement));

        if let Some(binding) = candidates
            .iter()
            .find(|b| b.requirement.is_authorized(principal))
        {
            return Ok(*binding);
        }

        // Sorted strictest first, so the last candidate is the least strict.
        let weakest = candidates[candidates.len() - 1].requirement;
        tracing::debug!(action = %self.name, requirement = weakest.name(), "no binding authorized");
        Err(Error::unauthorized(weakest.login_path()))
    }
}

/// ServiceDefinition
///
/// A named service, optionally nested under sub-directories (`myserv/test`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub path: String,
    actions: BTreeMap<String, ActionDefinition>,
}

impl ServiceDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into().trim_matches('/').to_string(),
            actions: BTreeMap::new(),
        }
    }

    pub fn action(mut self, action: ActionDefinition) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn get(&self, action: &str) -> Option<&ActionDefinition> {
        self.actions.get(action)
    }

    pub fn segments(&self) -> Vec<String> {
        self.path.split('/').map(str::to_string).collect()
    }
}

/// ServiceRegistry
///
/// The services the router may dispatch to, keyed by slash-joined path.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDefinition>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, service: ServiceDefinition) -> Self {
        self.services.insert(service.path.clone(), service);
        self
    }

    pub fn get(&self, path: &str) -> Option<&ServiceDefinition> {
        self.services.get(path)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// The services every site carries: activation plus the login entry points
    /// authorization failures redirect to.
    pub fn builtin() -> Self {
        [AuthRequirement::Admin, AuthRequirement::Manager, AuthRequirement::User]
            .into_iter()
            .fold(Self::new(), |registry, requirement| {
                let mut service = ServiceDefinition::new(requirement.name())
                    .action(ActionDefinition::public("login"))
                    .action(ActionDefinition::public("logout"))
                    .action(ActionDefinition::gated("index", requirement));
                if requirement == AuthRequirement::Admin {
                    service = service.action(ActionDefinition::public("activate"));
                }
                registry.register(service)
            })
    }
}
