//! Built-in entity schemas and the repositories bound to them.

use std::sync::Arc;

use crate::auth::PasswordHasher;
use crate::models::{ColumnDefinition, EntitySchema, LogicalType, Transform};
use crate::persistence::PersistenceState;
use crate::repository::Repository;
use crate::validation::ValidationRule;

pub const MANAGER: &str = "Manager";
pub const USER: &str = "User";
pub const PAGE: &str = "Page";
pub const USER_GROUP: &str = "UserGroup";

fn string() -> ColumnDefinition {
    ColumnDefinition::new(LogicalType::String)
}

/// Site managers. Login ids and emails are unique; passwords are hashed on save.
pub fn manager_schema() -> EntitySchema {
    EntitySchema::new()
        .column(
            "managerId",
            string()
                .label("Manager ID")
                .rule(ValidationRule::required())
                .rule(ValidationRule::unique()),
        )
        .column(
            "password",
            string()
                .label("Password")
                .rule(ValidationRule::required())
                .on_save(Transform::PasswordHash),
        )
        .column("name", string().label("Name").rule(ValidationRule::required()))
        .column(
            "email",
            string()
                .label("Email")
                .rule(ValidationRule::required())
                .rule(ValidationRule::unique())
                .rule(ValidationRule::email()),
        )
        .column(
            "info",
            string()
                .label("Manager info")
                .on_save(Transform::Json)
                .on_read(Transform::Json),
        )
        .column("token", string().label("API token"))
}

/// Site members.
pub fn user_schema() -> EntitySchema {
    EntitySchema::new()
        .column(
            "userId",
            string()
                .label("User ID")
                .rule(ValidationRule::required())
                .rule(ValidationRule::unique()),
        )
        .column(
            "password",
            string()
                .label("Password")
                .rule(ValidationRule::required())
                .on_save(Transform::PasswordHash),
        )
        .column("name", string().label("Name"))
        .column(
            "email",
            string()
                .label("Email")
                .rule(ValidationRule::unique())
                .rule(ValidationRule::email()),
        )
        .column(
            "info",
            string()
                .label("User info")
                .on_save(Transform::Json)
                .on_read(Transform::Json),
        )
}

/// CMS-managed content pages. `allowedUserGroupIds` is a `|id|id|` list; empty
/// means public.
pub fn page_schema() -> EntitySchema {
    EntitySchema::new()
        .column("templateId", ColumnDefinition::new(LogicalType::Int))
        .column("name", string().rule(ValidationRule::required()))
        .column("path", string())
        .column(
            "published",
            ColumnDefinition::new(LogicalType::Int).default_value(0),
        )
        .column("allowedUserGroupIds", string().default_value(""))
}

/// Named groups of users; `userIds` is a `|id|id|` list.
pub fn user_group_schema() -> EntitySchema {
    EntitySchema::new()
        .column("name", string().rule(ValidationRule::required()))
        .column("userIds", string().default_value(""))
}

/// Repositories
///
/// The built-in repositories the access policy and the router consult.
#[derive(Clone)]
pub struct Repositories {
    pub managers: Arc<Repository>,
    pub users: Arc<Repository>,
    pub pages: Arc<Repository>,
    pub user_groups: Arc<Repository>,
}

impl Repositories {
    pub fn new(store: PersistenceState) -> Self {
        Self {
            managers: Arc::new(Repository::new(MANAGER, manager_schema(), store.clone())),
            users: Arc::new(Repository::new(USER, user_schema(), store.clone())),
            pages: Arc::new(Repository::new(PAGE, page_schema(), store.clone())),
            user_groups: Arc::new(Repository::new(USER_GROUP, user_group_schema(), store)),
        }
    }

    /// Same repositories with a custom password hashing capability.
    pub fn with_hasher(store: PersistenceState, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            managers: Arc::new(
                Repository::new(MANAGER, manager_schema(), store.clone()).with_hasher(hasher.clone()),
            ),
            users: Arc::new(
                Repository::new(USER, user_schema(), store.clone()).with_hasher(hasher),
            ),
            pages: Arc::new(Repository::new(PAGE, page_schema(), store.clone())),
            user_groups: Arc::new(Repository::new(USER_GROUP, user_group_schema(), store)),
        }
    }
}
