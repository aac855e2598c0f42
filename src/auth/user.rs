use chrono::NaiveDate;
use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub belt: Option<String>,
    pub date_enrolled: Option<NaiveDate>,
    pub archived: bool,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbUser {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub role: Option<String>,
    pub belt: Option<String>,
    pub date_enrolled: Option<NaiveDate>,
    pub archived: Option<bool>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        let role_str = user.role.unwrap_or_default();
        let role = Role::from_str(&role_str).unwrap_or_else(|_| {
            tracing::warn!(role = %role_str, "Unknown role stored for user, defaulting to member");
            Role::Member
        });

        Self {
            id: user.id.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            first_name: user.first_name.unwrap_or_default(),
            last_name: user.last_name.unwrap_or_default(),
            phone_number: user.phone_number,
            role,
            belt: user.belt,
            date_enrolled: user.date_enrolled,
            archived: user.archived.unwrap_or_default(),
        }
    }
}

impl User {
    /// "First Last", or the email when no name was given.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                email = %self.email,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }
}
