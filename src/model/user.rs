use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::model::role::Role;

/// Full `users` row, including the password hash. Never serialized.
#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = r#"
    id, username, password_hash, role, full_name, email, phone,
    is_active, last_login_at, created_at, updated_at
"#;

#[derive(Debug, Serialize, ToSchema)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[schema(example = "مدير النظام")]
    pub role_label: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    /// Rows are constrained by a CHECK, so an unknown role means a corrupted row.
    pub fn role(&self) -> Option<Role> {
        Role::from_str(&self.role).ok()
    }

    pub fn into_profile(self) -> Option<UserProfile> {
        let role = self.role()?;
        Some(UserProfile {
            id: self.id,
            username: self.username,
            role,
            role_label: role.label().to_string(),
            full_name: self.full_name,
            email: self.email,
            phone: self.phone,
            is_active: self.is_active,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role: &str) -> UserRow {
        UserRow {
            id: 3,
            username: "khalid".into(),
            password_hash: "$argon2id$...".into(),
            role: role.into(),
            full_name: Some("خالد".into()),
            email: None,
            phone: None,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn profile_never_carries_the_hash() {
        let profile = row("partners").into_profile().unwrap();
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "partners");
        assert_eq!(json["role_label"], "الشركاء");
    }

    #[test]
    fn unknown_role_yields_no_profile() {
        assert!(row("superuser").into_profile().is_none());
    }
}
