use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::{permissions::Permissions, redact::Redact};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    Completed,
    Cancelled,
}

pub const PROJECT_STATUSES: &[&str] = &["planning", "active", "completed", "cancelled"];

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "code": "PRJ-1A2B3C4D",
        "name": "برج السلام السكني",
        "location": "الرياض",
        "budget_estimate": 2500000.0,
        "client": "شركة الإعمار",
        "start_date": "2024-03-01",
        "end_date": "2025-06-30",
        "status": "active",
        "description": null,
        "created_by": 1,
        "created_at": "2024-03-01T08:00:00Z",
        "updated_at": "2024-03-01T08:00:00Z"
    })
)]
pub struct Project {
    pub id: i64,
    /// Assigned at creation, never changes.
    pub code: String,
    pub name: String,
    pub location: Option<String>,
    #[schema(nullable = true)]
    pub budget_estimate: Option<f64>,
    pub client: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[schema(example = "planning")]
    pub status: String,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Redact for Project {
    fn redact(&mut self, perms: &Permissions) {
        if !perms.can_view_financials {
            self.budget_estimate = None;
        }
    }
}

/// Generates a project code like `PRJ-1A2B3C4D`.
pub fn generate_code() -> String {
    let id = uuid::Uuid::new_v4().to_simple().to_string();
    format!("PRJ-{}", id[..8].to_uppercase())
}

pub fn validate_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    match (start, end) {
        (Some(s), Some(e)) => e >= s,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use std::str::FromStr;

    fn sample() -> Project {
        Project {
            id: 7,
            code: "PRJ-00000007".into(),
            name: "مجمع الورود".into(),
            location: Some("جدة".into()),
            budget_estimate: Some(900_000.0),
            client: None,
            start_date: None,
            end_date: None,
            status: "planning".into(),
            description: None,
            created_by: Some(1),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn data_entry_gets_no_budget() {
        let mut project = sample();
        project.redact(&Permissions::for_role(Role::DataEntry));
        assert_eq!(project.budget_estimate, None);

        let json = serde_json::to_value(&project).unwrap();
        assert!(json["budget_estimate"].is_null());
    }

    #[test]
    fn partners_keep_the_budget() {
        let mut project = sample();
        project.redact(&Permissions::for_role(Role::Partners));
        assert_eq!(project.budget_estimate, Some(900_000.0));
    }

    #[test]
    fn generated_codes_are_prefixed_and_unique() {
        let a = generate_code();
        let b = generate_code();
        assert!(a.starts_with("PRJ-"));
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn end_date_cannot_precede_start_date() {
        let d = |s: &str| NaiveDate::from_str(s).ok();
        assert!(validate_dates(d("2024-01-01"), d("2024-02-01")));
        assert!(validate_dates(d("2024-01-01"), None));
        assert!(!validate_dates(d("2024-02-01"), d("2024-01-01")));
    }

    #[test]
    fn status_list_matches_enum() {
        for s in PROJECT_STATUSES {
            assert!(ProjectStatus::from_str(s).is_ok());
        }
    }
}
