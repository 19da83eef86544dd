use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::{permissions::Permissions, redact::Redact};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

pub const EMPLOYEE_STATUSES: &[&str] = &["active", "inactive"];

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "name": "أحمد علي",
        "position": "مهندس موقع",
        "phone": "+966500000000",
        "base_salary": 9000.0,
        "bonus": 500.0,
        "overtime": 250.0,
        "deductions": 100.0,
        "net_salary": 9650.0,
        "status": "active",
        "project_id": 3,
        "hire_date": "2023-09-01",
        "created_at": "2023-09-01T08:00:00Z",
        "updated_at": "2023-09-01T08:00:00Z"
    })
)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub position: Option<String>,
    pub phone: Option<String>,
    pub base_salary: Option<f64>,
    pub bonus: Option<f64>,
    pub overtime: Option<f64>,
    pub deductions: Option<f64>,
    /// Computed in the query, not stored.
    pub net_salary: Option<f64>,
    #[schema(example = "active")]
    pub status: String,
    pub project_id: Option<i64>,
    pub hire_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list for `SELECT`s producing an [`Employee`].
pub const EMPLOYEE_COLUMNS: &str = r#"
    id, name, position, phone, base_salary, bonus, overtime, deductions,
    (base_salary + bonus + overtime - deductions) AS net_salary,
    status, project_id, hire_date, created_at, updated_at
"#;

impl Redact for Employee {
    fn redact(&mut self, perms: &Permissions) {
        if !perms.sees_salaries() {
            self.base_salary = None;
            self.bonus = None;
            self.overtime = None;
            self.deductions = None;
            self.net_salary = None;
        }
    }
}

pub fn net_salary(base: f64, bonus: f64, overtime: f64, deductions: f64) -> f64 {
    base + bonus + overtime - deductions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use std::str::FromStr;

    #[test]
    fn status_list_matches_enum() {
        for s in EMPLOYEE_STATUSES {
            assert!(EmployeeStatus::from_str(s).is_ok());
        }
        assert!(EmployeeStatus::from_str("retired").is_err());
    }

    #[test]
    fn net_salary_adds_extras_and_subtracts_deductions() {
        assert_eq!(net_salary(9000.0, 500.0, 250.0, 100.0), 9650.0);
        assert_eq!(net_salary(0.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn salary_fields_are_hidden_from_data_entry() {
        let mut employee = Employee {
            id: 1,
            name: "سعيد".into(),
            position: None,
            phone: None,
            base_salary: Some(5000.0),
            bonus: Some(0.0),
            overtime: Some(0.0),
            deductions: Some(0.0),
            net_salary: Some(5000.0),
            status: "active".into(),
            project_id: None,
            hire_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        employee.redact(&Permissions::for_role(Role::DataEntry));

        assert!(employee.base_salary.is_none());
        assert!(employee.net_salary.is_none());
        assert_eq!(employee.name, "سعيد");
    }
}
