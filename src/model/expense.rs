use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::{permissions::Permissions, redact::Redact};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExpenseStatus {
    PendingApproval,
    Approved,
    Paid,
    Rejected,
}

impl ExpenseStatus {
    /// pending_approval -> approved -> paid, or pending_approval -> rejected.
    pub fn can_transition_to(self, next: ExpenseStatus) -> bool {
        matches!(
            (self, next),
            (ExpenseStatus::PendingApproval, ExpenseStatus::Approved)
                | (ExpenseStatus::PendingApproval, ExpenseStatus::Rejected)
                | (ExpenseStatus::Approved, ExpenseStatus::Paid)
        )
    }

    /// Status an expense falls back to when the safe movement that paid it is voided.
    pub fn after_payment_voided(self) -> Option<ExpenseStatus> {
        match self {
            ExpenseStatus::Paid => Some(ExpenseStatus::Approved),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExpenseStatus::PendingApproval => "بانتظار الموافقة",
            ExpenseStatus::Approved => "معتمد",
            ExpenseStatus::Paid => "مدفوع",
            ExpenseStatus::Rejected => "مرفوض",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Expense {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub project_id: Option<i64>,
    pub contractor_id: Option<i64>,
    #[schema(example = "pending_approval")]
    pub status: String,
    pub submitted_by: i64,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expense_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Redact for Expense {
    fn redact(&mut self, perms: &Permissions) {
        if !perms.can_view_financials {
            self.amount = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExpenseStatus::*;
    use super::*;
    use crate::model::{redact::redacted, role::Role};

    fn expense(amount: f64) -> Expense {
        Expense {
            id: 3,
            title: "فاتورة إسمنت".into(),
            description: None,
            amount: Some(amount),
            category: None,
            project_id: Some(1),
            contractor_id: None,
            status: PendingApproval.to_string(),
            submitted_by: 2,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            paid_at: None,
            expense_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn voided_payment_reopens_only_paid_expenses() {
        assert_eq!(Paid.after_payment_voided(), Some(Approved));
        assert_eq!(Approved.after_payment_voided(), None);
        assert_eq!(PendingApproval.after_payment_voided(), None);
    }

    #[test]
    fn amount_is_hidden_from_data_entry_only() {
        let hidden = redacted(expense(800.0), &Permissions::for_role(Role::DataEntry));
        assert_eq!(hidden.amount, None);
        assert!(serde_json::to_value(&hidden).unwrap()["amount"].is_null());

        let shown = redacted(expense(800.0), &Permissions::for_role(Role::Partners));
        assert_eq!(shown.amount, Some(800.0));
    }

    #[test]
    fn workflow_allows_only_forward_transitions() {
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(PendingApproval.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));

        assert!(!PendingApproval.can_transition_to(Paid));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Paid.can_transition_to(PendingApproval));
        assert!(!Approved.can_transition_to(Approved));
    }
}
