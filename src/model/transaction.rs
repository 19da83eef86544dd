use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::{permissions::Permissions, redact::Redact};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Inflow,
    Outflow,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    BankTransfer,
    Cheque,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Transaction {
    pub id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    #[schema(example = "inflow")]
    pub kind: String,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub project_id: Option<i64>,
    pub employee_id: Option<i64>,
    pub expense_id: Option<i64>,
    pub contractor_id: Option<i64>,
    #[schema(example = "cash")]
    pub payment_method: String,
    pub transaction_date: NaiveDate,
    pub is_voided: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Redact for Transaction {
    fn redact(&mut self, perms: &Permissions) {
        if !perms.can_view_financials {
            self.amount = None;
        }
    }
}

/// Safe position computed over non-voided transactions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SafeBalance {
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub balance: f64,
}

/// Insert payload shared by the safe, expense payment and salary payment paths.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub amount: f64,
    pub description: Option<String>,
    pub project_id: Option<i64>,
    pub employee_id: Option<i64>,
    pub expense_id: Option<i64>,
    pub contractor_id: Option<i64>,
    pub payment_method: PaymentMethod,
    pub transaction_date: Option<NaiveDate>,
    pub created_by: i64,
}

/// Returns true when `amount` may leave a safe holding `balance`.
pub fn outflow_allowed(balance: f64, amount: f64) -> bool {
    amount <= balance + f64::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn outflow_cannot_exceed_balance() {
        assert!(outflow_allowed(1000.0, 1000.0));
        assert!(outflow_allowed(1000.0, 999.99));
        assert!(!outflow_allowed(1000.0, 1000.01));
        assert!(!outflow_allowed(0.0, 1.0));
    }

    #[test]
    fn payment_method_defaults_to_cash() {
        assert_eq!(PaymentMethod::default(), PaymentMethod::Cash);
        assert_eq!(PaymentMethod::from_str("bank_transfer").unwrap(), PaymentMethod::BankTransfer);
    }

    fn outflow(amount: f64) -> Transaction {
        Transaction {
            id: 1,
            kind: "outflow".into(),
            amount: Some(amount),
            description: None,
            project_id: None,
            employee_id: None,
            expense_id: None,
            contractor_id: None,
            payment_method: "cash".into(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            is_voided: false,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn kind_is_serialized_as_type() {
        let json = serde_json::to_value(outflow(10.0)).unwrap();
        assert_eq!(json["type"], "outflow");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn amount_is_hidden_from_data_entry_only() {
        use crate::model::{redact::redacted, role::Role};

        let hidden = redacted(outflow(2500.0), &Permissions::for_role(Role::DataEntry));
        assert_eq!(hidden.amount, None);
        assert!(serde_json::to_value(&hidden).unwrap()["amount"].is_null());

        let shown = redacted(outflow(2500.0), &Permissions::for_role(Role::Partners));
        assert_eq!(shown.amount, Some(2500.0));
    }
}
