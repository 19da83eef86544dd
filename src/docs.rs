use crate::api::{
    contractors::{ContractorQuery, CreateContractor},
    employees::{CreateEmployee, EmployeeQuery, PaySalary, PayrollLine, PayrollSummary},
    expenses::{CreateExpense, ExpenseQuery, PayExpense, PendingCount, RejectExpense},
    permissions::RolePermissions,
    projects::{CreateProject, ProjectQuery},
    reports::{Dashboard, FinancialSummary, MonthlyFlow, ProjectSpending, StatusCount},
    transactions::{CreateTransaction, TransactionQuery},
    users::{CreateUser, UpdateUser, UserQuery, UsernameAvailability},
};
use crate::auth::handlers::{ChangePassword, SessionResponse, UpdateProfile, VerifyResponse};
use crate::model::{
    contractor::Contractor,
    employee::{Employee, EmployeeStatus},
    expense::{Expense, ExpenseStatus},
    permissions::Permissions,
    project::{Project, ProjectStatus},
    role::Role,
    transaction::{PaymentMethod, SafeBalance, Transaction, TransactionType},
    user::UserProfile,
};
use crate::models::LoginReqDto;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Construction Finance API",
        version = "1.0.0",
        description = r#"
## Construction company finance back end

REST API behind the Arabic (RTL) finance application of a construction company.

### Modules
- **Projects**: sites, budgets and lifecycle
- **Safe**: the company cash ledger, deposits and withdrawals
- **Employees & payroll**: salaries and monthly payments from the safe
- **Contractors**
- **Expenses**: invoices moving through approval and payment
- **Reports**: dashboard counters, summaries and budget utilization

### Security
Every endpoint except login and health requires a **JWT Bearer** token.
Three roles (`admin`, `data_entry`, `partners`) map to a fixed permission matrix.
Money figures are returned as `null` to callers without financial visibility.

### Response format
`{"success": bool, "message"?: string, "data"?: ...}`; messages are in Arabic.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::logout,
        crate::auth::handlers::verify,
        crate::auth::handlers::get_profile,
        crate::auth::handlers::update_profile,
        crate::auth::handlers::change_password,

        crate::api::permissions::my_permissions,
        crate::api::permissions::role_matrix,

        crate::api::users::list_users,
        crate::api::users::get_user,
        crate::api::users::username_available,
        crate::api::users::create_user,
        crate::api::users::update_user,
        crate::api::users::delete_user,

        crate::api::projects::list_projects,
        crate::api::projects::get_project,
        crate::api::projects::create_project,
        crate::api::projects::update_project,
        crate::api::projects::delete_project,

        crate::api::employees::list_employees,
        crate::api::employees::get_employee,
        crate::api::employees::create_employee,
        crate::api::employees::update_employee,
        crate::api::employees::delete_employee,
        crate::api::employees::pay_salary,
        crate::api::employees::payroll_summary,

        crate::api::contractors::list_contractors,
        crate::api::contractors::get_contractor,
        crate::api::contractors::create_contractor,
        crate::api::contractors::update_contractor,
        crate::api::contractors::delete_contractor,

        crate::api::transactions::list_transactions,
        crate::api::transactions::get_transaction,
        crate::api::transactions::create_transaction,
        crate::api::transactions::void_transaction,
        crate::api::transactions::safe_balance,

        crate::api::expenses::list_expenses,
        crate::api::expenses::get_expense,
        crate::api::expenses::pending_count,
        crate::api::expenses::create_expense,
        crate::api::expenses::update_expense,
        crate::api::expenses::approve_expense,
        crate::api::expenses::reject_expense,
        crate::api::expenses::pay_expense,

        crate::api::reports::dashboard,
        crate::api::reports::summary,
        crate::api::reports::project_spending,
        crate::api::reports::monthly
    ),
    components(
        schemas(
            LoginReqDto,
            SessionResponse,
            VerifyResponse,
            UpdateProfile,
            ChangePassword,
            Role,
            Permissions,
            RolePermissions,
            UserProfile,
            CreateUser,
            UpdateUser,
            UserQuery,
            UsernameAvailability,
            Project,
            ProjectStatus,
            CreateProject,
            ProjectQuery,
            Employee,
            EmployeeStatus,
            CreateEmployee,
            EmployeeQuery,
            PaySalary,
            PayrollLine,
            PayrollSummary,
            Contractor,
            CreateContractor,
            ContractorQuery,
            Transaction,
            TransactionType,
            PaymentMethod,
            SafeBalance,
            CreateTransaction,
            TransactionQuery,
            Expense,
            ExpenseStatus,
            CreateExpense,
            ExpenseQuery,
            RejectExpense,
            PayExpense,
            PendingCount,
            Dashboard,
            StatusCount,
            FinancialSummary,
            ProjectSpending,
            MonthlyFlow
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, session and profile"),
        (name = "Permissions", description = "Role permission matrix"),
        (name = "Users", description = "User administration"),
        (name = "Projects", description = "Construction projects"),
        (name = "Employees", description = "Employees and payroll"),
        (name = "Contractors", description = "Contractors and suppliers"),
        (name = "Safe", description = "Cash safe ledger"),
        (name = "Expenses", description = "Invoices and expense approval"),
        (name = "Reports", description = "Dashboard and financial reports"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_module_and_the_bearer_scheme() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();

        for path in [
            "/api/auth/login",
            "/api/projects/{id}",
            "/api/employees/{id}/pay",
            "/api/payroll/summary",
            "/api/transactions",
            "/api/safe/balance",
            "/api/expenses/{id}/pay",
            "/api/reports/monthly",
            "/api/users/username-available",
            "/api/permissions/roles",
        ] {
            assert!(doc["paths"].get(path).is_some(), "missing {path}");
        }

        assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
