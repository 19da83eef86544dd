use crate::{
    api::transactions::fetch_balance,
    auth::auth::AuthUser,
    error::ApiError,
    model::{
        expense::ExpenseStatus, permissions::Capability, project::ProjectStatus,
        transaction::SafeBalance,
    },
    utils::response,
};
use actix_web::{Responder, web};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, ToSchema)]
pub struct Dashboard {
    pub active_projects: i64,
    pub active_employees: i64,
    pub active_contractors: i64,
    pub pending_expenses: i64,
    /// Present only for callers allowed to see money figures.
    pub balance: Option<SafeBalance>,
}

#[derive(Serialize, ToSchema, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Serialize, ToSchema)]
pub struct FinancialSummary {
    pub safe: SafeBalance,
    pub projects_by_status: Vec<StatusCount>,
    pub pending_expenses_total: f64,
    pub approved_unpaid_total: f64,
}

#[derive(Serialize, ToSchema, sqlx::FromRow)]
pub struct ProjectSpending {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub status: String,
    pub budget: f64,
    pub spent: f64,
    #[sqlx(default)]
    pub remaining: f64,
    /// Percentage of the budget spent, 0 when there is no budget.
    #[sqlx(default)]
    pub utilization: f64,
}

#[derive(Serialize, ToSchema, sqlx::FromRow)]
pub struct MonthlyFlow {
    /// 1-12
    pub month: i32,
    pub inflow: f64,
    pub outflow: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MonthlyQuery {
    /// Defaults to the current year.
    pub year: Option<i32>,
}

pub fn utilization(budget: f64, spent: f64) -> f64 {
    if budget <= 0.0 {
        return 0.0;
    }
    let pct = spent / budget * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Home screen counters
#[utoipa::path(
    get,
    path = "/api/dashboard",
    responses((status = 200, body = Dashboard)),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn dashboard(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewDashboard)?;

    let (active_projects, active_employees, active_contractors, pending_expenses) =
        sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM projects WHERE status = $1),
                (SELECT COUNT(*) FROM employees WHERE status = 'active'),
                (SELECT COUNT(*) FROM contractors WHERE is_active = TRUE),
                (SELECT COUNT(*) FROM expenses WHERE status = $2)
            "#,
        )
        .bind(ProjectStatus::Active.as_ref())
        .bind(ExpenseStatus::PendingApproval.as_ref())
        .fetch_one(pool.get_ref())
        .await?;

    let balance = if auth.can(Capability::ViewFinancials) {
        let mut conn = pool.acquire().await?;
        Some(fetch_balance(&mut conn).await?)
    } else {
        None
    };

    Ok(response::ok(Dashboard {
        active_projects,
        active_employees,
        active_contractors,
        pending_expenses,
        balance,
    }))
}

/// Overall financial summary
#[utoipa::path(
    get,
    path = "/api/reports/summary",
    responses((status = 200, body = FinancialSummary), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn summary(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewReports)?;

    let mut conn = pool.acquire().await?;
    let safe = fetch_balance(&mut conn).await?;

    let projects_by_status = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM projects GROUP BY status ORDER BY status",
    )
    .fetch_all(&mut *conn)
    .await?;

    let (pending_expenses_total, approved_unpaid_total) = sqlx::query_as::<_, (f64, f64)>(
        r#"
        SELECT
            COALESCE(SUM(amount) FILTER (WHERE status = $1), 0),
            COALESCE(SUM(amount) FILTER (WHERE status = $2), 0)
        FROM expenses
        "#,
    )
    .bind(ExpenseStatus::PendingApproval.as_ref())
    .bind(ExpenseStatus::Approved.as_ref())
    .fetch_one(&mut *conn)
    .await?;

    Ok(response::ok(FinancialSummary {
        safe,
        projects_by_status,
        pending_expenses_total,
        approved_unpaid_total,
    }))
}

/// Budget utilization per project
#[utoipa::path(
    get,
    path = "/api/reports/projects",
    responses((status = 200, body = [ProjectSpending]), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn project_spending(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewReports)?;

    let mut rows = sqlx::query_as::<_, ProjectSpending>(
        r#"
        SELECT
            p.id, p.code, p.name, p.status,
            p.budget_estimate AS budget,
            COALESCE(SUM(t.amount) FILTER (WHERE t.type = 'outflow' AND t.is_voided = FALSE), 0) AS spent
        FROM projects p
        LEFT JOIN transactions t ON t.project_id = p.id
        GROUP BY p.id
        ORDER BY p.id DESC
        "#,
    )
    .fetch_all(pool.get_ref())
    .await?;

    for row in &mut rows {
        row.remaining = row.budget - row.spent;
        row.utilization = utilization(row.budget, row.spent);
    }

    debug!(projects = rows.len(), "Project spending computed");
    Ok(response::ok(rows))
}

/// Inflow and outflow per month of a year
#[utoipa::path(
    get,
    path = "/api/reports/monthly",
    params(MonthlyQuery),
    responses((status = 200, body = [MonthlyFlow]), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Reports"
)]
pub async fn monthly(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<MonthlyQuery>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewReports)?;

    let year = query.year.unwrap_or_else(|| Utc::now().year());
    if !(2000..=2100).contains(&year) {
        return Err(ApiError::bad_request("السنة غير صالحة"));
    }

    let rows = sqlx::query_as::<_, MonthlyFlow>(
        r#"
        SELECT
            m.month::INT AS month,
            COALESCE(SUM(t.amount) FILTER (WHERE t.type = 'inflow'), 0)  AS inflow,
            COALESCE(SUM(t.amount) FILTER (WHERE t.type = 'outflow'), 0) AS outflow
        FROM generate_series(1, 12) AS m(month)
        LEFT JOIN transactions t
            ON EXTRACT(MONTH FROM t.transaction_date) = m.month
           AND EXTRACT(YEAR FROM t.transaction_date) = $1
           AND t.is_voided = FALSE
        GROUP BY m.month
        ORDER BY m.month
        "#,
    )
    .bind(year)
    .fetch_all(pool.get_ref())
    .await?;

    Ok(response::ok(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_is_a_rounded_percentage() {
        assert_eq!(utilization(1000.0, 250.0), 25.0);
        assert_eq!(utilization(3.0, 1.0), 33.33);
        assert_eq!(utilization(100.0, 150.0), 150.0);
    }

    #[test]
    fn zero_budget_means_zero_utilization() {
        assert_eq!(utilization(0.0, 500.0), 0.0);
        assert_eq!(utilization(0.0, 0.0), 0.0);
    }
}
