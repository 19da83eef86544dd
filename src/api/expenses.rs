use crate::{
    api::transactions::record_transaction,
    auth::auth::AuthUser,
    error::ApiError,
    model::{
        expense::{Expense, ExpenseStatus},
        permissions::Capability,
        redact::{redact_all, redacted},
        role::Role,
        transaction::{NewTransaction, PaymentMethod, TransactionType},
    },
    utils::{
        db_utils::{Column, ColumnKind, FilterValue, Filters, build_update_sql, execute_update},
        response::{self, Page, paging},
    },
};
use actix_web::{Responder, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &[Column] = &[
    Column::required("title", ColumnKind::Text),
    Column::optional("description", ColumnKind::Text),
    Column::required("amount", ColumnKind::Money),
    Column::optional("category", ColumnKind::Text),
    Column::optional("project_id", ColumnKind::Id),
    Column::optional("contractor_id", ColumnKind::Id),
    Column::required("expense_date", ColumnKind::Date),
];

#[derive(Deserialize, ToSchema)]
pub struct CreateExpense {
    #[schema(example = "فاتورة حديد تسليح")]
    pub title: String,
    pub description: Option<String>,
    #[schema(example = 42000.0)]
    pub amount: f64,
    #[schema(example = "مواد بناء")]
    pub category: Option<String>,
    pub project_id: Option<i64>,
    pub contractor_id: Option<i64>,
    pub expense_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ExpenseQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub status: Option<ExpenseStatus>,
    pub project_id: Option<i64>,
    pub contractor_id: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct RejectExpense {
    pub reason: Option<String>,
}

#[derive(Default, Deserialize, ToSchema)]
pub struct PayExpense {
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Serialize, ToSchema)]
pub struct PendingCount {
    pub count: i64,
}

/// Locks the row and returns it with its parsed status.
async fn lock_expense(conn: &mut PgConnection, id: i64) -> Result<(Expense, ExpenseStatus), ApiError> {
    let expense = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| ApiError::not_found("المصروف غير موجود"))?;

    let status = ExpenseStatus::from_str(&expense.status)
        .map_err(|_| ApiError::internal(format!("expense {id} has unknown status {}", expense.status)))?;

    Ok((expense, status))
}

fn check_transition(from: ExpenseStatus, to: ExpenseStatus) -> Result<(), ApiError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "لا يمكن نقل المصروف من حالة \"{}\" إلى \"{}\"",
            from.label(),
            to.label()
        )))
    }
}

/// List expenses
#[utoipa::path(
    get,
    path = "/api/expenses",
    params(ExpenseQuery),
    responses((status = 200, description = "Paginated expense list")),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn list_expenses(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<ExpenseQuery>,
) -> Result<impl Responder, ApiError> {
    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(status) = query.status {
        filters.push("status = {}", FilterValue::Text(status.to_string()));
    }
    if let Some(project_id) = query.project_id {
        filters.push("project_id = {}", FilterValue::I64(project_id));
    }
    if let Some(contractor_id) = query.contractor_id {
        filters.push("contractor_id = {}", FilterValue::I64(contractor_id));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM expenses {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT * FROM expenses {where_clause} ORDER BY expense_date DESC, id DESC LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );

    let mut items = filters
        .bind_as(sqlx::query_as::<_, Expense>(&data_sql))
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    redact_all(&mut items, &auth.permissions);

    Ok(response::ok(Page {
        items,
        page,
        per_page,
        total,
    }))
}

/// Get an expense
#[utoipa::path(
    get,
    path = "/api/expenses/{id}",
    params(("id" = i64, Path, description = "Expense ID")),
    responses((status = 200, body = Expense), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn get_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    let expense = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1")
        .bind(path.into_inner())
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("المصروف غير موجود"))?;

    Ok(response::ok(redacted(expense, &auth.permissions)))
}

/// Number of expenses waiting for approval
#[utoipa::path(
    get,
    path = "/api/expenses/pending-count",
    responses((status = 200, body = PendingCount)),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn pending_count(_auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM expenses WHERE status = $1")
        .bind(ExpenseStatus::PendingApproval.as_ref())
        .fetch_one(pool.get_ref())
        .await?;

    Ok(response::ok(PendingCount { count }))
}

/// Submit an expense for approval
#[utoipa::path(
    post,
    path = "/api/expenses",
    request_body = CreateExpense,
    responses((status = 201, body = Expense), (status = 400), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn create_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateExpense>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::SubmitExpenses)?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("عنوان المصروف مطلوب"));
    }
    if !payload.amount.is_finite() || payload.amount <= 0.0 {
        return Err(ApiError::bad_request("المبلغ يجب أن يكون أكبر من صفر"));
    }

    let expense = sqlx::query_as::<_, Expense>(
        r#"
        INSERT INTO expenses
            (title, description, amount, category, project_id, contractor_id,
             status, submitted_by, expense_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, CURRENT_DATE))
        RETURNING *
        "#,
    )
    .bind(title)
    .bind(&payload.description)
    .bind(payload.amount)
    .bind(&payload.category)
    .bind(payload.project_id)
    .bind(payload.contractor_id)
    .bind(ExpenseStatus::PendingApproval.as_ref())
    .bind(auth.user_id)
    .bind(payload.expense_date)
    .fetch_one(pool.get_ref())
    .await?;

    info!(expense_id = expense.id, submitted_by = auth.user_id, "Expense submitted");

    Ok(response::created(
        "تم تقديم المصروف للموافقة",
        redacted(expense, &auth.permissions),
    ))
}

/// Edit an expense while it is still pending approval
#[utoipa::path(
    put,
    path = "/api/expenses/{id}",
    params(("id" = i64, Path, description = "Expense ID")),
    request_body = Object,
    responses(
        (status = 200, body = Expense),
        (status = 400, description = "Invalid field or expense no longer pending"),
        (status = 403, description = "Not the submitter"),
        (status = 404)
    ),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn update_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: web::Json<Value>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::SubmitExpenses)?;
    let expense_id = path.into_inner();

    let mut db_tx = pool.begin().await?;
    let (expense, status) = lock_expense(&mut db_tx, expense_id).await?;

    if expense.submitted_by != auth.user_id && auth.role != Role::Admin {
        return Err(ApiError::forbidden("لا يمكنك تعديل مصروف قدمه مستخدم آخر"));
    }
    if status != ExpenseStatus::PendingApproval {
        return Err(ApiError::bad_request("لا يمكن تعديل المصروف بعد مراجعته"));
    }

    let update = build_update_sql("expenses", &body, UPDATABLE, "id", expense_id)?;
    // Runs on db_tx, which holds the row lock.
    execute_update(&mut *db_tx, update).await?;

    let expense = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = $1")
        .bind(expense_id)
        .fetch_one(&mut *db_tx)
        .await?;

    db_tx.commit().await?;

    info!(expense_id, "Expense updated");
    Ok(response::ok_with_message(
        "تم تحديث المصروف",
        redacted(expense, &auth.permissions),
    ))
}

/// Approve a pending expense
#[utoipa::path(
    post,
    path = "/api/expenses/{id}/approve",
    params(("id" = i64, Path, description = "Expense ID")),
    responses((status = 200, body = Expense), (status = 400), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn approve_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ApproveExpenses)?;
    let expense_id = path.into_inner();

    let mut db_tx = pool.begin().await?;
    let (_, status) = lock_expense(&mut db_tx, expense_id).await?;
    check_transition(status, ExpenseStatus::Approved)?;

    let expense = sqlx::query_as::<_, Expense>(
        r#"
        UPDATE expenses
        SET status = $1, approved_by = $2, approved_at = NOW(), updated_at = NOW()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(ExpenseStatus::Approved.as_ref())
    .bind(auth.user_id)
    .bind(expense_id)
    .fetch_one(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    info!(expense_id, approved_by = auth.user_id, "Expense approved");
    Ok(response::ok_with_message(
        "تمت الموافقة على المصروف",
        redacted(expense, &auth.permissions),
    ))
}

/// Reject a pending expense
#[utoipa::path(
    post,
    path = "/api/expenses/{id}/reject",
    params(("id" = i64, Path, description = "Expense ID")),
    request_body = RejectExpense,
    responses((status = 200, body = Expense), (status = 400), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn reject_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: Option<web::Json<RejectExpense>>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ApproveExpenses)?;
    let expense_id = path.into_inner();

    let reason = body
        .and_then(|b| b.into_inner().reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let mut db_tx = pool.begin().await?;
    let (_, status) = lock_expense(&mut db_tx, expense_id).await?;
    check_transition(status, ExpenseStatus::Rejected)?;

    let expense = sqlx::query_as::<_, Expense>(
        r#"
        UPDATE expenses
        SET status = $1, approved_by = $2, approved_at = NOW(),
            rejection_reason = $3, updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(ExpenseStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(reason)
    .bind(expense_id)
    .fetch_one(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    warn!(expense_id, rejected_by = auth.user_id, "Expense rejected");
    Ok(response::ok_with_message(
        "تم رفض المصروف",
        redacted(expense, &auth.permissions),
    ))
}

/// Pay an approved expense from the safe
#[utoipa::path(
    post,
    path = "/api/expenses/{id}/pay",
    params(("id" = i64, Path, description = "Expense ID")),
    request_body = PayExpense,
    responses(
        (status = 200, body = Expense),
        (status = 400, description = "Not approved or insufficient balance"),
        (status = 403),
        (status = 404)
    ),
    security(("bearer_auth" = [])),
    tag = "Expenses"
)]
pub async fn pay_expense(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: Option<web::Json<PayExpense>>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ApproveExpenses)?;
    let expense_id = path.into_inner();
    let payment_method = body
        .map(|b| b.into_inner())
        .unwrap_or_default()
        .payment_method
        .unwrap_or_default();

    let mut db_tx = pool.begin().await?;
    let (expense, status) = lock_expense(&mut db_tx, expense_id).await?;
    check_transition(status, ExpenseStatus::Paid)?;

    let amount = expense
        .amount
        .ok_or_else(|| ApiError::internal(format!("expense {expense_id} has no amount")))?;

    let tx = record_transaction(
        &mut db_tx,
        NewTransaction {
            kind: TransactionType::Outflow,
            amount,
            description: Some(expense.title.clone()),
            project_id: expense.project_id,
            employee_id: None,
            expense_id: Some(expense_id),
            contractor_id: expense.contractor_id,
            payment_method,
            transaction_date: None,
            created_by: auth.user_id,
        },
    )
    .await?;

    let expense = sqlx::query_as::<_, Expense>(
        "UPDATE expenses SET status = $1, paid_at = NOW(), updated_at = NOW() WHERE id = $2 RETURNING *",
    )
    .bind(ExpenseStatus::Paid.as_ref())
    .bind(expense_id)
    .fetch_one(&mut *db_tx)
    .await?;

    db_tx.commit().await?;

    info!(expense_id, transaction_id = tx.id, "Expense paid");
    Ok(response::ok_with_message(
        "تم صرف المصروف من الخزنة",
        redacted(expense, &auth.permissions),
    ))
}
