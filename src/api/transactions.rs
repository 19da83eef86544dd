use crate::{
    auth::auth::AuthUser,
    error::ApiError,
    model::{
        expense::ExpenseStatus,
        permissions::Capability,
        redact::{redact_all, redacted},
        transaction::{
            NewTransaction, PaymentMethod, SafeBalance, Transaction, TransactionType,
            outflow_allowed,
        },
    },
    utils::{
        db_utils::{FilterValue, Filters},
        response::{self, Page, paging},
    },
};
use actix_web::{Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

// pg_advisory_xact_lock key serializing writes that move money out of the safe.
const SAFE_LOCK_KEY: i64 = 0x5AFE;

#[derive(Deserialize, ToSchema)]
pub struct CreateTransaction {
    #[serde(rename = "type")]
    #[schema(example = "inflow")]
    pub kind: TransactionType,
    #[schema(example = 15000.0)]
    pub amount: f64,
    pub description: Option<String>,
    pub project_id: Option<i64>,
    pub employee_id: Option<i64>,
    pub contractor_id: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct TransactionQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// inflow | outflow
    #[serde(rename = "type")]
    pub kind: Option<TransactionType>,
    pub project_id: Option<i64>,
    pub employee_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub include_voided: bool,
}

/// Sums non-voided transactions.
pub async fn fetch_balance(conn: &mut PgConnection) -> Result<SafeBalance, sqlx::Error> {
    sqlx::query_as::<_, SafeBalance>(
        r#"
        SELECT
            COALESCE(SUM(amount) FILTER (WHERE type = 'inflow'), 0)  AS total_inflow,
            COALESCE(SUM(amount) FILTER (WHERE type = 'outflow'), 0) AS total_outflow,
            COALESCE(SUM(CASE WHEN type = 'inflow' THEN amount ELSE -amount END), 0) AS balance
        FROM transactions
        WHERE is_voided = FALSE
        "#,
    )
    .fetch_one(conn)
    .await
}

/// Inserts a transaction inside the caller's database transaction.
///
/// Outflows take the safe lock and are refused when they would drive the balance
/// below zero. The lock is released when the caller's transaction ends.
pub async fn record_transaction(
    conn: &mut PgConnection,
    tx: NewTransaction,
) -> Result<Transaction, ApiError> {
    if !tx.amount.is_finite() || tx.amount <= 0.0 {
        return Err(ApiError::bad_request("المبلغ يجب أن يكون أكبر من صفر"));
    }

    if tx.kind == TransactionType::Outflow {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SAFE_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let balance = fetch_balance(&mut *conn).await?;
        if !outflow_allowed(balance.balance, tx.amount) {
            return Err(ApiError::bad_request("الرصيد في الخزنة غير كافٍ لإتمام العملية"));
        }
    }

    let row = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions
            (type, amount, description, project_id, employee_id, expense_id,
             contractor_id, payment_method, transaction_date, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, CURRENT_DATE), $10)
        RETURNING *
        "#,
    )
    .bind(tx.kind.as_ref())
    .bind(tx.amount)
    .bind(&tx.description)
    .bind(tx.project_id)
    .bind(tx.employee_id)
    .bind(tx.expense_id)
    .bind(tx.contractor_id)
    .bind(tx.payment_method.as_ref())
    .bind(tx.transaction_date)
    .bind(tx.created_by)
    .fetch_one(&mut *conn)
    .await?;

    info!(
        transaction_id = row.id,
        kind = %tx.kind,
        amount = tx.amount,
        "Safe transaction recorded"
    );

    Ok(row)
}

/// List safe transactions
#[utoipa::path(
    get,
    path = "/api/transactions",
    params(TransactionQuery),
    responses((status = 200, description = "Paginated transactions"), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Safe"
)]
pub async fn list_transactions(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<TransactionQuery>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewSafe)?;

    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if !query.include_voided {
        filters.raw("is_voided = FALSE");
    }
    if let Some(kind) = query.kind {
        filters.push("type = {}", FilterValue::Text(kind.to_string()));
    }
    if let Some(project_id) = query.project_id {
        filters.push("project_id = {}", FilterValue::I64(project_id));
    }
    if let Some(employee_id) = query.employee_id {
        filters.push("employee_id = {}", FilterValue::I64(employee_id));
    }
    if let Some(from) = query.from {
        filters.push("transaction_date >= {}", FilterValue::Date(from));
    }
    if let Some(to) = query.to {
        filters.push("transaction_date <= {}", FilterValue::Date(to));
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM transactions {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT * FROM transactions {where_clause} ORDER BY transaction_date DESC, id DESC LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );

    let mut items = filters
        .bind_as(sqlx::query_as::<_, Transaction>(&data_sql))
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

/// Get a transaction
#[utoipa::path(
    get,
    path = "/api/transactions/{id}",
    params(("id" = i64, Path, description = "Transaction ID")),
    responses((status = 200, body = Transaction), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Safe"
)]
pub async fn get_transaction(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewSafe)?;

    let tx = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(path.into_inner())
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| ApiError::not_found("الحركة المالية غير موجودة"))?;

    Ok(response::ok(redacted(tx, &auth.permissions)))
}

/// Record a deposit into or a withdrawal from the safe
#[utoipa::path(
    post,
    path = "/api/transactions",
    request_body = CreateTransaction,
    responses(
        (status = 201, body = Transaction),
        (status = 400, description = "Invalid amount or insufficient balance"),
        (status = 403)
    ),
    security(("bearer_auth" = [])),
    tag = "Safe"
)]
pub async fn create_transaction(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateTransaction>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageSafe)?;

    let payload = payload.into_inner();
    let mut db_tx = pool.begin().await?;

    let row = record_transaction(
        &mut db_tx,
        NewTransaction {
            kind: payload.kind,
            amount: payload.amount,
            description: payload.description,
            project_id: payload.project_id,
            employee_id: payload.employee_id,
            expense_id: None,
            contractor_id: payload.contractor_id,
            payment_method: payload.payment_method.unwrap_or_default(),
            transaction_date: payload.transaction_date,
            created_by: auth.user_id,
        },
    )
    .await?;

    db_tx.commit().await?;

    Ok(response::created(
        "تم تسجيل الحركة المالية",
        redacted(row, &auth.permissions),
    ))
}

/// Void a transaction (admin only)
#[utoipa::path(
    delete,
    path = "/api/transactions/{id}",
    params(("id" = i64, Path, description = "Transaction ID")),
    responses((status = 200, description = "Voided"), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Safe"
)]
pub async fn void_transaction(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require_admin()?;
    let transaction_id = path.into_inner();

    let mut db_tx = pool.begin().await?;

    // Voiding an inflow can overdraw the safe just like an outflow can.
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SAFE_LOCK_KEY)
        .execute(&mut *db_tx)
        .await?;

    let (kind, amount, expense_id) = sqlx::query_as::<_, (String, f64, Option<i64>)>(
        "SELECT type, amount, expense_id FROM transactions WHERE id = $1 AND is_voided = FALSE FOR UPDATE",
    )
    .bind(transaction_id)
    .fetch_optional(&mut *db_tx)
    .await?
    .ok_or_else(|| ApiError::not_found("الحركة المالية غير موجودة أو ملغاة مسبقاً"))?;

    if kind == TransactionType::Inflow.as_ref() {
        let balance = fetch_balance(&mut db_tx).await?;
        if !outflow_allowed(balance.balance, amount) {
            return Err(ApiError::bad_request(
                "لا يمكن إلغاء الإيداع لأن الرصيد سيصبح سالباً",
            ));
        }
    }

    sqlx::query("UPDATE transactions SET is_voided = TRUE WHERE id = $1")
        .bind(transaction_id)
        .execute(&mut *db_tx)
        .await?;

    // The expense this movement paid goes back to awaiting payment.
    if let Some(expense_id) = expense_id {
        let paid = ExpenseStatus::Paid;
        if let Some(reopened) = paid.after_payment_voided() {
            sqlx::query(
                "UPDATE expenses SET status = $1, paid_at = NULL, updated_at = NOW() WHERE id = $2 AND status = $3",
            )
            .bind(reopened.as_ref())
            .bind(expense_id)
            .bind(paid.as_ref())
            .execute(&mut *db_tx)
            .await?;
            info!(expense_id, "Expense payment reversed");
        }
    }

    db_tx.commit().await?;

    info!(transaction_id, user_id = auth.user_id, "Transaction voided");
    Ok(response::message("تم إلغاء الحركة المالية"))
}

/// Current safe balance
#[utoipa::path(
    get,
    path = "/api/safe/balance",
    responses((status = 200, body = SafeBalance), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Safe"
)]
pub async fn safe_balance(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewSafe)?;

    let mut conn = pool.acquire().await?;
    let balance = fetch_balance(&mut conn).await?;

    Ok(response::ok(balance))
}
