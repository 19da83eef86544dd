use crate::{
    api::transactions::record_transaction,
    auth::auth::AuthUser,
    error::ApiError,
    model::{
        employee::{EMPLOYEE_COLUMNS, EMPLOYEE_STATUSES, Employee, EmployeeStatus, net_salary},
        permissions::Capability,
        redact::{redact_all, redacted},
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
use sqlx::PgPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &[Column] = &[
    Column::required("name", ColumnKind::Text),
    Column::optional("position", ColumnKind::Text),
    Column::optional("phone", ColumnKind::Text),
    Column::required("base_salary", ColumnKind::Money),
    Column::required("bonus", ColumnKind::Money),
    Column::required("overtime", ColumnKind::Money),
    Column::required("deductions", ColumnKind::Money),
    Column::required("status", ColumnKind::OneOf(EMPLOYEE_STATUSES)),
    Column::optional("project_id", ColumnKind::Id),
    Column::optional("hire_date", ColumnKind::Date),
];

const SALARY_FIELDS: &[&str] = &["base_salary", "bonus", "overtime", "deductions"];

#[derive(Deserialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "محمد حسن")]
    pub name: String,
    #[schema(example = "مراقب عمال")]
    pub position: Option<String>,
    pub phone: Option<String>,
    #[schema(example = 6000.0)]
    pub base_salary: Option<f64>,
    pub bonus: Option<f64>,
    pub overtime: Option<f64>,
    pub deductions: Option<f64>,
    pub project_id: Option<i64>,
    pub hire_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// active | inactive
    pub status: Option<EmployeeStatus>,
    pub project_id: Option<i64>,
    /// Matches name, position or phone
    pub search: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct PaySalary {
    /// Any day within the month being paid.
    #[schema(example = "2024-05-01")]
    pub month: NaiveDate,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Serialize, ToSchema, sqlx::FromRow)]
pub struct PayrollLine {
    /// `null` groups employees not assigned to a project.
    pub project_id: Option<i64>,
    pub employee_count: i64,
    pub total_base: f64,
    pub total_bonus: f64,
    pub total_overtime: f64,
    pub total_deductions: f64,
    pub total_net: f64,
}

#[derive(Serialize, ToSchema)]
pub struct PayrollSummary {
    pub lines: Vec<PayrollLine>,
    pub employee_count: i64,
    pub total_net: f64,
}

fn non_negative(value: Option<f64>, field: &str) -> Result<f64, ApiError> {
    let v = value.unwrap_or(0.0);
    if !v.is_finite() || v < 0.0 {
        return Err(ApiError::bad_request(format!("قيمة غير صالحة للحقل: {field}")));
    }
    Ok(v)
}

/// List employees
#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses((status = 200, description = "Paginated employee list")),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<EmployeeQuery>,
) -> Result<impl Responder, ApiError> {
    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(status) = query.status {
        filters.push("status = {}", FilterValue::Text(status.to_string()));
    }
    if let Some(project_id) = query.project_id {
        filters.push("project_id = {}", FilterValue::I64(project_id));
    }
    if let Some(search) = &query.search {
        filters.search(&["name", "position", "phone"], search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM employees {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees {where_clause} ORDER BY id DESC LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );

    let mut items = filters
        .bind_as(sqlx::query_as::<_, Employee>(&data_sql))
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

async fn fetch_employee(pool: &PgPool, id: i64) -> Result<Employee, ApiError> {
    sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("الموظف غير موجود"))
}

/// Get an employee
#[utoipa::path(
    get,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee ID")),
    responses((status = 200, body = Employee), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    let employee = fetch_employee(pool.get_ref(), path.into_inner()).await?;
    Ok(response::ok(redacted(employee, &auth.permissions)))
}

/// Create an employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses((status = 201, body = Employee), (status = 400), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateEmployee>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageEmployees)?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("اسم الموظف مطلوب"));
    }

    let base_salary = non_negative(payload.base_salary, "base_salary")?;
    let bonus = non_negative(payload.bonus, "bonus")?;
    let overtime = non_negative(payload.overtime, "overtime")?;
    let deductions = non_negative(payload.deductions, "deductions")?;

    let employee = sqlx::query_as::<_, Employee>(&format!(
        r#"
        INSERT INTO employees
            (name, position, phone, base_salary, bonus, overtime, deductions, project_id, hire_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {EMPLOYEE_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(&payload.position)
    .bind(&payload.phone)
    .bind(base_salary)
    .bind(bonus)
    .bind(overtime)
    .bind(deductions)
    .bind(payload.project_id)
    .bind(payload.hire_date)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to create employee");
        ApiError::from(e)
    })?;

    info!(employee_id = employee.id, "Employee created");

    Ok(response::created(
        "تمت إضافة الموظف بنجاح",
        redacted(employee, &auth.permissions),
    ))
}

/// Update an employee
#[utoipa::path(
    put,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee ID")),
    request_body = Object,
    responses((status = 200, body = Employee), (status = 400), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: web::Json<Value>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageEmployees)?;
    let employee_id = path.into_inner();

    let touches_salary = SALARY_FIELDS.iter().any(|f| body.get(*f).is_some());
    if touches_salary && !auth.permissions.sees_salaries() {
        return Err(ApiError::forbidden("ليس لديك صلاحية لتعديل الرواتب"));
    }

    let update = build_update_sql("employees", &body, UPDATABLE, "id", employee_id)?;
    if execute_update(pool.get_ref(), update).await? == 0 {
        return Err(ApiError::not_found("الموظف غير موجود"));
    }

    let employee = fetch_employee(pool.get_ref(), employee_id).await?;
    info!(employee_id, "Employee updated");

    Ok(response::ok_with_message(
        "تم تحديث بيانات الموظف",
        redacted(employee, &auth.permissions),
    ))
}

/// Deactivate an employee (soft delete)
#[utoipa::path(
    delete,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee ID")),
    responses((status = 200), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageEmployees)?;
    let employee_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE employees SET status = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(EmployeeStatus::Inactive.as_ref())
    .bind(employee_id)
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("الموظف غير موجود"));
    }

    info!(employee_id, "Employee deactivated");
    Ok(response::message("تم إيقاف الموظف"))
}

/// Pay an employee's monthly net salary from the safe
#[utoipa::path(
    post,
    path = "/api/employees/{id}/pay",
    params(("id" = i64, Path, description = "Employee ID")),
    request_body = PaySalary,
    responses(
        (status = 201, body = crate::model::transaction::Transaction),
        (status = 400, description = "Inactive employee, zero salary or insufficient balance"),
        (status = 403),
        (status = 404)
    ),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn pay_salary(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    payload: web::Json<PaySalary>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManagePayroll)?;
    let employee_id = path.into_inner();

    let mut db_tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (String, String, f64, f64, f64, f64, Option<i64>)>(
        r#"
        SELECT name, status, base_salary, bonus, overtime, deductions, project_id
        FROM employees
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(employee_id)
    .fetch_optional(&mut *db_tx)
    .await?
    .ok_or_else(|| ApiError::not_found("الموظف غير موجود"))?;

    let (name, status, base, bonus, overtime, deductions, project_id) = row;

    if status != EmployeeStatus::Active.as_ref() {
        return Err(ApiError::bad_request("لا يمكن صرف راتب لموظف غير نشط"));
    }

    let amount = net_salary(base, bonus, overtime, deductions);
    if amount <= 0.0 {
        return Err(ApiError::bad_request("صافي الراتب يجب أن يكون أكبر من صفر"));
    }

    let month = payload.month.format("%Y-%m").to_string();
    let already_paid = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM transactions
            WHERE employee_id = $1
              AND type = 'outflow'
              AND is_voided = FALSE
              AND description LIKE '%' || $2
        )
        "#,
    )
    .bind(employee_id)
    .bind(month_marker(&month))
    .fetch_one(&mut *db_tx)
    .await?;

    if already_paid {
        return Err(ApiError::conflict("تم صرف راتب هذا الشهر مسبقاً"));
    }

    let tx = record_transaction(
        &mut db_tx,
        NewTransaction {
            kind: TransactionType::Outflow,
            amount,
            description: Some(salary_description(&name, &month)),
            project_id,
            employee_id: Some(employee_id),
            expense_id: None,
            contractor_id: None,
            payment_method: payload.payment_method.unwrap_or_default(),
            transaction_date: None,
            created_by: auth.user_id,
        },
    )
    .await?;

    db_tx.commit().await?;

    info!(employee_id, %month, amount, "Salary paid");

    Ok(response::created("تم صرف الراتب", redacted(tx, &auth.permissions)))
}

fn month_marker(month: &str) -> String {
    format!("عن شهر {month}")
}

// Ends with the month marker so a repeated payment is found even after a rename.
fn salary_description(name: &str, month: &str) -> String {
    format!("راتب {name} {}", month_marker(month))
}

/// Payroll totals per project
#[utoipa::path(
    get,
    path = "/api/payroll/summary",
    responses((status = 200, body = PayrollSummary), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Employees"
)]
pub async fn payroll_summary(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ViewSalaries)?;

    let lines = sqlx::query_as::<_, PayrollLine>("SELECT * FROM payroll_totals()")
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::ok(summarize_payroll(lines)))
}

fn summarize_payroll(lines: Vec<PayrollLine>) -> PayrollSummary {
    let employee_count = lines.iter().map(|l| l.employee_count).sum();
    let total_net = lines.iter().map(|l| l.total_net).sum();
    PayrollSummary {
        lines,
        employee_count,
        total_net,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(project_id: Option<i64>, count: i64, net: f64) -> PayrollLine {
        PayrollLine {
            project_id,
            employee_count: count,
            total_base: net,
            total_bonus: 0.0,
            total_overtime: 0.0,
            total_deductions: 0.0,
            total_net: net,
        }
    }

    #[test]
    fn payroll_summary_totals_all_lines() {
        let summary = summarize_payroll(vec![line(Some(1), 3, 18_000.0), line(None, 2, 7_500.0)]);
        assert_eq!(summary.employee_count, 5);
        assert_eq!(summary.total_net, 25_500.0);
        assert_eq!(summary.lines.len(), 2);
    }

    #[test]
    fn salary_description_ends_with_the_month_marker() {
        let description = salary_description("علي", "2024-05");
        assert!(description.ends_with(&month_marker("2024-05")));
        assert!(!description.ends_with(&month_marker("2024-06")));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(non_negative(Some(-1.0), "bonus").is_err());
        assert!(non_negative(Some(f64::NAN), "bonus").is_err());
        assert_eq!(non_negative(None, "bonus").unwrap(), 0.0);
    }
}
