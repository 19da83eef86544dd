use crate::{
    auth::auth::AuthUser,
    error::ApiError,
    model::{
        permissions::Capability,
        project::{PROJECT_STATUSES, Project, ProjectStatus, generate_code, validate_dates},
        redact::{redact_all, redacted},
    },
    utils::{
        db_utils::{Column, ColumnKind, FilterValue, Filters, build_update_sql, execute_update},
        response::{self, Page, paging},
    },
};
use actix_web::{Responder, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &[Column] = &[
    Column::required("name", ColumnKind::Text),
    Column::optional("location", ColumnKind::Text),
    Column::required("budget_estimate", ColumnKind::Money),
    Column::optional("client", ColumnKind::Text),
    Column::optional("start_date", ColumnKind::Date),
    Column::optional("end_date", ColumnKind::Date),
    Column::required("status", ColumnKind::OneOf(PROJECT_STATUSES)),
    Column::optional("description", ColumnKind::Text),
];

#[derive(Deserialize, ToSchema)]
pub struct CreateProject {
    /// Generated when omitted.
    #[schema(example = "PRJ-2024-001")]
    pub code: Option<String>,
    #[schema(example = "فيلا الياسمين")]
    pub name: String,
    pub location: Option<String>,
    #[schema(example = 750000.0)]
    pub budget_estimate: Option<f64>,
    pub client: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: Option<ProjectStatus>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ProjectQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// planning | active | completed | cancelled
    pub status: Option<ProjectStatus>,
    /// Matches name, code or client
    pub search: Option<String>,
}

/// List projects
#[utoipa::path(
    get,
    path = "/api/projects",
    params(ProjectQuery),
    responses((status = 200, description = "Paginated project list")),
    security(("bearer_auth" = [])),
    tag = "Projects"
)]
pub async fn list_projects(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<ProjectQuery>,
) -> Result<impl Responder, ApiError> {
    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(status) = query.status {
        filters.push("status = {}", FilterValue::Text(status.to_string()));
    }
    if let Some(search) = &query.search {
        filters.search(&["name", "code", "client"], search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM projects {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT * FROM projects {where_clause} ORDER BY id DESC LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );
    debug!(sql = %data_sql, page, per_page, "Fetching projects");

    let mut items = filters
        .bind_as(sqlx::query_as::<_, Project>(&data_sql))
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

/// Get a project
#[utoipa::path(
    get,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project ID")),
    responses((status = 200, body = Project), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Projects"
)]
pub async fn get_project(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    let project = fetch_project(pool.get_ref(), path.into_inner()).await?;
    Ok(response::ok(redacted(project, &auth.permissions)))
}

pub(crate) async fn fetch_project(pool: &PgPool, id: i64) -> Result<Project, ApiError> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("المشروع غير موجود"))
}

/// Create a project
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProject,
    responses(
        (status = 201, body = Project),
        (status = 400, description = "Validation failed"),
        (status = 403),
        (status = 409, description = "Project code already used")
    ),
    security(("bearer_auth" = [])),
    tag = "Projects"
)]
pub async fn create_project(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateProject>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageProjects)?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("اسم المشروع مطلوب"));
    }

    let budget = payload.budget_estimate.unwrap_or(0.0);
    if !budget.is_finite() || budget < 0.0 {
        return Err(ApiError::bad_request("الميزانية التقديرية يجب أن تكون رقماً موجباً"));
    }

    if !validate_dates(payload.start_date, payload.end_date) {
        return Err(ApiError::bad_request("تاريخ الانتهاء يجب أن يكون بعد تاريخ البدء"));
    }

    let code = payload
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
        .unwrap_or_else(generate_code);

    let status = payload.status.unwrap_or(ProjectStatus::Planning);

    let project = sqlx::query_as::<_, Project>(
        r#"
        INSERT INTO projects
            (code, name, location, budget_estimate, client, start_date, end_date, status, description, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(name)
    .bind(&payload.location)
    .bind(budget)
    .bind(&payload.client)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(status.as_ref())
    .bind(&payload.description)
    .bind(auth.user_id)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::conflict("رمز المشروع مستخدم مسبقاً"),
        other => other,
    })?;

    info!(project_id = project.id, code = %project.code, "Project created");

    Ok(response::created(
        "تم إنشاء المشروع بنجاح",
        redacted(project, &auth.permissions),
    ))
}

/// Update a project (the code is immutable)
#[utoipa::path(
    put,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project ID")),
    request_body = Object,
    responses(
        (status = 200, body = Project),
        (status = 400, description = "Unknown field, invalid value or attempt to change the code"),
        (status = 404)
    ),
    security(("bearer_auth" = [])),
    tag = "Projects"
)]
pub async fn update_project(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: web::Json<Value>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageProjects)?;
    let project_id = path.into_inner();

    if body.get("code").is_some() {
        return Err(ApiError::bad_request("رمز المشروع غير قابل للتعديل"));
    }
    if body.get("budget_estimate").is_some() && !auth.permissions.can_view_financials {
        return Err(ApiError::forbidden("ليس لديك صلاحية لتعديل الميزانية"));
    }
    // Cancelling is the soft delete and carries the delete permission.
    if body.get("status").and_then(Value::as_str) == Some(ProjectStatus::Cancelled.as_ref()) {
        auth.require(Capability::DeleteProjects)?;
    }

    let update = build_update_sql("projects", &body, UPDATABLE, "id", project_id)?;
    let affected = execute_update(pool.get_ref(), update).await?;

    if affected == 0 {
        return Err(ApiError::not_found("المشروع غير موجود"));
    }

    // end_date >= start_date is enforced by the table CHECK.
    let project = fetch_project(pool.get_ref(), project_id).await?;

    info!(project_id, "Project updated");

    Ok(response::ok_with_message(
        "تم تحديث المشروع",
        redacted(project, &auth.permissions),
    ))
}

/// Cancel a project (soft delete)
#[utoipa::path(
    delete,
    path = "/api/projects/{id}",
    params(("id" = i64, Path, description = "Project ID")),
    responses((status = 200, description = "Project cancelled"), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Projects"
)]
pub async fn delete_project(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::DeleteProjects)?;
    let project_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE projects SET status = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(ProjectStatus::Cancelled.as_ref())
    .bind(project_id)
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("المشروع غير موجود"));
    }

    info!(project_id, "Project cancelled");
    Ok(response::message("تم إلغاء المشروع"))
}
