use crate::{
    auth::auth::AuthUser,
    error::ApiError,
    model::{contractor::Contractor, permissions::Capability},
    utils::{
        db_utils::{Column, ColumnKind, FilterValue, Filters, build_update_sql, execute_update},
        response::{self, Page, paging},
    },
};
use actix_web::{Responder, web};
use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const UPDATABLE: &[Column] = &[
    Column::required("name", ColumnKind::Text),
    Column::optional("category", ColumnKind::Text),
    Column::optional("phone", ColumnKind::Text),
    Column::optional("notes", ColumnKind::Text),
    Column::required("is_active", ColumnKind::Bool),
];

#[derive(Deserialize, ToSchema)]
pub struct CreateContractor {
    #[schema(example = "مؤسسة النور للكهرباء")]
    pub name: String,
    #[schema(example = "كهرباء")]
    pub category: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ContractorQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub is_active: Option<bool>,
    pub category: Option<String>,
    /// Matches name, category or phone
    pub search: Option<String>,
}

/// List contractors
#[utoipa::path(
    get,
    path = "/api/contractors",
    params(ContractorQuery),
    responses((status = 200, description = "Paginated contractor list")),
    security(("bearer_auth" = [])),
    tag = "Contractors"
)]
pub async fn list_contractors(
    _auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<ContractorQuery>,
) -> Result<impl Responder, ApiError> {
    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(active) = query.is_active {
        filters.push("is_active = {}", FilterValue::Bool(active));
    }
    if let Some(category) = &query.category {
        filters.push("category = {}", FilterValue::Text(category.clone()));
    }
    if let Some(search) = &query.search {
        filters.search(&["name", "category", "phone"], search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM contractors {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT * FROM contractors {where_clause} ORDER BY name LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );

    let items = filters
        .bind_as(sqlx::query_as::<_, Contractor>(&data_sql))
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    Ok(response::ok(Page {
        items,
        page,
        per_page,
        total,
    }))
}

async fn fetch_contractor(pool: &PgPool, id: i64) -> Result<Contractor, ApiError> {
    sqlx::query_as::<_, Contractor>("SELECT * FROM contractors WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("المقاول غير موجود"))
}

/// Get a contractor
#[utoipa::path(
    get,
    path = "/api/contractors/{id}",
    params(("id" = i64, Path, description = "Contractor ID")),
    responses((status = 200, body = Contractor), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Contractors"
)]
pub async fn get_contractor(
    _auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    Ok(response::ok(fetch_contractor(pool.get_ref(), path.into_inner()).await?))
}

/// Create a contractor
#[utoipa::path(
    post,
    path = "/api/contractors",
    request_body = CreateContractor,
    responses((status = 201, body = Contractor), (status = 400), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Contractors"
)]
pub async fn create_contractor(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateContractor>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageContractors)?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("اسم المقاول مطلوب"));
    }

    let contractor = sqlx::query_as::<_, Contractor>(
        r#"
        INSERT INTO contractors (name, category, phone, notes)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(&payload.category)
    .bind(&payload.phone)
    .bind(&payload.notes)
    .fetch_one(pool.get_ref())
    .await?;

    info!(contractor_id = contractor.id, "Contractor created");
    Ok(response::created("تمت إضافة المقاول بنجاح", contractor))
}

/// Update a contractor
#[utoipa::path(
    put,
    path = "/api/contractors/{id}",
    params(("id" = i64, Path, description = "Contractor ID")),
    request_body = Object,
    responses((status = 200, body = Contractor), (status = 400), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Contractors"
)]
pub async fn update_contractor(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    body: web::Json<Value>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageContractors)?;
    let contractor_id = path.into_inner();

    let update = build_update_sql("contractors", &body, UPDATABLE, "id", contractor_id)?;
    if execute_update(pool.get_ref(), update).await? == 0 {
        return Err(ApiError::not_found("المقاول غير موجود"));
    }

    let contractor = fetch_contractor(pool.get_ref(), contractor_id).await?;
    info!(contractor_id, "Contractor updated");

    Ok(response::ok_with_message("تم تحديث بيانات المقاول", contractor))
}

/// Deactivate a contractor (soft delete)
#[utoipa::path(
    delete,
    path = "/api/contractors/{id}",
    params(("id" = i64, Path, description = "Contractor ID")),
    responses((status = 200), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Contractors"
)]
pub async fn delete_contractor(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageContractors)?;
    let contractor_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE contractors SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
    )
    .bind(contractor_id)
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("المقاول غير موجود"));
    }

    info!(contractor_id, "Contractor deactivated");
    Ok(response::message("تم إيقاف المقاول"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activation_flag_must_be_boolean() {
        assert!(build_update_sql("contractors", &json!({ "is_active": "yes" }), UPDATABLE, "id", 1).is_err());
        assert!(build_update_sql("contractors", &json!({ "is_active": null }), UPDATABLE, "id", 1).is_err());

        let update =
            build_update_sql("contractors", &json!({ "is_active": true }), UPDATABLE, "id", 1).unwrap();
        assert_eq!(
            update.sql,
            "UPDATE contractors SET is_active = $1, updated_at = NOW() WHERE id = $2"
        );
    }
}
