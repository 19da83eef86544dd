use crate::{
    auth::{
        auth::AuthUser,
        handlers::{fetch_user, profile_of},
        jwt::now,
        password::{MIN_PASSWORD_LEN, hash_password},
    },
    error::ApiError,
    model::{
        permissions::Capability,
        role::Role,
        user::{USER_COLUMNS, UserProfile, UserRow},
    },
    utils::{
        db_utils::{FilterValue, Filters},
        response::{self, Page, paging},
        session_guard, username_index,
    },
};
use actix_web::{Responder, web};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "sara")]
    pub username: String,
    pub password: String,
    pub role: Role,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateUser {
    pub role: Option<Role>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    /// Resets the password and signs the user out everywhere.
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Matches username or full name
    pub search: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UsernameQuery {
    pub username: String,
}

#[derive(Serialize, ToSchema)]
pub struct UsernameAvailability {
    pub username: String,
    pub available: bool,
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "يجب ألا تقل كلمة المرور عن {MIN_PASSWORD_LEN} أحرف"
        )));
    }
    Ok(())
}

fn check_username(username: &str) -> Result<(), ApiError> {
    let valid = (3..=50).contains(&username.chars().count())
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(ApiError::bad_request(
            "اسم المستخدم يجب أن يكون من 3 إلى 50 حرفاً دون مسافات",
        ));
    }
    Ok(())
}

/// Whitespace-only values clear nothing; they are treated as absent.
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// List users
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserQuery),
    responses((status = 200, description = "Paginated user list"), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<UserQuery>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;

    let (page, per_page, offset) = paging(query.page, query.per_page);

    let mut filters = Filters::default();
    if let Some(role) = query.role {
        filters.push("role = {}", FilterValue::Text(role.to_string()));
    }
    if let Some(active) = query.is_active {
        filters.push("is_active = {}", FilterValue::Bool(active));
    }
    if let Some(search) = &query.search {
        filters.search(&["username", "full_name"], search);
    }
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM users {where_clause}");
    let total = filters
        .bind_scalar(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(pool.get_ref())
        .await?;

    let n = filters.next_placeholder();
    let data_sql = format!(
        "SELECT {USER_COLUMNS} FROM users {where_clause} ORDER BY id LIMIT ${} OFFSET ${}",
        n,
        n + 1
    );

    let rows = filters
        .bind_as(sqlx::query_as::<_, UserRow>(&data_sql))
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(pool.get_ref())
        .await?;

    let items = rows
        .into_iter()
        .map(profile_of)
        .collect::<Result<Vec<UserProfile>, _>>()?;

    Ok(response::ok(Page {
        items,
        page,
        per_page,
        total,
    }))
}

/// Get a user
#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses((status = 200, body = UserProfile), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;

    let row = fetch_user(pool.get_ref(), path.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found("المستخدم غير موجود"))?;

    Ok(response::ok(profile_of(row)?))
}

/// Check whether a username is free
#[utoipa::path(
    get,
    path = "/api/users/username-available",
    params(UsernameQuery),
    responses((status = 200, body = UsernameAvailability), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn username_available(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<UsernameQuery>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;

    let username = query.username.trim().to_string();
    check_username(&username)?;

    let available = username_index::is_available(&username, pool.get_ref()).await?;

    Ok(response::ok(UsernameAvailability { username, available }))
}

/// Create a user
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, body = UserProfile),
        (status = 400),
        (status = 403),
        (status = 409, description = "Username taken")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateUser>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;

    let username = payload.username.trim();
    check_username(username)?;
    check_password(&payload.password)?;

    if !username_index::is_available(username, pool.get_ref()).await? {
        return Err(ApiError::conflict("اسم المستخدم مستخدم مسبقاً"));
    }

    let hashed = hash_password(&payload.password).map_err(ApiError::internal)?;

    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        INSERT INTO users (username, password_hash, role, full_name, email, phone)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(username)
    .bind(&hashed)
    .bind(payload.role.as_ref())
    .bind(clean(&payload.full_name))
    .bind(clean(&payload.email))
    .bind(clean(&payload.phone))
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| match ApiError::from(e) {
        // Lost a race against another insert of the same name.
        ApiError::Conflict(_) => ApiError::conflict("اسم المستخدم مستخدم مسبقاً"),
        other => other,
    })?;

    username_index::insert(username);
    info!(user_id = row.id, role = %payload.role, created_by = auth.user_id, "User created");

    Ok(response::created("تم إنشاء المستخدم بنجاح", profile_of(row)?))
}

/// Update a user
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UpdateUser,
    responses((status = 200, body = UserProfile), (status = 400), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    payload: web::Json<UpdateUser>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        if payload.is_active == Some(false) {
            return Err(ApiError::bad_request("لا يمكنك تعطيل حسابك"));
        }
        if payload.role.is_some_and(|r| r != Role::Admin) {
            return Err(ApiError::bad_request("لا يمكنك تغيير صلاحيات حسابك"));
        }
    }

    let hashed = match &payload.password {
        Some(password) => {
            check_password(password)?;
            Some(hash_password(password).map_err(ApiError::internal)?)
        }
        None => None,
    };

    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        UPDATE users
        SET role = COALESCE($1, role),
            full_name = COALESCE($2, full_name),
            email = COALESCE($3, email),
            phone = COALESCE($4, phone),
            is_active = COALESCE($5, is_active),
            password_hash = COALESCE($6, password_hash),
            updated_at = NOW()
        WHERE id = $7
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(payload.role.map(|r| r.to_string()))
    .bind(clean(&payload.full_name))
    .bind(clean(&payload.email))
    .bind(clean(&payload.phone))
    .bind(payload.is_active)
    .bind(hashed.as_deref())
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("المستخدم غير موجود"))?;

    // A role change also invalidates tokens, since claims carry the role.
    let sign_out = hashed.is_some() || payload.is_active == Some(false) || payload.role.is_some();
    if sign_out {
        session_guard::persist_user_cutoff(pool.get_ref(), user_id, now() + 1).await?;
        info!(user_id, "Existing sessions revoked");
    }

    info!(user_id, updated_by = auth.user_id, "User updated");
    Ok(response::ok_with_message("تم تحديث المستخدم", profile_of(row)?))
}

/// Deactivate a user (soft delete)
#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses((status = 200), (status = 400, description = "Cannot deactivate yourself"), (status = 403), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn delete_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> Result<impl Responder, ApiError> {
    auth.require(Capability::ManageUsers)?;
    let user_id = path.into_inner();

    if user_id == auth.user_id {
        warn!(user_id, "Admin attempted to deactivate own account");
        return Err(ApiError::bad_request("لا يمكنك تعطيل حسابك"));
    }

    let result = sqlx::query("UPDATE users SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("المستخدم غير موجود"));
    }

    session_guard::persist_user_cutoff(pool.get_ref(), user_id, now() + 1).await?;

    info!(user_id, deactivated_by = auth.user_id, "User deactivated");
    Ok(response::message("تم تعطيل المستخدم"))
}
