use crate::{
    auth::{
        auth::AuthUser,
        jwt::{generate_token_at, now},
        password::{MIN_PASSWORD_LEN, hash_password, verify_password},
    },
    config::Config,
    error::ApiError,
    model::{
        permissions::Permissions,
        role::Role,
        user::{USER_COLUMNS, UserProfile, UserRow},
    },
    models::LoginReqDto,
    utils::{response, session_guard},
};
use actix_web::{Responder, web};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 604800)]
    pub expires_in: usize,
    pub user: UserProfile,
    pub permissions: Permissions,
}

#[derive(Serialize, ToSchema)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user: UserProfile,
    pub permissions: Permissions,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateProfile {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

pub(crate) async fn fetch_user(pool: &PgPool, user_id: i64) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub(crate) fn profile_of(row: UserRow) -> Result<UserProfile, ApiError> {
    let user_id = row.id;
    row.into_profile()
        .ok_or_else(|| ApiError::internal(format!("user {user_id} has an unknown role")))
}

fn issue_session(user: UserProfile, config: &Config, issued_at: usize) -> Result<SessionResponse, ApiError> {
    let (token, _) = generate_token_at(
        issued_at,
        user.id,
        user.username.clone(),
        user.role,
        &config.jwt_secret,
        config.jwt_expires_in,
    )
    .map_err(ApiError::internal)?;

    Ok(SessionResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: config.jwt_expires_in,
        permissions: Permissions::for_role(user.role),
        user,
    })
}

/// Log in
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account disabled"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, user),
    fields(username = %user.username)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
) -> Result<impl Responder, ApiError> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(ApiError::bad_request("اسم المستخدم وكلمة المرور مطلوبان"));
    }

    debug!("Fetching user from database");

    let db_user = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE LOWER(username) = LOWER($1)"
    ))
    .bind(user.username.trim())
    .fetch_optional(pool.get_ref())
    .await?;

    let db_user = match db_user {
        Some(u) => u,
        None => {
            info!("Invalid credentials: user not found");
            return Err(ApiError::unauthorized("اسم المستخدم أو كلمة المرور غير صحيحة"));
        }
    };

    if let Err(e) = verify_password(&user.password, &db_user.password_hash) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(ApiError::unauthorized("اسم المستخدم أو كلمة المرور غير صحيحة"));
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: account disabled");
        return Err(ApiError::forbidden("تم تعطيل هذا الحساب"));
    }

    // Not fatal; the login itself already succeeded.
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(db_user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    let session = issue_session(profile_of(db_user)?, &config, now())?;

    info!(user_id = session.user.id, role = %session.user.role, "Login successful");

    Ok(response::ok_with_message("تم تسجيل الدخول بنجاح", session))
}

/// Log out (revokes the presented token)
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(auth: AuthUser, pool: web::Data<PgPool>) -> impl Responder {
    if let Err(e) = session_guard::persist_revocation(pool.get_ref(), &auth.claims).await {
        // The in-memory revocation still applies to this process.
        warn!(error = %e, user_id = auth.user_id, "Failed to persist token revocation");
        session_guard::revoke_jti(&auth.claims.jti).await;
    }

    info!(user_id = auth.user_id, "Logged out");
    response::message("تم تسجيل الخروج بنجاح")
}

/// Verify the current token
#[utoipa::path(
    get,
    path = "/api/auth/verify",
    responses(
        (status = 200, description = "Token is valid", body = VerifyResponse),
        (status = 401, description = "Token invalid, expired or revoked")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn verify(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    let row = fetch_user(pool.get_ref(), auth.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::unauthorized("الحساب غير موجود أو معطل"))?;

    let user = profile_of(row)?;

    Ok(response::ok(VerifyResponse {
        valid: true,
        permissions: Permissions::for_role(user.role),
        user,
    }))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses((status = 200, body = UserProfile), (status = 404)),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn get_profile(auth: AuthUser, pool: web::Data<PgPool>) -> Result<impl Responder, ApiError> {
    let row = fetch_user(pool.get_ref(), auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("المستخدم غير موجود"))?;

    Ok(response::ok(profile_of(row)?))
}

/// Update the current user's contact details
#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = UpdateProfile,
    responses((status = 200, body = UserProfile)),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn update_profile(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    body: web::Json<UpdateProfile>,
) -> Result<impl Responder, ApiError> {
    let clean = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    let row = sqlx::query_as::<_, UserRow>(&format!(
        r#"
        UPDATE users
        SET full_name = COALESCE($1, full_name),
            email = COALESCE($2, email),
            phone = COALESCE($3, phone),
            updated_at = NOW()
        WHERE id = $4
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(clean(&body.full_name))
    .bind(clean(&body.email))
    .bind(clean(&body.phone))
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| ApiError::not_found("المستخدم غير موجود"))?;

    Ok(response::ok_with_message("تم تحديث الملف الشخصي", profile_of(row)?))
}

/// Change password; older tokens stop working and a fresh one is returned
#[utoipa::path(
    put,
    path = "/api/auth/profile/password",
    request_body = ChangePassword,
    responses(
        (status = 200, body = SessionResponse),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password wrong")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    body: web::Json<ChangePassword>,
) -> Result<impl Responder, ApiError> {
    if body.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "يجب ألا تقل كلمة المرور عن {MIN_PASSWORD_LEN} أحرف"
        )));
    }

    let row = fetch_user(pool.get_ref(), auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("المستخدم غير موجود"))?;

    if verify_password(&body.current_password, &row.password_hash).is_err() {
        return Err(ApiError::unauthorized("كلمة المرور الحالية غير صحيحة"));
    }

    let hashed = hash_password(&body.new_password).map_err(ApiError::internal)?;

    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&hashed)
        .bind(auth.user_id)
        .execute(pool.get_ref())
        .await?;

    // `iat` has second resolution: the cutoff also covers tokens issued earlier in this second,
    // and the replacement token is stamped at the cutoff so it survives.
    let cutoff = now() + 1;
    session_guard::persist_user_cutoff(pool.get_ref(), auth.user_id, cutoff).await?;
    session_guard::persist_revocation(pool.get_ref(), &auth.claims).await?;

    info!(user_id = auth.user_id, "Password changed");

    let session = issue_session(profile_of(row)?, &config, cutoff)?;
    Ok(response::ok_with_message("تم تغيير كلمة المرور", session))
}

/// Seeds the first admin account from `ADMIN_USERNAME` / `ADMIN_PASSWORD`.
pub async fn bootstrap_admin(pool: &PgPool, username: &str, password: &str) -> anyhow::Result<()> {
    let admin_exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE role = $1)",
    )
    .bind(Role::Admin.as_ref())
    .fetch_one(pool)
    .await?;

    if admin_exists {
        debug!("Admin account already present, skipping bootstrap");
        return Ok(());
    }

    let hashed = hash_password(password).map_err(|e| anyhow::anyhow!("{e}"))?;

    sqlx::query("INSERT INTO users (username, password_hash, role, full_name) VALUES ($1, $2, $3, $4)")
        .bind(username.trim())
        .bind(&hashed)
        .bind(Role::Admin.as_ref())
        .bind(Role::Admin.label())
        .execute(pool)
        .await?;

    crate::utils::username_index::insert(username);
    info!(username, "Bootstrap admin account created");
    Ok(())
}
