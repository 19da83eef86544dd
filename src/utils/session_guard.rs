use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::time::Duration;

use crate::models::Claims;

/// How long a revocation is remembered. `JWT_EXPIRES_IN` may not exceed it.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 86400);

/// jti => revoked
static REVOKED_JTIS: Lazy<Cache<String, ()>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(200_000)
        .time_to_live(MAX_TOKEN_TTL)
        .build()
});

/// user id => unix seconds; tokens issued before this are dead
static USER_CUTOFFS: Lazy<Cache<i64, usize>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(50_000)
        .time_to_live(MAX_TOKEN_TTL)
        .build()
});

pub async fn revoke_jti(jti: &str) {
    REVOKED_JTIS.insert(jti.to_string(), ()).await;
}

/// Invalidates every token the user holds that was issued strictly before `cutoff`.
pub async fn revoke_user_before(user_id: i64, cutoff: usize) {
    let current = USER_CUTOFFS.get(&user_id).await.unwrap_or(0);
    USER_CUTOFFS.insert(user_id, current.max(cutoff)).await;
}

pub async fn is_revoked(claims: &Claims) -> bool {
    if REVOKED_JTIS.contains_key(&claims.jti) {
        return true;
    }

    match USER_CUTOFFS.get(&claims.user_id).await {
        Some(cutoff) => claims.iat < cutoff,
        None => false,
    }
}

/// Persists a logout and marks it in memory.
pub async fn persist_revocation(pool: &PgPool, claims: &Claims) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO revoked_tokens (jti, user_id, expires_at)
        VALUES ($1, $2, TO_TIMESTAMP($3))
        ON CONFLICT (jti) DO NOTHING
        "#,
    )
    .bind(&claims.jti)
    .bind(claims.user_id)
    .bind(claims.exp as f64)
    .execute(pool)
    .await?;

    revoke_jti(&claims.jti).await;
    Ok(())
}

/// Persists a per-user cutoff (password change, deactivation) and marks it in memory.
pub async fn persist_user_cutoff(pool: &PgPool, user_id: i64, cutoff: usize) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET tokens_valid_after = TO_TIMESTAMP($1) WHERE id = $2")
        .bind(cutoff as f64)
        .bind(user_id)
        .execute(pool)
        .await?;

    revoke_user_before(user_id, cutoff).await;
    Ok(())
}

/// Loads still-relevant revocations from Postgres into memory.
pub async fn warmup_session_guard(pool: &PgPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>(
        "SELECT jti FROM revoked_tokens WHERE expires_at > NOW()",
    )
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total_jtis = 0usize;

    while let Some(row) = stream.next().await {
        let (jti,) = row?;
        batch.push(jti);
        total_jtis += 1;

        if batch.len() >= batch_size {
            mark_batch(&batch).await;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        mark_batch(&batch).await;
    }

    let cutoffs = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT id, EXTRACT(EPOCH FROM tokens_valid_after)::BIGINT
        FROM users
        WHERE tokens_valid_after IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    for (user_id, cutoff) in &cutoffs {
        revoke_user_before(*user_id, (*cutoff).max(0) as usize).await;
    }

    tracing::info!(
        revoked_tokens = total_jtis,
        user_cutoffs = cutoffs.len(),
        "Session guard warmup complete"
    );

    Ok(())
}

async fn mark_batch(jtis: &[String]) {
    let futures: Vec<_> = jtis
        .iter()
        .map(|jti| REVOKED_JTIS.insert(jti.clone(), ()))
        .collect();

    futures::future::join_all(futures).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;

    fn claims(user_id: i64, iat: usize, jti: &str) -> Claims {
        Claims {
            user_id,
            sub: "u".into(),
            role: Role::Admin,
            iat,
            exp: iat + 60,
            jti: jti.into(),
        }
    }

    #[actix_web::test]
    async fn revoked_jti_is_detected() {
        let c = claims(9001, 100, "guard-test-jti-1");
        assert!(!is_revoked(&c).await);

        revoke_jti(&c.jti).await;
        assert!(is_revoked(&c).await);
    }

    #[actix_web::test]
    async fn user_cutoff_kills_only_older_tokens() {
        revoke_user_before(9002, 1_000).await;

        assert!(is_revoked(&claims(9002, 999, "guard-test-jti-2")).await);
        assert!(!is_revoked(&claims(9002, 1_000, "guard-test-jti-3")).await);
        assert!(!is_revoked(&claims(9003, 1, "guard-test-jti-4")).await);
    }

    #[actix_web::test]
    async fn password_change_cutoff_spares_only_the_replacement_token() {
        use crate::auth::jwt::{generate_token, generate_token_at, now};

        let (_, same_second) = generate_token(9005, "u".into(), Role::Admin, "k", 600).unwrap();
        let cutoff = now() + 1;
        revoke_user_before(9005, cutoff).await;
        let (_, replacement) =
            generate_token_at(cutoff, 9005, "u".into(), Role::Admin, "k", 600).unwrap();

        assert!(is_revoked(&same_second).await);
        assert!(!is_revoked(&replacement).await);
    }

    #[actix_web::test]
    async fn cutoff_never_moves_backwards() {
        revoke_user_before(9004, 2_000).await;
        revoke_user_before(9004, 1_500).await;

        assert!(is_revoked(&claims(9004, 1_800, "guard-test-jti-5")).await);
    }
}
