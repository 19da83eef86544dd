use std::time::{SystemTime, UNIX_EPOCH};

use crate::{model::role::Role, models::Claims};
use jsonwebtoken::errors::{Error, ErrorKind};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

pub fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

/// Issues a signed access token valid for `ttl` seconds.
pub fn generate_token(
    user_id: i64,
    username: String,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    generate_token_at(now(), user_id, username, role, secret, ttl)
}

/// Same as [`generate_token`] with an explicit `iat`, used to land a fresh token on a revocation cutoff.
pub fn generate_token_at(
    issued_at: usize,
    user_id: i64,
    username: String,
    role: Role,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let expires_at = issued_at
        .checked_add(ttl)
        .ok_or_else(|| Error::from(ErrorKind::InvalidToken))?;
    let claims = Claims {
        user_id,
        sub: username,
        role,
        iat: issued_at,
        exp: expires_at,
        jti: Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn issued_token_verifies_with_same_secret() {
        let (token, claims) =
            generate_token(42, "mona".into(), Role::Partners, SECRET, 3600).unwrap();
        let decoded = verify_token(&token, SECRET).unwrap();

        assert_eq!(decoded.user_id, 42);
        assert_eq!(decoded.sub, "mona");
        assert_eq!(decoded.role, Role::Partners);
        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.exp - decoded.iat, 3600);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = generate_token(1, "a".into(), Role::Admin, SECRET, 60).unwrap();
        let err = verify_token(&token, "other-secret").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidSignature);
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims {
            user_id: 1,
            sub: "a".into(),
            role: Role::Admin,
            iat: now() - 10_000,
            exp: now() - 5_000,
            jti: "old".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let err = verify_token(&token, SECRET).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ExpiredSignature);
    }

    #[test]
    fn overflowing_lifetime_is_an_error() {
        let err = generate_token(1, "a".into(), Role::Admin, SECRET, usize::MAX).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidToken);
    }

    #[test]
    fn every_token_gets_its_own_jti() {
        let (_, a) = generate_token(1, "a".into(), Role::Admin, SECRET, 60).unwrap();
        let (_, b) = generate_token(1, "a".into(), Role::Admin, SECRET, 60).unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
