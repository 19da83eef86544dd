use crate::utils::session_guard::MAX_TOKEN_TTL;
use derive_more::Display;
use dotenvy::dotenv;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::env;
use std::str::FromStr;

#[derive(Debug, Display)]
pub enum ConfigError {
    #[display(fmt = "{} must be set", _0)]
    Missing(&'static str),
    #[display(fmt = "{} has an invalid value: {}", _0, _1)]
    Invalid(&'static str, String),
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: String,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    /// Access token lifetime in seconds.
    pub jwt_expires_in: usize,
    pub cors_origins: Vec<String>,
    pub api_prefix: String,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_protected_per_min: u32,

    pub run_migrations: bool,
    pub bootstrap_admin: Option<(String, String)>,

    pub log_dir: String,
    pub log_level: tracing::Level,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub ssl: bool,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins over the individual `DB_*` parts.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url)
                .map_err(|e| ConfigError::Invalid("DATABASE_URL", e.to_string()));
        }

        let ssl_mode = if self.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(ssl_mode))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let database = DatabaseConfig {
            url: get("DATABASE_URL"),
            host: or("DB_HOST", "localhost"),
            port: parse("DB_PORT", &or("DB_PORT", "5432"))?,
            name: or("DB_NAME", "construction_finance"),
            user: or("DB_USER", "postgres"),
            password: lookup("DB_PASSWORD").unwrap_or_default(),
            ssl: parse_bool("DB_SSL", &or("DB_SSL", "false"))?,
            max_connections: parse("DB_POOL_MAX", &or("DB_POOL_MAX", "10"))?,
        };

        let cors_origins = or("CORS_ORIGIN", "*")
            .split(',')
            .map(|o| o.trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();

        let bootstrap_admin = match (get("ADMIN_USERNAME"), get("ADMIN_PASSWORD")) {
            (Some(u), Some(p)) => Some((u, p)),
            _ => None,
        };

        let jwt_expires_in: usize = parse("JWT_EXPIRES_IN", &or("JWT_EXPIRES_IN", "604800"))?; // 7 days
        if jwt_expires_in == 0 || jwt_expires_in as u64 > MAX_TOKEN_TTL.as_secs() {
            return Err(ConfigError::Invalid(
                "JWT_EXPIRES_IN",
                format!("{jwt_expires_in} (allowed 1..={})", MAX_TOKEN_TTL.as_secs()),
            ));
        }

        let log_level = tracing::Level::from_str(&or("LOG_LEVEL", "debug"))
            .map_err(|e| ConfigError::Invalid("LOG_LEVEL", e.to_string()))?;

        Ok(Self {
            server_addr: or("SERVER_ADDR", "0.0.0.0:5000"),
            database,
            jwt_secret,
            jwt_expires_in,
            cors_origins,
            api_prefix: or("API_PREFIX", "/api"),
            rate_login_per_min: parse("RATE_LOGIN_PER_MIN", &or("RATE_LOGIN_PER_MIN", "30"))?,
            rate_protected_per_min: parse(
                "RATE_PROTECTED_PER_MIN",
                &or("RATE_PROTECTED_PER_MIN", "1000"),
            )?,
            run_migrations: parse_bool("RUN_MIGRATIONS", &or("RUN_MIGRATIONS", "true"))?,
            bootstrap_admin,
            log_dir: or("LOG_DIR", "logs"),
            log_level,
        })
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(key, raw.to_string()))
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(key, raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = config_from(&[("JWT_SECRET", "s3cret")]).unwrap();

        assert_eq!(config.server_addr, "0.0.0.0:5000");
        assert_eq!(config.jwt_expires_in, 604_800);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.host, "localhost");
        assert!(config.database.url.is_none());
        assert!(config.run_migrations);
        assert!(config.allows_any_origin());
        assert!(config.bootstrap_admin.is_none());
        assert_eq!(config.log_level, tracing::Level::DEBUG);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = config_from(&[("DB_HOST", "db")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn invalid_port_is_reported_with_its_key() {
        let err = config_from(&[("JWT_SECRET", "x"), ("DB_PORT", "abc")]).unwrap_err();
        assert_eq!(err.to_string(), "DB_PORT has an invalid value: abc");
    }

    #[test]
    fn token_lifetime_must_fit_the_revocation_window() {
        for raw in ["0", "2592001", "18446744073709551615"] {
            let err = config_from(&[("JWT_SECRET", "x"), ("JWT_EXPIRES_IN", raw)]).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid("JWT_EXPIRES_IN", _)), "{raw}");
        }

        let config = config_from(&[("JWT_SECRET", "x"), ("JWT_EXPIRES_IN", "2592000")]).unwrap();
        assert_eq!(config.jwt_expires_in, 2_592_000);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = config_from(&[
            ("JWT_SECRET", "x"),
            ("CORS_ORIGIN", "https://app.example.com/, http://localhost:3000"),
        ])
        .unwrap();

        assert_eq!(
            config.cors_origins,
            vec!["https://app.example.com", "http://localhost:3000"]
        );
        assert!(!config.allows_any_origin());
    }

    #[test]
    fn bootstrap_admin_needs_both_values() {
        let only_user = config_from(&[("JWT_SECRET", "x"), ("ADMIN_USERNAME", "root")]).unwrap();
        assert!(only_user.bootstrap_admin.is_none());

        let both = config_from(&[
            ("JWT_SECRET", "x"),
            ("ADMIN_USERNAME", "root"),
            ("ADMIN_PASSWORD", "changeme"),
        ])
        .unwrap();
        assert_eq!(
            both.bootstrap_admin,
            Some(("root".to_string(), "changeme".to_string()))
        );
    }

    #[test]
    fn database_url_takes_precedence() {
        let config = config_from(&[
            ("JWT_SECRET", "x"),
            ("DATABASE_URL", "postgres://app:pw@db.internal:6543/finance"),
            ("DB_HOST", "ignored"),
        ])
        .unwrap();

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://app:pw@db.internal:6543/finance")
        );
        assert!(config.database.connect_options().is_ok());
    }
}
