use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

// The user table of a single company stays small; the filter autoscales past this anyway.
const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static USERNAMES: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

// Set once the filter holds every username in the table. Until then a miss proves nothing.
static WARMED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

/// false => definitely unused; true => maybe used, ask the database
fn might_exist(username: &str) -> bool {
    if !WARMED.load(Ordering::Acquire) {
        return true;
    }
    match USERNAMES.read() {
        Ok(filter) => filter.contains(&normalize(username)),
        // A poisoned lock only loses the fast path.
        Err(_) => true,
    }
}

pub fn insert(username: &str) {
    if let Ok(mut filter) = USERNAMES.write() {
        filter.add(&normalize(username));
    }
}

/// Usernames are unique case-insensitively.
pub async fn is_available(username: &str, pool: &PgPool) -> Result<bool, sqlx::Error> {
    let username = normalize(username);

    if !might_exist(&username) {
        return Ok(true);
    }

    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(username) = $1)",
    )
    .bind(&username)
    .fetch_one(pool)
    .await?;

    Ok(!exists)
}

pub async fn warmup_username_index(pool: &PgPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT username FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (username,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize(&username));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch)?;
    }

    WARMED.store(true, Ordering::Release);
    tracing::info!(users = total, "Username index warmup complete");
    Ok(())
}

fn insert_batch(usernames: &[String]) -> Result<()> {
    let mut filter = USERNAMES
        .write()
        .map_err(|_| anyhow!("username filter lock poisoned"))?;

    for username in usernames {
        filter.add(username);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_padding() {
        assert_eq!(normalize("  Admin "), "admin");
    }

    #[test]
    fn inserted_names_are_reported_as_maybe_taken() {
        insert("Index-Test-User");
        assert!(might_exist("index-test-user"));
    }

    #[actix_web::test]
    async fn cold_filter_falls_through_to_the_database() {
        assert!(!WARMED.load(Ordering::Acquire));
        assert!(might_exist("never-inserted-name"));

        // Nothing listens here, so an answer can only come from the filter.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(200))
            .connect_lazy("postgres://postgres@127.0.0.1:1/unused")
            .unwrap();
        assert!(is_available("never-inserted-name", &pool).await.is_err());
    }
}
