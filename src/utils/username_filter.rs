use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::RwLock;

/// Expected number of accounts and false-positive rate.
const FILTER_CAPACITY: usize = 50_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static USERNAME_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

#[inline]
fn normalize(username: &str) -> String {
    username.trim().to_lowercase()
}

/// `false` means the username is certainly free; `true` means ask the database.
pub fn might_exist(username: &str) -> bool {
    let username = normalize(username);
    match USERNAME_FILTER.read() {
        Ok(filter) => filter.contains(&username),
        // a poisoned filter only loses the fast path
        Err(_) => true,
    }
}

pub fn insert(username: &str) {
    let username = normalize(username);
    if let Ok(mut filter) = USERNAME_FILTER.write() {
        filter.add(&username);
    }
}

/// true  => username AVAILABLE
/// false => username TAKEN
pub async fn is_username_available(username: &str, pool: &MySqlPool) -> Result<bool, sqlx::Error> {
    if !might_exist(username) {
        return Ok(true);
    }

    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? LIMIT 1)",
    )
    .bind(normalize(username))
    .fetch_one(pool)
    .await?;

    Ok(!exists)
}

/// Loads every existing username into the filter, streaming in batches.
pub async fn warmup_username_filter(pool: &MySqlPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT username FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (username,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize(&username));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    log::info!("Username filter warmup complete: {} users", total);
    Ok(())
}

fn insert_batch(usernames: &[String]) {
    if let Ok(mut filter) = USERNAME_FILTER.write() {
        for username in usernames {
            filter.add(username);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_names_are_reported_case_insensitively() {
        insert("Meera.Faculty");
        assert!(might_exist("meera.faculty"));
        assert!(might_exist("  MEERA.FACULTY "));
    }

    #[test]
    fn batch_insert_populates_filter() {
        insert_batch(&["batch.one".to_string(), "batch.two".to_string()]);
        assert!(might_exist("batch.one"));
        assert!(might_exist("batch.two"));
    }
}
