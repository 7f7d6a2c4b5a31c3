use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::time::Duration;

/// Vendor employee code (biometric code or fingerprint id) => local user id.
pub static CODE_CACHE: Lazy<Cache<String, u64>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(100_000)
        .time_to_live(Duration::from_secs(6 * 3600))
        .build()
});

pub async fn remember(code: &str, user_id: u64) {
    CODE_CACHE.insert(code.to_string(), user_id).await;
}

/// Drop a code after the user's biometric identifiers change.
pub async fn forget(code: &str) {
    CODE_CACHE.invalidate(code).await;
}

pub async fn forget_all<'a>(codes: impl IntoIterator<Item = &'a str>) {
    for code in codes {
        forget(code.trim()).await;
    }
}

/// Splits `codes` into cached hits and the codes still to be looked up.
pub async fn lookup(codes: &[String]) -> (HashMap<String, u64>, Vec<String>) {
    let mut hits = HashMap::new();
    let mut misses = Vec::new();

    for code in codes {
        if hits.contains_key(code) || misses.contains(code) {
            continue;
        }
        match CODE_CACHE.get(code).await {
            Some(user_id) => {
                hits.insert(code.clone(), user_id);
            }
            None => misses.push(code.clone()),
        }
    }

    (hits, misses)
}

/// Resolves vendor codes for active users: cache first, then one query for the misses.
pub async fn resolve_codes(pool: &MySqlPool, codes: &[String]) -> Result<HashMap<String, u64>, sqlx::Error> {
    let (mut resolved, misses) = lookup(codes).await;
    if misses.is_empty() {
        return Ok(resolved);
    }

    let mut qb = sqlx::QueryBuilder::<sqlx::MySql>::new(
        "SELECT id, biometric_code, fingerprint_id FROM users WHERE is_active = TRUE AND (biometric_code IN (",
    );
    {
        let mut list = qb.separated(", ");
        for code in &misses {
            list.push_bind(code.as_str());
        }
    }
    qb.push(") OR fingerprint_id IN (");
    {
        let mut list = qb.separated(", ");
        for code in &misses {
            list.push_bind(code.as_str());
        }
    }
    qb.push("))");

    let rows: Vec<(u64, Option<String>, Option<String>)> = qb.build_query_as().fetch_all(pool).await?;

    // biometric_code wins over fingerprint_id when both match
    for (user_id, _, fingerprint_id) in &rows {
        if let Some(fp) = fingerprint_id {
            if misses.contains(fp) {
                resolved.insert(fp.clone(), *user_id);
            }
        }
    }
    for (user_id, biometric_code, _) in &rows {
        if let Some(code) = biometric_code {
            if misses.contains(code) {
                resolved.insert(code.clone(), *user_id);
            }
        }
    }

    for code in &misses {
        if let Some(user_id) = resolved.get(code) {
            remember(code, *user_id).await;
        }
    }

    Ok(resolved)
}

/// Preloads codes of active users so the first device sync skips the database.
pub async fn warmup_code_cache(pool: &MySqlPool) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (u64, String)>(
        r#"
        SELECT id, biometric_code
        FROM users
        WHERE is_active = TRUE AND biometric_code IS NOT NULL
        "#,
    )
    .fetch(pool);

    let mut total = 0usize;
    while let Some(row) = stream.next().await {
        let (user_id, code) = row?;
        remember(&code, user_id).await;
        total += 1;
    }

    log::info!("Biometric code cache warmup complete: {} users", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn lookup_splits_hits_and_misses() {
        remember("EMP-CACHE-1", 41).await;

        let codes = vec![
            "EMP-CACHE-1".to_string(),
            "EMP-CACHE-404".to_string(),
            "EMP-CACHE-404".to_string(),
        ];
        let (hits, misses) = lookup(&codes).await;

        assert_eq!(hits.get("EMP-CACHE-1"), Some(&41));
        assert_eq!(misses, vec!["EMP-CACHE-404".to_string()]);
    }

    #[actix_web::test]
    async fn forget_evicts() {
        remember("EMP-CACHE-2", 42).await;
        forget("EMP-CACHE-2").await;
        let (hits, misses) = lookup(&["EMP-CACHE-2".to_string()]).await;
        assert!(hits.is_empty());
        assert_eq!(misses.len(), 1);
    }

    #[actix_web::test]
    async fn reassigned_code_is_resolved_again() {
        // cached as someone's fingerprint id, then handed out as another user's biometric code
        remember("EMP-CACHE-3", 43).await;
        remember("EMP-CACHE-4", 43).await;
        forget_all(["EMP-CACHE-3", " EMP-CACHE-4 "]).await;

        let codes = vec!["EMP-CACHE-3".to_string(), "EMP-CACHE-4".to_string()];
        let (hits, misses) = lookup(&codes).await;
        assert!(hits.is_empty());
        assert_eq!(misses, codes);
    }
}
