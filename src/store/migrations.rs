use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Create migrations table if not exists
    create_migrations_table(pool).await?;

    for (version, name, statements) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            let mut tx = pool.begin().await?;
            for sql in statements {
                sqlx::query(sql).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
                .bind(version)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Check if a migration has been applied
async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let result = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(result > 0)
}

/// All migrations in order; each statement runs on its own inside the migration's transaction
fn get_migrations() -> Vec<(i32, &'static str, &'static [&'static str])> {
    vec![
        (1, "membership_buckets", MIGRATION_001_MEMBERSHIP),
        (2, "score_indexes", MIGRATION_002_SCORES),
        (3, "bucket_mtimes", MIGRATION_003_MTIMES),
    ]
}

const MIGRATION_001_MEMBERSHIP: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pool_members (
        bucket VARCHAR(255) NOT NULL,
        proxy VARCHAR(300) NOT NULL,
        added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (bucket, proxy)
    )
    "#,
];

const MIGRATION_002_SCORES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pool_scores (
        bucket VARCHAR(255) NOT NULL,
        proxy VARCHAR(300) NOT NULL,
        score DOUBLE PRECISION NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (bucket, proxy)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_pool_scores_bucket_score ON pool_scores(bucket, score)",
];

const MIGRATION_003_MTIMES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pool_mtimes (
        key VARCHAR(255) PRIMARY KEY,
        mtime BIGINT NOT NULL
    )
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_versions_are_ordered_and_unique() {
        let versions: Vec<i32> = get_migrations().iter().map(|m| m.0).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_migrations_are_single_statements() {
        for (_, name, statements) in get_migrations() {
            assert!(!statements.is_empty(), "{} has no statements", name);
            for sql in statements {
                assert!(
                    !sql.trim().trim_end_matches(';').contains(';'),
                    "{} bundles several statements",
                    name
                );
            }
        }
    }
}
