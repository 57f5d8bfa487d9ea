//! Creates the host tables the migrator touches when they are missing.
//!
//! A real site database already has them; this exists for standalone
//! stores (exports loaded into SQLite) and test fixtures. Every statement is
//! `IF NOT EXISTS`, so running it against a populated database is a no-op.

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::host::Tables;

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.len() > 160 {
        format!("{}…", &trimmed[..160])
    } else {
        trimmed.to_string()
    }
}

fn statements(tables: &Tables) -> Vec<String> {
    let Tables {
        posts,
        postmeta,
        options,
    } = tables;
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {posts} (
                ID INTEGER PRIMARY KEY AUTOINCREMENT,
                post_type TEXT NOT NULL DEFAULT 'post',
                post_status TEXT NOT NULL DEFAULT 'publish',
                post_title TEXT NOT NULL DEFAULT ''
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {postmeta} (
                meta_id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id INTEGER NOT NULL DEFAULT 0,
                meta_key TEXT,
                meta_value TEXT
            )"
        ),
        format!("CREATE INDEX IF NOT EXISTS {postmeta}_post_id ON {postmeta}(post_id)"),
        format!("CREATE INDEX IF NOT EXISTS {postmeta}_meta_key ON {postmeta}(meta_key)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {options} (
                option_id INTEGER PRIMARY KEY AUTOINCREMENT,
                option_name TEXT NOT NULL UNIQUE,
                option_value TEXT NOT NULL,
                autoload TEXT NOT NULL DEFAULT 'yes'
            )"
        ),
    ]
}

pub async fn ensure_host_schema(pool: &SqlitePool, tables: &Tables) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    for stmt in statements(tables) {
        info!(target: "attachments_migrate", event = "schema_stmt", sql = %preview(&stmt));
        if let Err(e) = sqlx::query(&stmt).execute(&mut *tx).await {
            error!(
                target: "attachments_migrate",
                event = "schema_stmt_error",
                sql = %preview(&stmt),
                error = %e
            );
            return Err(e.into());
        }
    }
    tx.commit().await?;
    info!(target: "attachments_migrate", event = "schema_ready", posts = %tables.posts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn creates_prefixed_tables_idempotently() -> anyhow::Result<()> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let tables = Tables::with_prefix("site2_");
        ensure_host_schema(&pool, &tables).await?;
        ensure_host_schema(&pool, &tables).await?;

        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'site2_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await?;
        assert_eq!(names, ["site2_options", "site2_postmeta", "site2_posts"]);
        Ok(())
    }

    #[test]
    fn preview_truncates_long_statements() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), 161);
        assert_eq!(preview("SELECT\n\t1"), "SELECT  1");
    }
}
