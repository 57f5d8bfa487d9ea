//! Access to the host CMS tables: posts, post meta and options.
//!
//! Meta helpers are free functions over a `SqliteConnection` so the migrator
//! can run a post's read-modify-write inside one transaction; `HostStore`
//! wraps the pool for everything else.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::php;
use crate::AppResult;

/// Post statuses `post_status => 'any'` leaves out.
const EXCLUDED_STATUSES: &str = "'trash', 'auto-draft'";

/// Fully qualified host table names for one table prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub posts: String,
    pub postmeta: String,
    pub options: String,
}

impl Tables {
    /// `prefix` must already be validated (see `MigrateConfig`).
    pub fn with_prefix(prefix: &str) -> Self {
        Tables {
            posts: format!("{prefix}posts"),
            postmeta: format!("{prefix}postmeta"),
            options: format!("{prefix}options"),
        }
    }
}

impl Default for Tables {
    fn default() -> Self {
        Tables::with_prefix(crate::config::DEFAULT_TABLE_PREFIX)
    }
}

/// All values stored for `key` on `post_id`, oldest first.
pub async fn read_post_meta(
    conn: &mut SqliteConnection,
    tables: &Tables,
    post_id: i64,
    key: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!(
        "SELECT meta_value FROM {} WHERE post_id = ? AND meta_key = ? ORDER BY meta_id",
        tables.postmeta
    );
    let rows: Vec<Option<String>> = sqlx::query_scalar(&sql)
        .bind(post_id)
        .bind(key)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(Option::unwrap_or_default).collect())
}

/// First value stored for `key`, like a single-value meta lookup.
pub async fn read_single_post_meta(
    conn: &mut SqliteConnection,
    tables: &Tables,
    post_id: i64,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    Ok(read_post_meta(conn, tables, post_id, key)
        .await?
        .into_iter()
        .next())
}

/// Sets every existing row for `key` to `value`, or inserts one row when
/// the post has none.
pub async fn write_post_meta(
    conn: &mut SqliteConnection,
    tables: &Tables,
    post_id: i64,
    key: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET meta_value = ? WHERE post_id = ? AND meta_key = ?",
        tables.postmeta
    );
    let updated = sqlx::query(&sql)
        .bind(value)
        .bind(post_id)
        .bind(key)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if updated == 0 {
        let sql = format!(
            "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?, ?, ?)",
            tables.postmeta
        );
        sqlx::query(&sql)
            .bind(post_id)
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
    }
    debug!(
        target: "attachments_migrate",
        event = "post_meta_written",
        post_id,
        meta_key = key,
        inserted = updated == 0
    );
    Ok(())
}

#[derive(Debug, Clone)]
pub struct HostStore {
    pool: SqlitePool,
    tables: Tables,
}

impl HostStore {
    pub fn new(pool: SqlitePool, tables: Tables) -> Self {
        HostStore { pool, tables }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Post types present in the host, standing in for the registered set.
    pub async fn post_types(&self) -> AppResult<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT post_type FROM {} ORDER BY post_type",
            self.tables.posts
        );
        Ok(sqlx::query_scalar(&sql).fetch_all(&self.pool).await?)
    }

    /// IDs of posts of the given types (any status but trash/auto-draft)
    /// carrying at least one `meta_key` row, ascending. No types, no posts.
    pub async fn posts_with_meta_key(
        &self,
        post_types: &[String],
        meta_key: &str,
    ) -> AppResult<Vec<i64>> {
        if post_types.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT DISTINCT p.ID FROM {posts} p JOIN {meta} m ON m.post_id = p.ID \
             WHERE p.post_status NOT IN ({EXCLUDED_STATUSES}) AND m.meta_key = ",
            posts = self.tables.posts,
            meta = self.tables.postmeta,
        ));
        query.push_bind(meta_key);
        query.push(" AND p.post_type IN (");
        let mut separated = query.separated(", ");
        for post_type in post_types {
            separated.push_bind(post_type.as_str());
        }
        separated.push_unseparated(") ORDER BY p.ID");
        Ok(query
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// Number of posts carrying `meta_key`, regardless of type or status.
    pub async fn count_posts_with_meta_key(&self, meta_key: &str) -> AppResult<i64> {
        let sql = format!(
            "SELECT COUNT(DISTINCT post_id) FROM {} WHERE meta_key = ?",
            self.tables.postmeta
        );
        Ok(sqlx::query_scalar(&sql)
            .bind(meta_key)
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn post_meta(&self, post_id: i64, key: &str) -> AppResult<Vec<String>> {
        let mut conn = self.pool.acquire().await?;
        Ok(read_post_meta(&mut conn, &self.tables, post_id, key).await?)
    }

    /// Inserts one meta row without touching existing ones.
    pub async fn add_post_meta(&self, post_id: i64, key: &str, value: &str) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?, ?, ?)",
            self.tables.postmeta
        );
        sqlx::query(&sql)
            .bind(post_id)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_option(&self, name: &str) -> AppResult<Option<String>> {
        let sql = format!(
            "SELECT option_value FROM {} WHERE option_name = ?",
            self.tables.options
        );
        Ok(sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Adds the option unless it already exists. Returns whether it was added.
    pub async fn add_option(&self, name: &str, value: &str, autoload: bool) -> AppResult<bool> {
        let sql = format!(
            "INSERT INTO {} (option_name, option_value, autoload) VALUES (?, ?, ?) \
             ON CONFLICT(option_name) DO NOTHING",
            self.tables.options
        );
        let inserted = sqlx::query(&sql)
            .bind(name)
            .bind(value)
            .bind(if autoload { "yes" } else { "no" })
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(inserted > 0)
    }

    pub async fn update_option(&self, name: &str, value: &str) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {} (option_name, option_value) VALUES (?, ?) \
             ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value",
            self.tables.options
        );
        sqlx::query(&sql)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reads a boolean flag option. Missing, blank and `"0"` read as false.
    pub async fn option_flag(&self, name: &str) -> AppResult<bool> {
        let Some(raw) = self.get_option(name).await? else {
            return Ok(false);
        };
        Ok(php::maybe_unserialize(&raw)
            .map(|value| value.is_truthy())
            .unwrap_or(false))
    }

    /// Sets a boolean flag option the way the host stores `true`.
    pub async fn set_option_flag(&self, name: &str) -> AppResult<()> {
        self.add_option(name, "1", false).await?;
        Ok(())
    }
}
