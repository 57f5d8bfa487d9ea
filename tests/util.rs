#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use attachments_migrate_lib::{
    legacy::LegacyRecord,
    php::{self, PhpValue},
    schema::ensure_host_schema,
    HostStore, Migrator, Tables,
};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub const META_KEY: &str = "attachments";

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    ensure_host_schema(&pool, &Tables::default())
        .await
        .expect("create host tables");
    pool
}

pub async fn temp_migrator() -> Migrator {
    let host = HostStore::new(temp_pool().await, Tables::default());
    Migrator::new(host, META_KEY)
}

pub async fn insert_post(host: &HostStore, post_type: &str, status: &str) -> i64 {
    let sql = format!(
        "INSERT INTO {} (post_type, post_status, post_title) VALUES (?, ?, 'Post')",
        host.tables().posts
    );
    sqlx::query(&sql)
        .bind(post_type)
        .bind(status)
        .execute(host.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

pub fn legacy_entry(id: &str, title: &str, caption: &str, order: &str) -> String {
    LegacyRecord {
        id: id.into(),
        title: title.into(),
        caption: caption.into(),
        order: order.into(),
    }
    .encode()
}

pub async fn add_legacy_entries(host: &HostStore, post_id: i64, entries: &[String]) {
    for entry in entries {
        host.add_post_meta(post_id, "_attachments", entry)
            .await
            .unwrap();
    }
}

/// Enables 1.x for `post_types` the way its settings page stored it.
pub async fn enable_legacy_post_types(host: &HostStore, post_types: &[&str]) {
    let settings = PhpValue::assoc([(
        "post_types",
        PhpValue::assoc(
            post_types
                .iter()
                .map(|t| (*t, PhpValue::from("true")))
                .collect::<Vec<_>>(),
        ),
    )]);
    host.update_option("attachments_settings", &php::serialize(&settings))
        .await
        .unwrap();
}

pub async fn stored_document(host: &HostStore, post_id: i64) -> Option<Value> {
    host.post_meta(post_id, META_KEY)
        .await
        .unwrap()
        .into_iter()
        .next()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}
