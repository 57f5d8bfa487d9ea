use attachments_migrate_lib::{
    db::open_sqlite_pool, legacy::LegacyRecord, php, php::PhpValue, HostStore, Tables,
};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_migrate")
}

fn migrate(db: &Path, args: &[&str]) -> std::io::Result<Output> {
    Command::new(bin())
        .env_remove("ATTACHMENTS_MIGRATE_LOG_DIR")
        .env("ATTACHMENTS_MIGRATE_LOG", "off")
        .arg("--db")
        .arg(db)
        .args(args)
        .output()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

async fn seed(db: &Path) -> anyhow::Result<i64> {
    let host = HostStore::new(open_sqlite_pool(db, false).await?, Tables::default());
    let settings = PhpValue::assoc([(
        "post_types",
        PhpValue::assoc([("post", PhpValue::Bool(true))]),
    )]);
    host.update_option("attachments_settings", &php::serialize(&settings))
        .await?;

    let post: i64 = sqlx::query_scalar(
        "INSERT INTO wp_posts (post_type, post_status, post_title) VALUES ('post', 'publish', 'Hello') RETURNING ID",
    )
    .fetch_one(host.pool())
    .await?;
    let entry = LegacyRecord {
        id: "5".into(),
        title: "Hi".into(),
        caption: "Cap".into(),
        order: "2".into(),
    };
    host.add_post_meta(post, "_attachments", &entry.encode()).await?;
    host.pool().close().await;
    Ok(post)
}

async fn document(db: &Path, post: i64) -> anyhow::Result<Vec<String>> {
    let host = HostStore::new(open_sqlite_pool(db, false).await?, Tables::default());
    let values = host.post_meta(post, "attachments").await?;
    host.pool().close().await;
    Ok(values)
}

#[test]
fn status_on_missing_db_does_not_create_it() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("missing.sqlite3");

    let output = migrate(&db, &["status"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("Database does not exist"));
    assert!(!db.exists());

    let output = migrate(&db, &["run"])?;
    assert!(!output.status.success());
    assert!(!db.exists());
    Ok(())
}

#[tokio::test]
async fn init_schema_run_and_status() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("host.sqlite3");

    assert!(migrate(&db, &["init-schema"])?.status.success());
    let post = seed(&db).await?;

    let output = migrate(&db, &["--dry-run", "run"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("dry run"));
    assert!(document(&db, post).await?.is_empty());

    let reports = dir.path().join("reports");
    let output = migrate(
        &db,
        &["--report-dir", reports.to_str().unwrap(), "run", "--caption", ""],
    )?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Migrated: 1 posts, 1 records"));
    assert_eq!(
        document(&db, post).await?,
        vec![r#"{"attachments":[{"id":"5","fields":{"title":"Hi"}}]}"#.to_string()]
    );
    assert_eq!(std::fs::read_dir(&reports)?.count(), 1);

    // The flag now blocks a second run unless forced.
    let output = migrate(&db, &["run"])?;
    assert!(stdout(&output).contains("already run"));
    assert_eq!(document(&db, post).await?.len(), 1);

    let output = migrate(&db, &["status"])?;
    let text = stdout(&output);
    assert!(text.contains("attachments_migrated: set"));
    assert!(text.contains("attachments_pro_migrated: unset"));
    assert!(text.contains("Posts with _attachments: 1"));
    Ok(())
}
