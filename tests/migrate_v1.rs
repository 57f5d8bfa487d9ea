use anyhow::Result;
use attachments_migrate_lib::MigrationMode;
use serde_json::json;
#[path = "util.rs"]
mod util;

use util::{
    add_legacy_entries, enable_legacy_post_types, insert_post, legacy_entry, stored_document,
    temp_migrator,
};

const APPLY: MigrationMode = MigrationMode::Apply;

#[tokio::test]
async fn converts_sample_entry() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    add_legacy_entries(host, post, &[legacy_entry("5", "Hi", "Cap", "2")]).await;

    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some("caption"), APPLY)
        .await?
        .expect("mapping is complete");

    assert_eq!(report.posts, 1);
    assert_eq!(report.records, 1);
    assert_eq!(report.instance, "attachments");
    assert_eq!(
        stored_document(host, post).await,
        Some(json!({"attachments": [{"id": "5", "fields": {"title": "Hi", "caption": "Cap"}}]}))
    );
    Ok(())
}

#[tokio::test]
async fn appends_in_ascending_order() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "draft").await;
    add_legacy_entries(
        host,
        post,
        &[
            legacy_entry("30", "c", "", "10"),
            legacy_entry("10", "a", "", "1"),
            legacy_entry("20", "b", "", "2"),
        ],
    )
    .await;

    migrator
        .migrate(Some("attachments"), Some("title"), Some("caption"), APPLY)
        .await?;

    let doc = stored_document(host, post).await.unwrap();
    let ids: Vec<_> = doc["attachments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["10", "20", "30"]);
    Ok(())
}

#[tokio::test]
async fn blank_field_names_are_omitted() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    add_legacy_entries(
        host,
        post,
        &[legacy_entry("1", "One", "First", "1"), legacy_entry("2", "Two", "Second", "2")],
    )
    .await;

    migrator
        .migrate(Some("My Files"), Some(""), Some("Photo Caption"), APPLY)
        .await?;

    assert_eq!(
        stored_document(host, post).await,
        Some(json!({"my_files": [
            {"id": "1", "fields": {"photo_caption": "First"}},
            {"id": "2", "fields": {"photo_caption": "Second"}}
        ]}))
    );
    Ok(())
}

#[tokio::test]
async fn running_twice_appends_twice() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    add_legacy_entries(
        host,
        post,
        &[legacy_entry("1", "a", "", "1"), legacy_entry("2", "b", "", "2")],
    )
    .await;

    for _ in 0..2 {
        migrator
            .migrate(Some("attachments"), Some("title"), Some("caption"), APPLY)
            .await?;
    }

    let doc = stored_document(host, post).await.unwrap();
    assert_eq!(doc["attachments"].as_array().unwrap().len(), 4);
    Ok(())
}

#[tokio::test]
async fn merges_into_existing_document_and_leaves_other_posts_alone() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;

    let migrated = insert_post(host, "post", "publish").await;
    host.add_post_meta(
        migrated,
        "attachments",
        r#"{"gallery":[{"id":"9","fields":{"title":"kept"}}]}"#,
    )
    .await?;
    add_legacy_entries(host, migrated, &[legacy_entry("5", "Hi", "", "1")]).await;

    let untouched = insert_post(host, "post", "publish").await;
    let untouched_raw = r#"{"attachments":[{"id":"3","fields":{}}]}"#;
    host.add_post_meta(untouched, "attachments", untouched_raw)
        .await?;

    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?
        .unwrap();
    assert_eq!(report.posts, 1);

    assert_eq!(
        stored_document(host, migrated).await,
        Some(json!({
            "gallery": [{"id": "9", "fields": {"title": "kept"}}],
            "attachments": [{"id": "5", "fields": {"title": "Hi"}}]
        }))
    );
    assert_eq!(
        host.post_meta(untouched, "attachments").await?,
        vec![untouched_raw.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn malformed_entries_are_skipped() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    add_legacy_entries(
        host,
        post,
        &["%%% not base64".to_string(), legacy_entry("7", "Ok", "", "1")],
    )
    .await;

    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some("caption"), APPLY)
        .await?
        .unwrap();

    assert_eq!(report.records, 1);
    assert_eq!(report.skipped_entries, 1);
    let doc = stored_document(host, post).await.unwrap();
    assert_eq!(doc["attachments"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_stored_json_is_replaced() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    host.add_post_meta(post, "attachments", "{not json").await?;
    add_legacy_entries(host, post, &[legacy_entry("5", "Hi", "", "1")]).await;

    migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?;

    assert_eq!(
        stored_document(host, post).await,
        Some(json!({"attachments": [{"id": "5", "fields": {"title": "Hi"}}]}))
    );
    Ok(())
}

#[tokio::test]
async fn non_list_instance_skips_the_post() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    let raw = r#"{"attachments":{"id":"1"}}"#;
    host.add_post_meta(post, "attachments", raw).await?;
    add_legacy_entries(host, post, &[legacy_entry("5", "Hi", "", "1")]).await;

    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?
        .unwrap();

    assert_eq!(report.posts, 0);
    assert_eq!(report.skipped_posts, 1);
    assert_eq!(host.post_meta(post, "attachments").await?, vec![raw.to_string()]);
    Ok(())
}

#[tokio::test]
async fn odd_unrelated_instance_is_carried_through() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    host.add_post_meta(post, "attachments", r#"{"other":{"id":"1"}}"#)
        .await?;
    add_legacy_entries(host, post, &[legacy_entry("5", "Hi", "", "1")]).await;

    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?
        .unwrap();

    assert_eq!(report.posts, 1);
    assert_eq!(report.skipped_posts, 0);
    assert_eq!(
        host.post_meta(post, "attachments").await?,
        vec![r#"{"other":{"id":"1"},"attachments":[{"id":"5","fields":{"title":"Hi"}}]}"#.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn post_selection_follows_settings_and_status() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    let entry = [legacy_entry("1", "a", "", "1")];

    let enabled = insert_post(host, "post", "publish").await;
    let other_type = insert_post(host, "page", "publish").await;
    let trashed = insert_post(host, "post", "trash").await;
    for post in [enabled, other_type, trashed] {
        add_legacy_entries(host, post, &entry).await;
    }

    // Without 1.x settings nothing matches.
    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?
        .unwrap();
    assert_eq!(report.posts, 0);
    assert_eq!(stored_document(host, enabled).await, None);

    enable_legacy_post_types(host, &["post"]).await;
    let report = migrator
        .migrate(Some("attachments"), Some("title"), Some(""), APPLY)
        .await?
        .unwrap();
    assert_eq!(report.posts, 1);
    assert!(stored_document(host, enabled).await.is_some());
    assert_eq!(stored_document(host, other_type).await, None);
    assert_eq!(stored_document(host, trashed).await, None);
    Ok(())
}

#[tokio::test]
async fn dry_run_counts_without_writing() -> Result<()> {
    let migrator = temp_migrator().await;
    let host = migrator.host();
    enable_legacy_post_types(host, &["post"]).await;
    let post = insert_post(host, "post", "publish").await;
    add_legacy_entries(host, post, &[legacy_entry("5", "Hi", "", "1")]).await;

    let report = migrator
        .migrate(
            Some("attachments"),
            Some("title"),
            Some("caption"),
            MigrationMode::DryRun,
        )
        .await?
        .unwrap();

    assert_eq!(report.records, 1);
    assert_eq!(report.mode, MigrationMode::DryRun);
    assert_eq!(stored_document(host, post).await, None);
    Ok(())
}

#[tokio::test]
async fn incomplete_mapping_is_rejected() -> Result<()> {
    let migrator = temp_migrator().await;
    assert!(migrator
        .migrate(None, Some("title"), Some("caption"), APPLY)
        .await?
        .is_none());
    assert!(migrator
        .migrate(Some(""), Some("title"), Some("caption"), APPLY)
        .await?
        .is_none());
    assert!(migrator
        .migrate(Some("attachments"), Some("title"), None, APPLY)
        .await?
        .is_none());
    Ok(())
}
