//! Moves legacy Attachments 1.x and Attachments Pro data into the JSON
//! instance document.
//!
//! Both passes share one shape: select the posts carrying a legacy key, then
//! per post decode, convert, append to the stored document and write it back
//! inside a single transaction. Legacy rows are only ever read.
//!
//! Neither pass is idempotent: running one twice appends the records twice.
//! The admin handlers and the CLI gate re-runs on the `*_migrated` flags.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::document::{Attachment, AttachmentsDocument};
use crate::host::{read_post_meta, read_single_post_meta, write_post_meta, HostStore};
use crate::legacy::{
    sort_legacy, LegacyRecord, LegacySettings, ProInstanceConfig, ProPayload, ProSettings,
    LEGACY_META_KEY, LEGACY_SETTINGS_OPTION, PRO_META_KEY, PRO_SETTINGS_OPTION,
};
use crate::text::{field_slug, htmlentities, stripslashes};
use crate::AppResult;

/// Post types searched for Pro data when the host reports none.
const FALLBACK_POST_TYPES: [&str; 2] = ["post", "page"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    DryRun,
    Apply,
}

impl MigrationMode {
    pub const fn is_apply(self) -> bool {
        matches!(self, MigrationMode::Apply)
    }
}

impl Default for MigrationMode {
    fn default() -> Self {
        MigrationMode::DryRun
    }
}

/// `""` and `"0"` are the strings PHP treats as empty.
fn php_empty(value: &str) -> bool {
    value.is_empty() || value == "0"
}

/// Operator-chosen destination for 1.x data: the instance to append to and
/// the field names title and caption are written under (`None` = omit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMapping {
    pub instance: String,
    pub title: Option<String>,
    pub caption: Option<String>,
}

impl LegacyMapping {
    /// Sanitizes raw form input. All three values must be present and the
    /// instance must not be empty; a blank title or caption drops that field.
    pub fn from_input(
        instance: Option<&str>,
        title: Option<&str>,
        caption: Option<&str>,
    ) -> Option<Self> {
        let (instance, title, caption) = (instance?, title?, caption?);
        if php_empty(instance) {
            return None;
        }
        let instance = field_slug(instance);
        if instance.is_empty() {
            return None;
        }
        let field = |name: &str| {
            if php_empty(name) {
                return None;
            }
            Some(field_slug(name)).filter(|slug| !php_empty(slug))
        };
        Some(LegacyMapping {
            instance,
            title: field(title),
            caption: field(caption),
        })
    }

    pub fn convert(&self, record: &LegacyRecord) -> Attachment {
        let mut converted = Attachment::new(record.id.as_str());
        if let Some(title) = &self.title {
            converted =
                converted.with_field(title.as_str(), htmlentities(&stripslashes(&record.title)));
        }
        if let Some(caption) = &self.caption {
            converted =
                converted.with_field(caption.as_str(), htmlentities(&stripslashes(&record.caption)));
        }
        converted
    }
}

/// Outcome of a 1.x pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub mode: MigrationMode,
    pub instance: String,
    /// Posts whose document was (or in a dry run would be) rewritten.
    pub posts: u64,
    pub records: u64,
    pub skipped_entries: u64,
    pub skipped_posts: u64,
}

/// Outcome of a Pro pass for one configured instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProMigrationTotal {
    pub mode: MigrationMode,
    pub instance: String,
    pub total: u64,
    pub posts: u64,
    pub skipped_posts: u64,
    /// Stored instances on the scanned posts that no configured position
    /// names; they are left for a later run with a matching position.
    pub unconfigured_instances: u64,
}

/// Reads the stored document, falling back to a fresh one when nothing
/// usable is stored.
fn stored_document(post_id: i64, raw: Option<&str>) -> AttachmentsDocument {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return AttachmentsDocument::new();
    };
    AttachmentsDocument::parse(raw).unwrap_or_else(|err| {
        warn!(
            target: "attachments_migrate",
            event = "document_replaced",
            post_id,
            error = %err
        );
        AttachmentsDocument::new()
    })
}

/// Appends to the target instance, or logs and returns `None` when the
/// stored value under that name is not a list.
fn append_records<I>(
    document: &mut AttachmentsDocument,
    post_id: i64,
    instance: &str,
    records: I,
) -> Option<usize>
where
    I: IntoIterator<Item = Attachment>,
{
    match document.append(instance, records) {
        Ok(appended) => Some(appended),
        Err(err) => {
            warn!(
                target: "attachments_migrate",
                event = "post_skipped",
                post_id,
                error = %err
            );
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Migrator {
    host: HostStore,
    meta_key: String,
}

impl Migrator {
    pub fn new(host: HostStore, meta_key: impl Into<String>) -> Self {
        Migrator {
            host,
            meta_key: meta_key.into(),
        }
    }

    pub fn host(&self) -> &HostStore {
        &self.host
    }

    pub fn meta_key(&self) -> &str {
        &self.meta_key
    }

    /// The 1.x settings option. An undecodable option reads as absent.
    pub async fn legacy_settings(&self) -> AppResult<Option<LegacySettings>> {
        let Some(raw) = self.host.get_option(LEGACY_SETTINGS_OPTION).await? else {
            return Ok(None);
        };
        Ok(LegacySettings::decode(&raw).unwrap_or_else(|err| {
            warn!(
                target: "attachments_migrate",
                event = "settings_unreadable",
                option = LEGACY_SETTINGS_OPTION,
                error = %err
            );
            None
        }))
    }

    /// The Pro settings option. An undecodable option reads as absent.
    pub async fn pro_settings(&self) -> AppResult<Option<ProSettings>> {
        let Some(raw) = self.host.get_option(PRO_SETTINGS_OPTION).await? else {
            return Ok(None);
        };
        Ok(ProSettings::decode(&raw).unwrap_or_else(|err| {
            warn!(
                target: "attachments_migrate",
                event = "settings_unreadable",
                option = PRO_SETTINGS_OPTION,
                error = %err
            );
            None
        }))
    }

    /// Instance names of every configured Pro position.
    async fn configured_pro_instances(&self) -> AppResult<Vec<String>> {
        Ok(self
            .pro_settings()
            .await?
            .map(|settings| settings.positions.into_iter().map(|p| p.name).collect())
            .unwrap_or_default())
    }

    /// Converts every post's 1.x entries into `instance` records.
    ///
    /// Returns `Ok(None)` when the mapping input is incomplete. Posts are
    /// limited to the post types enabled in the 1.x settings; without
    /// settings nothing matches.
    pub async fn migrate(
        &self,
        instance: Option<&str>,
        title: Option<&str>,
        caption: Option<&str>,
        mode: MigrationMode,
    ) -> AppResult<Option<MigrationReport>> {
        let Some(mapping) = LegacyMapping::from_input(instance, title, caption) else {
            info!(target: "attachments_migrate", event = "legacy_migration_rejected");
            return Ok(None);
        };

        let post_types = self
            .legacy_settings()
            .await?
            .map(|settings| settings.post_types)
            .unwrap_or_default();
        let posts = self
            .host
            .posts_with_meta_key(&post_types, LEGACY_META_KEY)
            .await?;
        info!(
            target: "attachments_migrate",
            event = "legacy_migration_start",
            instance = %mapping.instance,
            post_types = post_types.len(),
            candidates = posts.len(),
            mode = ?mode
        );

        let mut report = MigrationReport {
            mode,
            instance: mapping.instance.clone(),
            posts: 0,
            records: 0,
            skipped_entries: 0,
            skipped_posts: 0,
        };
        let tables = self.host.tables();

        for post_id in posts {
            let mut tx = self.host.pool().begin().await?;

            let entries = read_post_meta(&mut *tx, tables, post_id, LEGACY_META_KEY).await?;
            let mut records = Vec::with_capacity(entries.len());
            for (index, raw) in entries.iter().enumerate() {
                match LegacyRecord::decode(raw) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        report.skipped_entries += 1;
                        warn!(
                            target: "attachments_migrate",
                            event = "legacy_entry_skipped",
                            post_id,
                            index,
                            error = %err
                        );
                    }
                }
            }
            sort_legacy(&mut records);

            let stored = read_single_post_meta(&mut *tx, tables, post_id, &self.meta_key).await?;
            let mut document = stored_document(post_id, stored.as_deref());

            let appended = if records.is_empty() {
                0
            } else {
                let converted = records.iter().map(|record| mapping.convert(record));
                match append_records(&mut document, post_id, &mapping.instance, converted) {
                    Some(appended) => appended,
                    None => {
                        report.skipped_posts += 1;
                        continue;
                    }
                }
            };

            if mode.is_apply() {
                let json = document.to_json_string()?;
                write_post_meta(&mut *tx, tables, post_id, &self.meta_key, &json).await?;
            }
            tx.commit().await?;

            report.posts += 1;
            report.records += appended as u64;
            info!(
                target: "attachments_migrate",
                event = "post_migrated",
                post_id,
                records = appended,
                mode = ?mode
            );
        }

        info!(
            target: "attachments_migrate",
            event = "legacy_migration_done",
            instance = %report.instance,
            posts = report.posts,
            records = report.records,
            skipped_entries = report.skipped_entries,
            skipped_posts = report.skipped_posts,
            mode = ?mode
        );
        Ok(Some(report))
    }

    /// Converts the Pro records stored under `config.name` on every post,
    /// remapping field keys through the configured label table.
    ///
    /// Returns `Ok(None)` for an unnamed configuration.
    pub async fn migrate_pro(
        &self,
        config: &ProInstanceConfig,
        mode: MigrationMode,
    ) -> AppResult<Option<ProMigrationTotal>> {
        if config.is_empty() {
            info!(target: "attachments_migrate", event = "pro_migration_rejected");
            return Ok(None);
        }

        let mut post_types = self.host.post_types().await?;
        if post_types.is_empty() {
            post_types = FALLBACK_POST_TYPES.iter().map(|t| t.to_string()).collect();
        }
        let posts = self
            .host
            .posts_with_meta_key(&post_types, PRO_META_KEY)
            .await?;
        info!(
            target: "attachments_migrate",
            event = "pro_migration_start",
            instance = %config.name,
            candidates = posts.len(),
            mode = ?mode
        );

        let mut total = ProMigrationTotal {
            mode,
            instance: config.name.clone(),
            total: 0,
            posts: 0,
            skipped_posts: 0,
            unconfigured_instances: 0,
        };
        let tables = self.host.tables();
        let configured = self.configured_pro_instances().await?;

        for post_id in posts {
            let mut tx = self.host.pool().begin().await?;

            let raw = read_single_post_meta(&mut *tx, tables, post_id, PRO_META_KEY).await?;
            let payload = match raw.as_deref().map(ProPayload::decode) {
                Some(Ok(Some(payload))) => payload,
                Some(Err(err)) => {
                    total.skipped_posts += 1;
                    warn!(
                        target: "attachments_migrate",
                        event = "pro_payload_skipped",
                        post_id,
                        error = %err
                    );
                    continue;
                }
                _ => continue,
            };

            for (name, _) in &payload.instances {
                if *name != config.name && !configured.contains(name) {
                    total.unconfigured_instances += 1;
                    warn!(
                        target: "attachments_migrate",
                        event = "pro_instance_unconfigured",
                        post_id,
                        instance = %name
                    );
                }
            }

            let converted: Vec<Attachment> = payload
                .instances
                .iter()
                .filter(|(name, _)| *name == config.name)
                .flat_map(|(_, records)| records.iter().map(|record| record.convert(config)))
                .collect();
            if converted.is_empty() {
                continue;
            }

            let stored = read_single_post_meta(&mut *tx, tables, post_id, &self.meta_key).await?;
            let mut document = stored_document(post_id, stored.as_deref());
            let Some(appended) = append_records(&mut document, post_id, &config.name, converted)
            else {
                total.skipped_posts += 1;
                continue;
            };

            if mode.is_apply() {
                let json = document.to_json_string()?;
                write_post_meta(&mut *tx, tables, post_id, &self.meta_key, &json).await?;
            }
            tx.commit().await?;

            total.posts += 1;
            total.total += appended as u64;
            info!(
                target: "attachments_migrate",
                event = "post_migrated",
                post_id,
                instance = %config.name,
                records = appended,
                mode = ?mode
            );
        }

        info!(
            target: "attachments_migrate",
            event = "pro_migration_done",
            instance = %total.instance,
            total = total.total,
            posts = total.posts,
            skipped_posts = total.skipped_posts,
            unconfigured_instances = total.unconfigured_instances,
            mode = ?mode
        );
        Ok(Some(total))
    }
}
