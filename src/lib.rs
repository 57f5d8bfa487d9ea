//! Migrates Attachments 1.x and Attachments Pro post metadata into the JSON
//! instance document the current plugin reads.

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod handlers;
pub mod host;
pub mod html;
pub mod legacy;
pub mod logging;
pub mod migrator;
pub mod nonce;
pub mod php;
pub mod report;
pub mod schema;
pub mod text;

pub use config::MigrateConfig;
pub use document::{Attachment, AttachmentsDocument};
pub use error::{AppError, AppResult};
pub use host::{HostStore, Tables};
pub use migrator::{LegacyMapping, MigrationMode, MigrationReport, Migrator, ProMigrationTotal};
