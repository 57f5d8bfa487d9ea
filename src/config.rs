use std::path::PathBuf;

use crate::nonce::NonceSigner;
use crate::{AppError, AppResult};

pub const DB_ENV: &str = "ATTACHMENTS_MIGRATE_DB";
pub const TABLE_PREFIX_ENV: &str = "ATTACHMENTS_MIGRATE_TABLE_PREFIX";
pub const META_KEY_ENV: &str = "ATTACHMENTS_MIGRATE_META_KEY";
pub const SECRET_ENV: &str = "ATTACHMENTS_MIGRATE_SECRET";
pub const LOG_ENV: &str = "ATTACHMENTS_MIGRATE_LOG";
pub const LOG_DIR_ENV: &str = "ATTACHMENTS_MIGRATE_LOG_DIR";

pub const DEFAULT_TABLE_PREFIX: &str = "wp_";
/// Meta key the current plugin reads its per-post document from.
pub const DEFAULT_META_KEY: &str = "attachments";
/// Tokens stay valid for up to this long (two half-lifetime ticks).
pub const DEFAULT_NONCE_LIFETIME_SECS: i64 = 86_400;

const APP_DIR: &str = "attachments-migrate";
const DB_FILE: &str = "host.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub db_path: PathBuf,
    pub table_prefix: String,
    pub meta_key: String,
    pub nonce_secret: Option<String>,
    pub nonce_lifetime_secs: i64,
}

impl MigrateConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source; blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_path = match var(DB_ENV) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };
        let config = MigrateConfig {
            db_path,
            table_prefix: var(TABLE_PREFIX_ENV).unwrap_or_else(|| DEFAULT_TABLE_PREFIX.into()),
            meta_key: var(META_KEY_ENV).unwrap_or_else(|| DEFAULT_META_KEY.into()),
            nonce_secret: var(SECRET_ENV),
            nonce_lifetime_secs: DEFAULT_NONCE_LIFETIME_SECS,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let prefix_ok = self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            return Err(AppError::new(
                "CONFIG/TABLE_PREFIX",
                "Table prefix may only contain letters, digits and underscores",
            )
            .with_context("table_prefix", self.table_prefix.clone()));
        }
        if self.meta_key.trim().is_empty() {
            return Err(AppError::new("CONFIG/META_KEY", "Meta key must not be empty"));
        }
        if self.nonce_lifetime_secs < 2 {
            return Err(AppError::new(
                "CONFIG/NONCE_LIFETIME",
                "Nonce lifetime must be at least two seconds",
            ));
        }
        Ok(())
    }

    /// Signer for admin request tokens; `None` when no secret is configured.
    pub fn nonce_signer(&self) -> AppResult<Option<NonceSigner>> {
        self.nonce_secret
            .as_deref()
            .map(|secret| NonceSigner::new(secret, self.nonce_lifetime_secs))
            .transpose()
    }
}

fn default_db_path() -> AppResult<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(base.join(APP_DIR).join(DB_FILE))
}
