//! The two-step admin flows: a "prepare" request renders a form carrying a
//! fresh nonce, the "init" request verifies it and runs the migration.
//!
//! Every handler rejects a request whose nonce does not verify for its
//! action with `REQUEST/INVALID`.

use tracing::{info, warn};

use crate::config::{MigrateConfig, SECRET_ENV};
use crate::html::{esc_attr, esc_html};
use crate::migrator::{MigrationMode, Migrator};
use crate::nonce::NonceSigner;
use crate::{AppError, AppResult};

pub const PREPARE_ACTION: &str = "attachments-migrate-1";
pub const MIGRATE_ACTION: &str = "attachments-migrate-2";
pub const PRO_PREPARE_ACTION: &str = "attachments-pro-migrate-1";
pub const PRO_MIGRATE_ACTION: &str = "attachments-pro-migrate-2";

pub const MIGRATED_FLAG: &str = "attachments_migrated";
pub const PRO_MIGRATED_FLAG: &str = "attachments_pro_migrated";

pub const NONCE_PARAM: &str = "nonce";
pub const INSTANCE_PARAM: &str = "attachments-instance";
pub const TITLE_PARAM: &str = "attachments-title";
pub const CAPTION_PARAM: &str = "attachments-caption";

/// Query parameters of an admin request, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminRequest {
    params: Vec<(String, String)>,
}

impl AdminRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        AdminRequest {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// First value sent for `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn render_complete(total: u64) -> String {
    format!(
        "<h3>Migration Complete!</h3>\n\
         <p>The migration has completed. <strong>Migrated: {total}</strong>.</p>\n"
    )
}

fn render_already_run() -> String {
    "<h3>Migration has already Run!</h3>\n\
     <p>The migration has already been run. The migration process has not been repeated.</p>\n"
        .to_string()
}

fn render_nothing_to_migrate() -> String {
    "<h3>Nothing to migrate</h3>\n\
     <p>The migration did not run. Check the instance name and try again.</p>\n"
        .to_string()
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{}\" value=\"{}\" />\n",
        esc_attr(name),
        esc_attr(value)
    )
}

fn text_row(name: &str, label: &str, value: &str, description: &str) -> String {
    format!(
        "<tr valign=\"top\">\n\
         <th scope=\"row\"><label for=\"{name}\">{label}</label></th>\n\
         <td><input name=\"{name}\" id=\"{name}\" value=\"{value}\" class=\"regular-text\" />\n\
         <p class=\"description\">{description}</p></td>\n\
         </tr>\n",
        name = esc_attr(name),
        label = esc_html(label),
        value = esc_attr(value),
    )
}

const SUBMIT: &str = "<p class=\"submit\"><input type=\"submit\" name=\"submit\" id=\"submit\" \
                      class=\"button button-primary\" value=\"Start Migration\" /></p>\n";

#[derive(Debug, Clone)]
pub struct AdminHandlers {
    migrator: Migrator,
    signer: NonceSigner,
}

impl AdminHandlers {
    pub fn new(migrator: Migrator, signer: NonceSigner) -> Self {
        AdminHandlers { migrator, signer }
    }

    /// Builds the handlers with the configured token secret, which is
    /// required here.
    pub fn from_config(migrator: Migrator, config: &MigrateConfig) -> AppResult<Self> {
        let signer = config.nonce_signer()?.ok_or_else(|| {
            AppError::new("CONFIG/SECRET", "A nonce secret is required for admin requests")
                .with_context("env", SECRET_ENV)
        })?;
        Ok(Self::new(migrator, signer))
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn signer(&self) -> &NonceSigner {
        &self.signer
    }

    fn verify(&self, req: &AdminRequest, action: &str) -> AppResult<()> {
        let token = req.param(NONCE_PARAM).unwrap_or_default();
        if self.signer.verify(token, action).is_some() {
            return Ok(());
        }
        warn!(target: "attachments_migrate", event = "nonce_rejected", action);
        Err(AppError::invalid_request().with_context("action", action))
    }

    /// Step 1 for 1.x data: the instance/title/caption mapping form.
    pub fn prepare_migration(&self, req: &AdminRequest) -> AppResult<String> {
        self.verify(req, PREPARE_ACTION)?;

        let mut html = String::from(
            "<h3>Migration Step 1</h3>\n\
             <p>In order to migrate Attachments 1.x data, you need to set which instance and \
             fields in version 3.0+ you'd like to use:</p>\n\
             <form action=\"options-general.php\" method=\"get\">\n",
        );
        html.push_str(&hidden("page", "attachments"));
        html.push_str(&hidden("migrate", "2"));
        html.push_str(&hidden(NONCE_PARAM, &self.signer.create(MIGRATE_ACTION)));
        html.push_str("<table class=\"form-table\"><tbody>\n");
        html.push_str(&text_row(
            INSTANCE_PARAM,
            "Attachments 3.x Instance",
            "attachments",
            "The instance name you would like to use in the migration. Required.",
        ));
        html.push_str(&text_row(
            TITLE_PARAM,
            "Attachments 3.x Title",
            "title",
            "The <code>Title</code> field data will be migrated to this field name in \
             Attachments 3.x. Leave empty to disregard.",
        ));
        html.push_str(&text_row(
            CAPTION_PARAM,
            "Attachments 3.x Caption",
            "caption",
            "The <code>Caption</code> field data will be migrated to this field name in \
             Attachments 3.x. Leave empty to disregard.",
        ));
        html.push_str("</tbody></table>\n");
        html.push_str(SUBMIT);
        html.push_str("</form>\n");
        Ok(html)
    }

    /// Step 2 for 1.x data: runs the migration once and records the flag.
    pub async fn init_migration(&self, req: &AdminRequest) -> AppResult<String> {
        self.verify(req, MIGRATE_ACTION)?;

        let host = self.migrator.host();
        if host.option_flag(MIGRATED_FLAG).await? {
            info!(target: "attachments_migrate", event = "migration_already_run", flag = MIGRATED_FLAG);
            return Ok(render_already_run());
        }

        let report = self
            .migrator
            .migrate(
                req.param(INSTANCE_PARAM),
                req.param(TITLE_PARAM),
                req.param(CAPTION_PARAM),
                MigrationMode::Apply,
            )
            .await?;
        let Some(report) = report else {
            return Ok(render_nothing_to_migrate());
        };

        host.set_option_flag(MIGRATED_FLAG).await?;
        Ok(render_complete(report.posts))
    }

    /// Step 1 for Pro data: lists the configured Pro instances.
    pub async fn prepare_pro_migration(&self, req: &AdminRequest) -> AppResult<String> {
        self.verify(req, PRO_PREPARE_ACTION)?;

        let mut html = String::from(
            "<h3>Migration Step 1</h3>\n<form action=\"options-general.php\" method=\"get\">\n",
        );
        html.push_str(&hidden("page", "attachments"));
        html.push_str(&hidden("migrate-pro", "2"));
        html.push_str(&hidden(NONCE_PARAM, &self.signer.create(PRO_MIGRATE_ACTION)));

        if let Some(settings) = self.migrator.pro_settings().await? {
            html.push_str(
                "<p>The following Attachments Pro Instances will be migrated:</p>\n\
                 <ul style=\"padding-left:32px;list-style:disc;\">\n",
            );
            for position in &settings.positions {
                html.push_str(&format!("<li>{}</li>\n", esc_html(&position.label)));
            }
            html.push_str(
                "</ul>\n<p>Each Pro Instance will be migrated to an equivalent Attachments \
                 Instance.</p>\n",
            );
        }

        html.push_str(SUBMIT);
        html.push_str("</form>\n");
        Ok(html)
    }

    /// Step 2 for Pro data: migrates every configured instance and sums
    /// the converted records.
    pub async fn init_pro_migration(&self, req: &AdminRequest) -> AppResult<String> {
        self.verify(req, PRO_MIGRATE_ACTION)?;

        let host = self.migrator.host();
        if host.option_flag(PRO_MIGRATED_FLAG).await? {
            info!(target: "attachments_migrate", event = "migration_already_run", flag = PRO_MIGRATED_FLAG);
            return Ok(render_already_run());
        }

        let Some(settings) = self.migrator.pro_settings().await? else {
            return Ok(render_nothing_to_migrate());
        };

        let mut total = 0;
        for position in &settings.positions {
            if let Some(instance_total) = self
                .migrator
                .migrate_pro(position, MigrationMode::Apply)
                .await?
            {
                total += instance_total.total;
            }
        }

        host.set_option_flag(PRO_MIGRATED_FLAG).await?;
        Ok(render_complete(total))
    }
}
