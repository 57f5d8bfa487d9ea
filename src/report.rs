use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use crate::migrator::{MigrationMode, MigrationReport, ProMigrationTotal};

/// What a single CLI run did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Legacy { report: MigrationReport },
    Pro { instances: Vec<ProMigrationTotal>, total: u64 },
    AlreadyRun { flag: String },
    NothingToMigrate,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReportFile<'a> {
    generated_at: String,
    git_hash: &'static str,
    db_path: String,
    mode: MigrationMode,
    outcome: &'a RunOutcome,
}

pub fn write_run_report(
    reports_dir: &Path,
    db_path: &Path,
    mode: MigrationMode,
    outcome: &RunOutcome,
) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let stem = now.format("migrate-%Y%m%d-%H%M%S-%3f").to_string();
    let payload = RunReportFile {
        generated_at: now.to_rfc3339(),
        git_hash: env!("ATTACHMENTS_MIGRATE_GIT_HASH"),
        db_path: db_path.display().to_string(),
        mode,
        outcome,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize run report")?;

    // Never overwrite: runs in the same millisecond get a numeric suffix.
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{stem}.json"),
            n => format!("{stem}-{n}.json"),
        };
        let path = reports_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(json.as_bytes())
                    .with_context(|| format!("write run report {}", path.display()))?;
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => {
                return Err(err).with_context(|| format!("create run report {}", path.display()))
            }
        }
    }
}
