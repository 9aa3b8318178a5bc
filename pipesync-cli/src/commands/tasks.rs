//! `pipesync tasks`: missing and extra tasks per mapping.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use pipesync_core::config::DEFAULT_CONFIG_FILE;
use pipesync_engine::tasks;

use crate::session::Session;

/// Arguments for `pipesync tasks`.
#[derive(Args, Debug)]
pub struct TasksArgs {
    /// Path to the sync configuration.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct TaskRow {
    mapping: String,
    local: String,
    missing: Vec<String>,
    extra: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct TaskTableRow {
    #[tabled(rename = "mapping")]
    mapping: String,
    #[tabled(rename = "missing upstream tasks")]
    missing: String,
    #[tabled(rename = "local-only tasks")]
    extra: String,
}

impl TasksArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open(&self.config, None)?;
        let rows: Vec<TaskRow> = session
            .load()
            .into_iter()
            .map(|loaded| {
                let mut row = TaskRow {
                    mapping: loaded.mapping.display_name(),
                    local: loaded.mapping.local.display().to_string(),
                    missing: Vec::new(),
                    extra: Vec::new(),
                    error: None,
                };
                let result = loaded.input.and_then(|input| {
                    tasks::reconcile(&input.local, &input.upstream).map_err(anyhow::Error::from)
                });
                match result {
                    Ok(found) => {
                        row.missing = found.missing_names().into_iter().map(str::to_string).collect();
                        row.extra = found.extra;
                    }
                    Err(err) => row.error = Some(format!("{err:#}")),
                }
                row
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize tasks JSON")?
            );
            return Ok(());
        }

        print_table(&rows);
        Ok(())
    }
}

fn print_table(rows: &[TaskRow]) {
    let list = |names: &[String]| {
        if names.is_empty() {
            "-".to_string()
        } else {
            names.join(", ")
        }
    };
    let table_rows: Vec<TaskTableRow> = rows
        .iter()
        .map(|row| TaskTableRow {
            mapping: row.mapping.clone(),
            missing: match &row.error {
                Some(err) => format!("error: {err}"),
                None => list(&row.missing),
            },
            extra: list(&row.extra),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    let missing: usize = rows.iter().map(|r| r.missing.len()).sum();
    if missing > 0 {
        println!(
            "{}",
            format!("{missing} missing task(s); run 'pipesync sync --auto-patch' to patch them in.")
                .yellow()
        );
    }
}
