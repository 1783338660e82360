use crate::output::{print_json, print_table};
use anyhow::Context;
use bridge_core::schedule::{ScheduleDb, ScheduleRecord};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum RecordsSubcommand {
    /// List every scheduled auction
    List,

    /// Insert or replace records from a JSON array
    Import {
        /// JSON file holding an array of schedule records
        file: PathBuf,
    },

    /// Remove a record by auction id
    Remove { id: String },
}

pub fn run(path: Option<&Path>, subcmd: RecordsSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    let db = ScheduleDb::open(&config.schedule_db)
        .with_context(|| format!("failed to open {}", config.schedule_db.display()))?;

    match subcmd {
        RecordsSubcommand::List => list(&db, json),
        RecordsSubcommand::Import { file } => import(&db, &file, json),
        RecordsSubcommand::Remove { id } => remove(&db, &id, json),
    }
}

fn list(db: &ScheduleDb, json: bool) -> anyhow::Result<()> {
    let records = db.list_all()?;
    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No scheduled auctions.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                fmt_time(r.start_time),
                fmt_time(r.end_time()),
                format!("{}/{}", r.current_stage, r.stage_count),
            ]
        })
        .collect();
    print_table(&["ID", "START", "END", "STAGE"], &rows);
    Ok(())
}

fn import(db: &ScheduleDb, file: &Path, json: bool) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let records: Vec<ScheduleRecord> =
        serde_json::from_str(&data).context("expected a JSON array of schedule records")?;
    for record in &records {
        db.upsert(record)
            .with_context(|| format!("failed to store record '{}'", record.id))?;
    }

    if json {
        print_json(&serde_json::json!({ "imported": records.len() }))?;
    } else {
        println!("Imported {} record(s).", records.len());
    }
    Ok(())
}

fn remove(db: &ScheduleDb, id: &str, json: bool) -> anyhow::Result<()> {
    let removed = db.remove(id)?;
    if json {
        print_json(&serde_json::json!({ "id": id, "removed": removed }))?;
    } else if removed {
        println!("Removed '{id}'.");
    } else {
        anyhow::bail!("no record with id '{id}'");
    }
    Ok(())
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
