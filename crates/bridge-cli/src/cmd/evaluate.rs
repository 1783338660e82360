use crate::output::{print_json, print_table};
use anyhow::Context;
use bridge_core::config::{parse_timezone, DEFAULT_TIMEZONE};
use bridge_core::feed::parse_tenders;
use bridge_core::planner::{
    evaluate, Decision, Evaluation, PlanningAction, PlanningContext, PlanningEventKind,
    PlanningMode,
};
use bridge_core::schedule::{MemoryIndex, ScheduleDb, ScheduleIndex, ScheduleRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Serialize)]
struct DocumentResult {
    tender_id: String,
    #[serde(flatten)]
    evaluation: Evaluation,
}

/// Evaluate every tender in `file` without dispatching anything.
///
/// The schedule index is the `--records` file when given, else the
/// configured schedule db, else empty.
pub fn run(
    config_path: Option<&Path>,
    file: &Path,
    now: Option<&str>,
    replanning: bool,
    records: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let config = match config_path {
        Some(_) => Some(super::load_config(config_path)?),
        None => None,
    };

    let now = match now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now '{s}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let timezone = match &config {
        Some(c) => c.timezone()?,
        None => parse_timezone(DEFAULT_TIMEZONE)?,
    };
    let mode = if replanning || config.as_ref().is_some_and(|c| c.replanning) {
        PlanningMode::Replanning
    } else {
        PlanningMode::Normal
    };
    let mut replanned_ids: HashSet<String> = config
        .as_ref()
        .map(|c| c.replanning_ids())
        .unwrap_or_default();

    let index: Box<dyn ScheduleIndex> = match (records, &config) {
        (Some(path), _) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let records: Vec<ScheduleRecord> = serde_json::from_str(&data)
                .context("expected a JSON array of schedule records")?;
            Box::new(MemoryIndex::new(records))
        }
        (None, Some(c)) => Box::new(
            ScheduleDb::open(&c.schedule_db)
                .with_context(|| format!("failed to open {}", c.schedule_db.display()))?,
        ),
        (None, None) => Box::new(MemoryIndex::default()),
    };

    let data = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let tenders = parse_tenders(&data).context("invalid tender document")?;

    let mut results = Vec::with_capacity(tenders.len());
    for tender in &tenders {
        let ctx = PlanningContext {
            now,
            timezone,
            mode,
            replanned_ids: &replanned_ids,
        };
        let evaluation = evaluate(tender, &ctx, index.as_ref())?;
        // Mirror the bridge: later documents see auctions planned by earlier ones.
        if mode == PlanningMode::Replanning {
            for d in &evaluation.decisions {
                if d.action == PlanningAction::Planning {
                    replanned_ids.insert(d.auction_id());
                }
            }
        }
        results.push(DocumentResult {
            tender_id: tender.id.clone(),
            evaluation,
        });
    }

    if json {
        return print_json(&results);
    }
    print_text(&results);
    Ok(())
}

fn print_text(results: &[DocumentResult]) {
    for result in results {
        for event in &result.evaluation.events {
            let start = event
                .start_date
                .map(|d| d.to_rfc3339())
                .unwrap_or_default();
            match event.kind {
                PlanningEventKind::Skipped(reason) => println!(
                    "skip    {}  {}  {}",
                    reason.code(),
                    event.auction_id,
                    start
                ),
                kind => println!("select  {}  {}", kind.code(), event.auction_id),
            }
        }
    }

    let decisions: Vec<&Decision> = results
        .iter()
        .flat_map(|r| r.evaluation.decisions.iter())
        .collect();
    if decisions.is_empty() {
        println!("No actions.");
        return;
    }
    let rows: Vec<Vec<String>> = decisions
        .iter()
        .map(|d| {
            vec![
                d.action.to_string(),
                d.tender_id.clone(),
                d.lot_id.clone(),
            ]
        })
        .collect();
    print_table(&["ACTION", "TENDER", "LOT"], &rows);
}
