use crate::output::{print_json, print_table};
use anyhow::Context;
use bridge_core::bridge::{BatchSummary, Bridge};
use bridge_core::config::{has_errors, BridgeConfig, WarnLevel};
use bridge_core::dispatch::{CommandLauncher, Dispatcher};
use bridge_core::feed::{ApiFeed, Feed, FileFeed};
use bridge_core::schedule::ScheduleDb;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long an interrupted bridge may take to finish the worker it is waiting on.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

type CliBridge = Bridge<Box<dyn Feed>, ScheduleDb, CommandLauncher>;

pub fn run(
    config_path: Option<&Path>,
    once: bool,
    from_file: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("config: {}", w.message),
            WarnLevel::Error => tracing::error!("config: {}", w.message),
        }
    }
    if has_errors(&warnings) {
        anyhow::bail!("config validation found errors; run `auction-bridge config validate`");
    }

    if once {
        let mut bridge = build_bridge(&config, from_file)?;
        let summary = bridge.run_once(Utc::now())?;
        return print_summary(&summary, json);
    }
    run_until_interrupted(config, from_file)
}

fn build_bridge(config: &BridgeConfig, from_file: Option<PathBuf>) -> anyhow::Result<CliBridge> {
    let timezone = config.timezone()?;
    let index = ScheduleDb::open(&config.schedule_db)
        .with_context(|| format!("failed to open {}", config.schedule_db.display()))?;
    let feed: Box<dyn Feed> = match from_file {
        Some(path) => Box::new(FileFeed::new(path)),
        None => Box::new(ApiFeed::new(&config.feed).context("failed to set up tenders feed")?),
    };
    let dispatcher = Dispatcher::new(
        config.worker_settings(),
        CommandLauncher,
        config.retry.clone(),
    );
    Ok(Bridge::new(
        feed,
        index,
        dispatcher,
        timezone,
        config.planning_mode(),
        config.replanning_ids(),
    ))
}

/// Run the bridge on a blocking thread until Ctrl-C.
///
/// On interrupt the bridge finishes the worker it is waiting on (up to
/// `SHUTDOWN_GRACE`) and stops before the next batch.
fn run_until_interrupted(config: BridgeConfig, from_file: Option<PathBuf>) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let poll_interval = config.poll_interval();

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        let mut bridge_task = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut bridge = build_bridge(&config, from_file)?;
            bridge.run(&flag, poll_interval)?;
            Ok(())
        });

        tokio::select! {
            res = &mut bridge_task => return res.context("bridge task failed").and_then(|r| r),
            _ = tokio::signal::ctrl_c() => {}
        }

        tracing::info!("interrupt received, stopping after the current batch");
        shutdown.store(true, Ordering::Relaxed);
        match tokio::time::timeout(SHUTDOWN_GRACE, bridge_task).await {
            Ok(res) => res.context("bridge task failed").and_then(|r| r),
            Err(_) => {
                tracing::warn!("worker still running after grace period, exiting");
                Ok(())
            }
        }
    });
    // A worker stuck in its retry loop must not keep the process alive.
    rt.shutdown_background();
    result
}

fn print_summary(summary: &BatchSummary, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(summary);
    }
    println!(
        "Processed {} document(s): {} action(s) dispatched, {} skipped.",
        summary.documents,
        summary.dispatched.len(),
        summary.skipped
    );
    if !summary.dispatched.is_empty() {
        let rows: Vec<Vec<String>> = summary
            .dispatched
            .iter()
            .map(|d| vec![d.action.to_string(), d.tender_id.clone(), d.lot_id.clone()])
            .collect();
        print_table(&["ACTION", "TENDER", "LOT"], &rows);
    }
    Ok(())
}
