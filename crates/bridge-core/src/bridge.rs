//! The feed → planner → dispatcher loop.
//!
//! Documents are evaluated one at a time and every decision is dispatched
//! before the next document is looked at. Nothing else plans concurrently,
//! so reading the schedule index is enough to avoid double scheduling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::dispatch::{Dispatcher, Launcher};
use crate::error::Result;
use crate::feed::Feed;
use crate::planner::{
    evaluate, Decision, PlanningAction, PlanningContext, PlanningEvent, PlanningEventKind,
    PlanningMode,
};
use crate::schedule::ScheduleIndex;

/// Granularity at which an idle bridge re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub documents: usize,
    pub dispatched: Vec<Decision>,
    pub skipped: usize,
}

pub struct Bridge<F, I, L> {
    feed: F,
    index: I,
    dispatcher: Dispatcher<L>,
    timezone: Tz,
    mode: PlanningMode,
    replanned_ids: HashSet<String>,
}

impl<F, I, L> Bridge<F, I, L>
where
    F: Feed,
    I: ScheduleIndex,
    L: Launcher,
{
    pub fn new(
        feed: F,
        index: I,
        dispatcher: Dispatcher<L>,
        timezone: Tz,
        mode: PlanningMode,
        replanned_ids: HashSet<String>,
    ) -> Self {
        Self {
            feed,
            index,
            dispatcher,
            timezone,
            mode,
            replanned_ids,
        }
    }

    /// Auction ids known to be planned in the current re-planning pass.
    pub fn replanned_ids(&self) -> &HashSet<String> {
        &self.replanned_ids
    }

    /// Poll one batch, evaluate every document, and dispatch the decisions.
    pub fn run_once(&mut self, now: DateTime<Utc>) -> Result<BatchSummary> {
        let batch = self.feed.poll()?;
        let mut summary = BatchSummary {
            documents: batch.len(),
            ..BatchSummary::default()
        };

        for tender in &batch {
            let evaluation = {
                let ctx = PlanningContext {
                    now,
                    timezone: self.timezone,
                    mode: self.mode,
                    replanned_ids: &self.replanned_ids,
                };
                evaluate(tender, &ctx, &self.index)?
            };

            for event in &evaluation.events {
                log_event(event);
                if matches!(event.kind, PlanningEventKind::Skipped(_)) {
                    summary.skipped += 1;
                }
            }

            for decision in evaluation.decisions {
                self.dispatcher
                    .dispatch(&decision, tender.procurement_method_type.as_deref());
                if self.mode == PlanningMode::Replanning
                    && decision.action == PlanningAction::Planning
                {
                    self.replanned_ids.insert(decision.auction_id());
                }
                summary.dispatched.push(decision);
            }
        }

        if summary.documents > 0 {
            tracing::info!(
                documents = summary.documents,
                dispatched = summary.dispatched.len(),
                skipped = summary.skipped,
                "batch processed"
            );
        }
        Ok(summary)
    }

    /// Process batches until `shutdown` is set, pausing `poll_interval`
    /// whenever the feed has nothing new or cannot be reached.
    ///
    /// Malformed documents and schedule db failures stop the bridge.
    pub fn run(&mut self, shutdown: &AtomicBool, poll_interval: Duration) -> Result<()> {
        tracing::info!(mode = ?self.mode, timezone = %self.timezone, "bridge started");
        while !shutdown.load(Ordering::Relaxed) {
            match self.run_once(Utc::now()) {
                Ok(summary) if summary.documents == 0 => idle(shutdown, poll_interval),
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "tenders feed unavailable, polling again later");
                    idle(shutdown, poll_interval);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!("bridge stopped");
        Ok(())
    }
}

fn idle(shutdown: &AtomicBool, period: Duration) {
    let deadline = Instant::now() + period;
    while !shutdown.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            break;
        }
        std::thread::sleep(left.min(SHUTDOWN_POLL));
    }
}

fn log_event(event: &PlanningEvent) {
    let start_date = event.start_date.map(|d| d.to_rfc3339());
    match event.kind {
        PlanningEventKind::Skipped(reason) => tracing::info!(
            code = reason.code(),
            tender_id = %event.tender_id,
            auction_id = %event.auction_id,
            start_date = start_date.as_deref().unwrap_or(""),
            "skip planning: {}",
            reason.message()
        ),
        PlanningEventKind::AnnounceSelected | PlanningEventKind::CancelSelected => {
            tracing::info!(
                code = event.kind.code(),
                tender_id = %event.tender_id,
                auction_id = %event.auction_id,
                "auction selected"
            )
        }
    }
}
