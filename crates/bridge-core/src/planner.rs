//! Auction planning decisions.
//!
//! `evaluate` inspects one tender document against the current time and the
//! schedule index and returns the worker actions to dispatch, together with
//! structured events describing every skip. It performs no writes and keeps
//! no state between calls, so re-delivery of the same document under the same
//! index state always yields the same result.
//!
//! Rules are chosen by tender status:
//!
//! | status                 | lots    | outcome                                   |
//! |------------------------|---------|-------------------------------------------|
//! | `active.auction`       | absent  | `planning` for the tender                 |
//! | `active.auction`       | present | `planning` per active lot, halting early  |
//! | `active.qualification` | present | `announce` per active pre-announce lot    |
//! | `cancelled`            | any     | `cancel` per auction still in the future  |
//! | anything else          |         | nothing                                   |

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schedule::ScheduleIndex;
use crate::tender::{auction_id, Lot, LotStatus, Tender, TenderStatus};

// ---------------------------------------------------------------------------
// PlanningAction / Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningAction {
    Planning,
    Announce,
    Cancel,
}

impl PlanningAction {
    /// The worker sub-command for this action.
    pub fn as_str(self) -> &'static str {
        match self {
            PlanningAction::Planning => "planning",
            PlanningAction::Announce => "announce",
            PlanningAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for PlanningAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One worker action for one auction. `lot_id` is empty for a tender-level
/// auction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decision {
    pub action: PlanningAction,
    pub tender_id: String,
    pub lot_id: String,
}

impl Decision {
    pub fn new(
        action: PlanningAction,
        tender_id: impl Into<String>,
        lot_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            tender_id: tender_id.into(),
            lot_id: lot_id.into(),
        }
    }

    /// The id the auction is scheduled under.
    pub fn auction_id(&self) -> String {
        if self.lot_id.is_empty() {
            self.tender_id.clone()
        } else {
            auction_id(&self.tender_id, &self.lot_id)
        }
    }
}

// ---------------------------------------------------------------------------
// PlanningContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningMode {
    /// Duplicates are detected through the schedule index.
    Normal,
    /// Duplicates are detected through the known-id set.
    Replanning,
}

/// Everything `evaluate` reads besides the document and the index.
pub struct PlanningContext<'a> {
    pub now: DateTime<Utc>,
    pub timezone: Tz,
    pub mode: PlanningMode,
    /// Auction ids already planned during a re-planning pass.
    pub replanned_ids: &'a HashSet<String>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Why a planning candidate was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TenderStartInPast,
    TenderAlreadyPlanned,
    TenderAlreadyReplanned,
    LotStartInPast,
    LotAlreadyPlanned,
    LotAlreadyReplanned,
}

impl SkipReason {
    /// Stable event code, used as the `code` field in logs.
    pub fn code(self) -> &'static str {
        match self {
            SkipReason::TenderStartInPast => "planning_tender_skip",
            SkipReason::TenderAlreadyPlanned => "planning_tender_already_planned",
            SkipReason::TenderAlreadyReplanned => "replanning_tender_already_planned",
            SkipReason::LotStartInPast => "planning_lot_skip",
            SkipReason::LotAlreadyPlanned => "planning_lot_already_planned",
            SkipReason::LotAlreadyReplanned => "replanning_lot_already_planned",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            SkipReason::TenderStartInPast | SkipReason::LotStartInPast => "start date in past",
            SkipReason::TenderAlreadyPlanned | SkipReason::LotAlreadyPlanned => {
                "already planned on same date"
            }
            SkipReason::TenderAlreadyReplanned | SkipReason::LotAlreadyReplanned => {
                "already planned while replanning"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum PlanningEventKind {
    Skipped(SkipReason),
    AnnounceSelected,
    CancelSelected,
}

impl PlanningEventKind {
    pub fn code(self) -> &'static str {
        match self {
            PlanningEventKind::Skipped(reason) => reason.code(),
            PlanningEventKind::AnnounceSelected => "announce_selected",
            PlanningEventKind::CancelSelected => "cancel_selected",
        }
    }
}

/// A decision point worth reporting, emitted instead of free-text logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningEvent {
    pub kind: PlanningEventKind,
    pub tender_id: String,
    /// Tender id or composite lot auction id.
    pub auction_id: String,
    /// Auction start in the operating timezone, for planning skips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<FixedOffset>>,
}

/// The outcome of evaluating one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub decisions: Vec<Decision>,
    pub events: Vec<PlanningEvent>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Decide which worker actions `tender` calls for.
///
/// Missing or incomplete fields make a document ineligible, never an error.
/// The only failure is a read error from `index`.
pub fn evaluate<I>(tender: &Tender, ctx: &PlanningContext<'_>, index: &I) -> Result<Evaluation>
where
    I: ScheduleIndex + ?Sized,
{
    let mut out = Evaluation::default();
    match &tender.status {
        TenderStatus::ActiveAuction => plan(tender, ctx, index, &mut out)?,
        TenderStatus::ActiveQualification => announce(tender, index, &mut out)?,
        TenderStatus::Cancelled => cancel(tender, ctx, index, &mut out)?,
        TenderStatus::Other(_) => {}
    }
    Ok(out)
}

#[derive(Clone, Copy)]
enum Scope {
    Tender,
    Lot,
}

impl Scope {
    fn start_in_past(self) -> SkipReason {
        match self {
            Scope::Tender => SkipReason::TenderStartInPast,
            Scope::Lot => SkipReason::LotStartInPast,
        }
    }

    fn already_planned(self) -> SkipReason {
        match self {
            Scope::Tender => SkipReason::TenderAlreadyPlanned,
            Scope::Lot => SkipReason::LotAlreadyPlanned,
        }
    }

    fn already_replanned(self) -> SkipReason {
        match self {
            Scope::Tender => SkipReason::TenderAlreadyReplanned,
            Scope::Lot => SkipReason::LotAlreadyReplanned,
        }
    }
}

/// Check whether an auction starting at `start` may be planned.
fn check_slot<I>(
    id: &str,
    start: DateTime<FixedOffset>,
    scope: Scope,
    ctx: &PlanningContext<'_>,
    index: &I,
) -> Result<Option<SkipReason>>
where
    I: ScheduleIndex + ?Sized,
{
    let start = start.with_timezone(&Utc);
    if ctx.now > start {
        return Ok(Some(scope.start_in_past()));
    }
    match ctx.mode {
        PlanningMode::Replanning => {
            if ctx.replanned_ids.contains(id) {
                return Ok(Some(scope.already_replanned()));
            }
        }
        PlanningMode::Normal => {
            if index.planned_at(start)?.iter().any(|r| r.id == id) {
                return Ok(Some(scope.already_planned()));
            }
        }
    }
    Ok(None)
}

fn skipped(
    reason: SkipReason,
    tender_id: &str,
    id: &str,
    start: DateTime<FixedOffset>,
    ctx: &PlanningContext<'_>,
) -> PlanningEvent {
    PlanningEvent {
        kind: PlanningEventKind::Skipped(reason),
        tender_id: tender_id.to_string(),
        auction_id: id.to_string(),
        start_date: Some(start.with_timezone(&ctx.timezone).fixed_offset()),
    }
}

fn plan<I>(
    tender: &Tender,
    ctx: &PlanningContext<'_>,
    index: &I,
    out: &mut Evaluation,
) -> Result<()>
where
    I: ScheduleIndex + ?Sized,
{
    let Some(lots) = &tender.lots else {
        let Some(start) = tender.pending_start() else {
            return Ok(());
        };
        match check_slot(&tender.id, start, Scope::Tender, ctx, index)? {
            Some(reason) => out
                .events
                .push(skipped(reason, &tender.id, &tender.id, start, ctx)),
            None => out.decisions.push(Decision::new(
                PlanningAction::Planning,
                tender.id.as_str(),
                "",
            )),
        }
        return Ok(());
    };

    for lot in lots.iter().filter(|l| l.status == LotStatus::Active) {
        let Some(start) = lot.pending_start() else {
            continue;
        };
        let id = auction_id(&tender.id, &lot.id);
        if let Some(reason) = check_slot(&id, start, Scope::Lot, ctx, index)? {
            // A skipped lot ends evaluation of the whole document; later lots
            // are not considered until the document is delivered again.
            out.events.push(skipped(reason, &tender.id, &id, start, ctx));
            return Ok(());
        }
        out.decisions.push(Decision::new(
            PlanningAction::Planning,
            tender.id.as_str(),
            lot.id.as_str(),
        ));
    }
    Ok(())
}

fn announce<I>(tender: &Tender, index: &I, out: &mut Evaluation) -> Result<()>
where
    I: ScheduleIndex + ?Sized,
{
    let Some(lots) = &tender.lots else {
        return Ok(());
    };
    let active: Vec<&Lot> = lots
        .iter()
        .filter(|l| l.status == LotStatus::Active)
        .collect();
    if active.is_empty() {
        return Ok(());
    }

    let pre_announce: HashSet<String> = index.pre_announce()?.into_iter().map(|r| r.id).collect();
    for lot in active {
        let id = auction_id(&tender.id, &lot.id);
        if pre_announce.contains(&id) {
            out.events.push(selected(
                PlanningEventKind::AnnounceSelected,
                &tender.id,
                id,
            ));
            out.decisions.push(Decision::new(
                PlanningAction::Announce,
                tender.id.as_str(),
                lot.id.as_str(),
            ));
        }
    }
    Ok(())
}

fn cancel<I>(
    tender: &Tender,
    ctx: &PlanningContext<'_>,
    index: &I,
    out: &mut Evaluation,
) -> Result<()>
where
    I: ScheduleIndex + ?Sized,
{
    let future: HashSet<String> = index
        .ending_from(ctx.now)?
        .into_iter()
        .map(|r| r.id)
        .collect();

    match &tender.lots {
        Some(lots) => {
            for lot in lots {
                let id = auction_id(&tender.id, &lot.id);
                if future.contains(&id) {
                    out.events.push(selected(
                        PlanningEventKind::CancelSelected,
                        &tender.id,
                        id,
                    ));
                    out.decisions.push(Decision::new(
                        PlanningAction::Cancel,
                        tender.id.as_str(),
                        lot.id.as_str(),
                    ));
                }
            }
        }
        None => {
            if future.contains(&tender.id) {
                out.events.push(selected(
                    PlanningEventKind::CancelSelected,
                    &tender.id,
                    tender.id.clone(),
                ));
                out.decisions.push(Decision::new(
                    PlanningAction::Cancel,
                    tender.id.as_str(),
                    "",
                ));
            }
        }
    }
    Ok(())
}

fn selected(kind: PlanningEventKind, tender_id: &str, auction_id: String) -> PlanningEvent {
    PlanningEvent {
        kind,
        tender_id: tender_id.to_string(),
        auction_id,
        start_date: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
