//! Tender documents as delivered by the upstream feed.
//!
//! Only the fields consulted by the planner are modelled. Documents are
//! transient: they are deserialized, validated, evaluated and dropped.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BridgeError, Result};

/// Separator between tender and lot ids in a composite auction id.
pub const AUCTION_ID_SEPARATOR: char = '_';

// ---------------------------------------------------------------------------
// TenderStatus / LotStatus
// ---------------------------------------------------------------------------

/// Tender status. Statuses the planner does not act on are kept verbatim in
/// `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TenderStatus {
    ActiveAuction,
    ActiveQualification,
    Cancelled,
    Other(String),
}

impl TenderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TenderStatus::ActiveAuction => "active.auction",
            TenderStatus::ActiveQualification => "active.qualification",
            TenderStatus::Cancelled => "cancelled",
            TenderStatus::Other(s) => s,
        }
    }
}

impl From<String> for TenderStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active.auction" => TenderStatus::ActiveAuction,
            "active.qualification" => TenderStatus::ActiveQualification,
            "cancelled" => TenderStatus::Cancelled,
            _ => TenderStatus::Other(s),
        }
    }
}

impl From<TenderStatus> for String {
    fn from(s: TenderStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LotStatus {
    Active,
    Other(String),
}

impl LotStatus {
    pub fn as_str(&self) -> &str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Other(s) => s,
        }
    }
}

impl From<String> for LotStatus {
    fn from(s: String) -> Self {
        if s == "active" {
            LotStatus::Active
        } else {
            LotStatus::Other(s)
        }
    }
}

impl From<LotStatus> for String {
    fn from(s: LotStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AuctionPeriod / Stage / Lot / Tender
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<FixedOffset>>,
}

impl AuctionPeriod {
    /// The start date of an auction that has been scheduled but not yet held.
    ///
    /// `None` when there is no start date, or when an end date is already
    /// present (the auction ran).
    pub fn pending_start(&self) -> Option<DateTime<FixedOffset>> {
        match (self.start_date, self.end_date) {
            (Some(start), None) => Some(start),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub id: String,
    pub status: LotStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<AuctionPeriod>,
}

impl Lot {
    pub fn pending_start(&self) -> Option<DateTime<FixedOffset>> {
        self.auction_period
            .as_ref()
            .and_then(AuctionPeriod::pending_start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tender {
    pub id: String,
    pub status: TenderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_period: Option<AuctionPeriod>,
    /// `None` when the document has no `lots` key at all. An empty list still
    /// counts as a multi-lot tender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lots: Option<Vec<Lot>>,
    /// Carried for the document model only. Cancellation reads the end time
    /// of the stored schedule record, not of the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<FixedOffset>>,
    /// Carried for the document model only, like `end_date`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    /// Selects the worker config file; see `WorkerSettings::config_for`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procurement_method_type: Option<String>,
}

impl Tender {
    pub fn pending_start(&self) -> Option<DateTime<FixedOffset>> {
        self.auction_period
            .as_ref()
            .and_then(AuctionPeriod::pending_start)
    }

    /// Ingestion-boundary check for ids used to build composite auction ids.
    pub fn validate(&self) -> Result<()> {
        check_id(&self.id, &self.id)?;
        for lot in self.lots.iter().flatten() {
            check_id(&self.id, &lot.id)?;
        }
        Ok(())
    }
}

fn check_id(tender_id: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(BridgeError::InvalidDocument {
            id: tender_id.to_string(),
            reason: "empty id".into(),
        });
    }
    if id.contains(AUCTION_ID_SEPARATOR) {
        return Err(BridgeError::InvalidDocument {
            id: tender_id.to_string(),
            reason: format!("id '{id}' contains separator '{AUCTION_ID_SEPARATOR}'"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Composite auction ids
// ---------------------------------------------------------------------------

/// `{tender_id}_{lot_id}`, the scheduling identity of a lot auction.
pub fn auction_id(tender_id: &str, lot_id: &str) -> String {
    format!("{tender_id}{AUCTION_ID_SEPARATOR}{lot_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_upstream_document() {
        let json = r#"{
            "id": "UA-2017-01",
            "status": "active.auction",
            "procurementMethodType": "belowThreshold",
            "auctionPeriod": {"startDate": "2017-06-21T11:44:00+03:00"},
            "lots": [
                {"id": "lot1", "status": "active",
                 "auctionPeriod": {"startDate": "2017-06-22T10:00:00+03:00",
                                   "endDate": "2017-06-22T11:00:00+03:00"}}
            ]
        }"#;
        let tender: Tender = serde_json::from_str(json).unwrap();
        assert_eq!(tender.status, TenderStatus::ActiveAuction);
        assert!(tender.pending_start().is_some());
        let lots = tender.lots.as_ref().unwrap();
        assert_eq!(lots[0].status, LotStatus::Active);
        // Lot auction already has an end date, so it is not pending.
        assert!(lots[0].pending_start().is_none());
        assert_eq!(
            tender.procurement_method_type.as_deref(),
            Some("belowThreshold")
        );
    }

    #[test]
    fn absent_and_empty_lots_are_distinct() {
        let absent: Tender = serde_json::from_str(r#"{"id":"t","status":"cancelled"}"#).unwrap();
        let empty: Tender =
            serde_json::from_str(r#"{"id":"t","status":"cancelled","lots":[]}"#).unwrap();
        assert!(absent.lots.is_none());
        assert_eq!(empty.lots, Some(vec![]));
    }

    #[test]
    fn unknown_status_is_preserved() {
        let tender: Tender =
            serde_json::from_str(r#"{"id":"t","status":"active.tendering"}"#).unwrap();
        assert_eq!(
            tender.status,
            TenderStatus::Other("active.tendering".to_string())
        );
        let out = serde_json::to_string(&tender).unwrap();
        assert!(out.contains("\"status\":\"active.tendering\""));
    }

    #[test]
    fn malformed_timestamp_fails_deserialization() {
        let json = r#"{"id":"t","status":"active.auction",
                       "auctionPeriod":{"startDate":"next tuesday"}}"#;
        assert!(serde_json::from_str::<Tender>(json).is_err());
    }

    #[test]
    fn validate_rejects_separator_in_lot_id() {
        let json = r#"{"id":"t1","status":"active.auction",
                       "lots":[{"id":"bad_lot","status":"active"}]}"#;
        let tender: Tender = serde_json::from_str(json).unwrap();
        let err = tender.validate().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidDocument { .. }));
    }

    #[test]
    fn validate_rejects_empty_tender_id() {
        let tender: Tender = serde_json::from_str(r#"{"id":"","status":"cancelled"}"#).unwrap();
        assert!(tender.validate().is_err());
    }

    #[test]
    fn auction_id_joins_with_separator() {
        assert_eq!(auction_id("t1", "l1"), "t1_l1");
    }
}
