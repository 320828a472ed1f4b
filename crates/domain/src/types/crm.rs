//! CRM entities mirrored into the local cache
//!
//! These are the canonical in-process representations. All datetimes are
//! `DateTime<Utc>`; conversion from the CRM's wire format happens at the
//! ingestion boundary, never here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sales pipeline; fully replaced on every catalog sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// CRM identifier (source-of-truth primary key)
    pub id: i64,
    /// Display name
    pub name: String,
    /// Display order within the CRM
    pub order_nr: i32,
}

/// Pipeline stage; fully replaced on every catalog sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// CRM identifier
    pub id: i64,
    /// Display name, e.g. "Order Received"
    pub name: String,
    /// Owning pipeline; must reference a synced [`Pipeline`]
    pub pipeline_id: i64,
    /// Display order within the pipeline
    pub order_nr: i32,
    /// Days in this stage before the CRM considers the deal rotten
    pub rot_days: Option<i32>,
}

/// Deal status as reported by the CRM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Open,
    Won,
    Lost,
}

crate::impl_status_conversions!(DealStatus {
    Open => "open",
    Won => "won",
    Lost => "lost",
});

/// A deal mirrored from the CRM
///
/// Written only by the sync executor via upsert; query and derivation code
/// treats deals as read-only. Invariant: `stage_change_time`, when present,
/// is never later than `update_time` (enforced at the ingestion boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    /// CRM identifier (upsert key)
    pub id: i64,
    /// Deal title
    pub title: String,
    /// Owning pipeline
    pub pipeline_id: i64,
    /// Current stage
    pub stage_id: i64,
    /// Owner display name
    pub owner_name: Option<String>,
    /// Organization display name
    pub org_name: Option<String>,
    /// Monetary value in `currency` units
    pub value: f64,
    /// ISO currency code
    pub currency: String,
    /// Open/won/lost
    pub status: DealStatus,
    /// Creation time in the CRM
    pub add_time: DateTime<Utc>,
    /// Last modification time in the CRM
    pub update_time: DateTime<Utc>,
    /// When the deal entered its current stage
    pub stage_change_time: Option<DateTime<Utc>>,
    /// Last logged activity, if any
    pub last_activity_time: Option<DateTime<Utc>>,
    /// Verbatim CRM payload for fields not modeled above
    pub raw_payload: Option<String>,
}

impl Deal {
    /// Reference instant for stage-age calculations
    ///
    /// Falls back to `update_time` when the CRM never reported a stage
    /// change, which happens for deals created directly into a stage.
    #[must_use]
    pub fn stage_entered_at(&self) -> DateTime<Utc> {
        self.stage_change_time.unwrap_or(self.update_time)
    }

    /// Whole days spent in the current stage as of `now`
    #[must_use]
    pub fn days_in_stage(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stage_entered_at()).num_days()
    }

    /// Whole days since the CRM last saw a modification, as of `now`
    #[must_use]
    pub fn days_since_update(&self, now: DateTime<Utc>) -> i64 {
        (now - self.update_time).num_days()
    }

    /// Look up an unmapped field in the verbatim CRM payload
    ///
    /// Returns `None` when no payload was stored, the payload is not valid
    /// JSON, or the key is absent.
    #[must_use]
    pub fn raw_field(&self, key: &str) -> Option<serde_json::Value> {
        let raw = self.raw_payload.as_deref()?;
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        value.get(key).cloned()
    }
}

/// A note attached to a deal
///
/// Fetched lazily per deal, stored append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// CRM identifier
    pub id: i64,
    /// Owning deal
    pub deal_id: i64,
    /// Author display name
    pub author: Option<String>,
    /// Free-text content
    pub content: String,
    /// When the note was written in the CRM
    pub noted_at: DateTime<Utc>,
}
