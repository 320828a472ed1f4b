//! CRM API wire types
//!
//! The CRM serves timezone-naive UTC datetimes (`2025-06-01 14:30:00`) and
//! wraps every list endpoint in the same envelope. Conversion to domain types
//! happens here and nowhere else; a record that fails conversion is reported
//! back as an error string so the client can log and skip it.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dealflow_domain::{Deal, DealStatus, Note, Pipeline, Stage};
use serde::Deserialize;
use serde_json::Value;

/// Wire format of CRM datetimes
pub(crate) const CRM_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Envelope wrapped around every CRM list response
///
/// `data` is `null` rather than `[]` when the collection is empty.
#[derive(Debug, Deserialize)]
pub(crate) struct ListEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(default)]
    pub additional_data: Option<AdditionalData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdditionalData {
    #[serde(default)]
    pub pagination: Option<PaginationInfo>,
}

/// Offset pagination cursor reported by the CRM
#[derive(Debug, Deserialize)]
pub(crate) struct PaginationInfo {
    #[serde(default)]
    pub more_items_in_collection: bool,
}

/// A pipeline as the CRM serves it
#[derive(Debug, Deserialize)]
pub(crate) struct RemotePipeline {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub order_nr: i32,
}

impl RemotePipeline {
    pub fn into_pipeline(self) -> Pipeline {
        Pipeline { id: self.id, name: self.name, order_nr: self.order_nr }
    }
}

/// A stage as the CRM serves it
#[derive(Debug, Deserialize)]
pub(crate) struct RemoteStage {
    pub id: i64,
    pub name: String,
    pub pipeline_id: i64,
    #[serde(default)]
    pub order_nr: i32,
    #[serde(default)]
    pub rot_days: Option<i32>,
}

impl RemoteStage {
    pub fn into_stage(self) -> Stage {
        Stage {
            id: self.id,
            name: self.name,
            pipeline_id: self.pipeline_id,
            order_nr: self.order_nr,
            rot_days: self.rot_days,
        }
    }
}

/// A deal as the CRM serves it
#[derive(Debug, Deserialize)]
pub(crate) struct RemoteDeal {
    pub id: i64,
    pub title: String,
    pub pipeline_id: i64,
    pub stage_id: i64,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub value: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub status: String,
    pub add_time: String,
    pub update_time: String,
    #[serde(default)]
    pub stage_change_time: Option<String>,
    #[serde(default)]
    pub last_activity_time: Option<String>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl RemoteDeal {
    /// Convert to a domain deal, attaching the verbatim wire payload
    ///
    /// Returns a description of the problem when the record cannot be
    /// represented: an unknown status or an unparseable datetime.
    pub fn into_deal(self, raw_payload: String) -> Result<Deal, String> {
        let status: DealStatus =
            self.status.parse().map_err(|e: String| format!("deal {}: {e}", self.id))?;
        let add_time = parse_crm_datetime(&self.add_time)
            .map_err(|e| format!("deal {}: add_time {e}", self.id))?;
        let update_time = parse_crm_datetime(&self.update_time)
            .map_err(|e| format!("deal {}: update_time {e}", self.id))?;
        let stage_change_time = self
            .stage_change_time
            .as_deref()
            .map(parse_crm_datetime)
            .transpose()
            .map_err(|e| format!("deal {}: stage_change_time {e}", self.id))?;
        let last_activity_time = self
            .last_activity_time
            .as_deref()
            .map(parse_crm_datetime)
            .transpose()
            .map_err(|e| format!("deal {}: last_activity_time {e}", self.id))?;

        Ok(Deal {
            id: self.id,
            title: self.title,
            pipeline_id: self.pipeline_id,
            stage_id: self.stage_id,
            owner_name: self.owner_name,
            org_name: self.org_name,
            value: self.value,
            currency: self.currency,
            status,
            add_time,
            update_time,
            stage_change_time,
            last_activity_time,
            raw_payload: Some(raw_payload),
        })
    }
}

/// A note as the CRM serves it
#[derive(Debug, Deserialize)]
pub(crate) struct RemoteNote {
    pub id: i64,
    pub deal_id: i64,
    #[serde(default)]
    pub author: Option<String>,
    pub content: String,
    pub add_time: String,
}

impl RemoteNote {
    pub fn into_note(self) -> Result<Note, String> {
        let noted_at = parse_crm_datetime(&self.add_time)
            .map_err(|e| format!("note {}: add_time {e}", self.id))?;
        Ok(Note {
            id: self.id,
            deal_id: self.deal_id,
            author: self.author,
            content: self.content,
            noted_at,
        })
    }
}

/// Parse a CRM datetime string as UTC
pub(crate) fn parse_crm_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, CRM_DATETIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| format!("{raw:?} does not parse: {e}"))
}
