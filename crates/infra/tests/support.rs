//! Shared fixtures for the infra integration tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use dealflow_domain::{Deal, DealStatus, Note, Pipeline, Stage};
use dealflow_infra::database::DbManager;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Forward engine tracing to stderr when `RUST_LOG` is set, so a failing
/// test can be rerun with its logs visible.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Temporary database with migrations applied, kept alive for the duration of
/// a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("temporary directory should be created");
        let db_path = temp_dir.path().join("dealflow-test.db");

        let manager = Arc::new(DbManager::new(&db_path, 4).expect("db manager should initialise"));
        manager.run_migrations().expect("schema migrations should apply");

        Self { manager, _temp_dir: temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed reference instant so assertions do not race the wall clock.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("base timestamp should be valid")
}

pub fn make_pipeline(id: i64, name: &str) -> Pipeline {
    Pipeline { id, name: name.to_string(), order_nr: id as i32 }
}

pub fn make_stage(id: i64, pipeline_id: i64, name: &str) -> Stage {
    Stage { id, name: name.to_string(), pipeline_id, order_nr: id as i32, rot_days: None }
}

pub fn make_deal(id: i64, pipeline_id: i64, stage_id: i64, update_time: DateTime<Utc>) -> Deal {
    Deal {
        id,
        title: format!("Deal {id}"),
        pipeline_id,
        stage_id,
        owner_name: Some("Dana".to_string()),
        org_name: Some("Vertex Labs".to_string()),
        value: 10_000.0,
        currency: "EUR".to_string(),
        status: DealStatus::Open,
        add_time: update_time - Duration::days(30),
        update_time,
        stage_change_time: Some(update_time - Duration::days(7)),
        last_activity_time: None,
        raw_payload: None,
    }
}

pub fn make_note(id: i64, deal_id: i64, content: &str, noted_at: DateTime<Utc>) -> Note {
    Note { id, deal_id, author: Some("Dana".to_string()), content: content.to_string(), noted_at }
}

/// Format an instant the way the CRM serves datetimes.
pub fn crm_datetime(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// CRM list envelope wrapping one page of records.
pub fn crm_page(data: Value, more: bool) -> Value {
    json!({
        "success": true,
        "data": data,
        "additional_data": { "pagination": { "more_items_in_collection": more } }
    })
}

/// A deal record as the CRM would serve it.
pub fn crm_deal_json(id: i64, pipeline_id: i64, stage_id: i64, update_time: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Deal {id}"),
        "pipeline_id": pipeline_id,
        "stage_id": stage_id,
        "owner_name": "Dana",
        "value": 10_000.0,
        "currency": "EUR",
        "status": "open",
        "add_time": "2025-05-01 08:00:00",
        "update_time": update_time
    })
}

/// A note record as the CRM would serve it.
pub fn crm_note_json(id: i64, deal_id: i64, content: &str, add_time: &str) -> Value {
    json!({
        "id": id,
        "deal_id": deal_id,
        "author": "Dana",
        "content": content,
        "add_time": add_time
    })
}
