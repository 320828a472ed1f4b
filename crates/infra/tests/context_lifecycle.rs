//! Full engine lifecycle: construction, health, sync, queries, forecast,
//! shutdown.
//!
//! The forecast deal sits in an invoiced stage so the deterministic precheck
//! resolves it and the run never needs the completion endpoint.
#![allow(dead_code)]

#[path = "support.rs"]
mod support;

use std::time::Duration;

use chrono::Utc;
use dealflow_core::DealFilter;
use dealflow_domain::{
    BucketGranularity, Config, CrmConfig, DatabaseConfig, ForecastConfig, ForecastRequest,
    OracleConfig, PredictionSource, SyncConfig, SyncRunStatus, SyncScope,
};
use dealflow_infra::EngineContext;
use serde_json::json;
use support::{crm_datetime, crm_deal_json, crm_note_json, crm_page, init_tracing};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine_config(base_url: String, db_path: &std::path::Path) -> Config {
    init_tracing();
    Config {
        database: DatabaseConfig { path: db_path.display().to_string(), pool_size: 4 },
        crm: CrmConfig { base_url, api_token: "test-token".to_string(), page_size: 100 },
        oracle: OracleConfig::default(),
        // Long interval: these tests drive every sync through the trigger
        sync: SyncConfig { interval_seconds: 3600, enabled: true },
        forecast: ForecastConfig::default(),
    }
}

fn page(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(crm_page(data, false))
}

async fn wait_for_success(context: &EngineContext, entity: &str) {
    for _ in 0..100 {
        let watermarks = context.sync_status().await.expect("sync status should read");
        let done = watermarks
            .iter()
            .any(|w| w.entity == entity && w.status == SyncRunStatus::Success);
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("sync for {entity} did not complete in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_runs_the_whole_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pipelines"))
        .respond_with(page(json!([{ "id": 5, "name": "Service", "order_nr": 1 }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stages"))
        .respond_with(page(json!([
            { "id": 10, "name": "Invoiced", "pipeline_id": 5, "order_nr": 1 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/deals"))
        .and(query_param("pipeline_id", "5"))
        .respond_with(page(json!([crm_deal_json(
            1,
            5,
            10,
            &crm_datetime(Utc::now() - chrono::Duration::hours(1))
        )])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notes"))
        .and(query_param("deal_id", "1"))
        .respond_with(page(json!([crm_note_json(
            500,
            1,
            "Invoice sent, awaiting payment",
            "2025-06-01 10:00:00"
        )])))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir should be created");
    let config = engine_config(server.uri(), &dir.path().join("engine.db"));
    let context = EngineContext::new_with_config(config).await.expect("context should assemble");

    // Everything is up before any sync has run
    let health = context.health_check().await;
    assert!(health.is_healthy, "fresh engine should be healthy: {:?}", health.components);
    assert!(health.components.iter().any(|c| c.name == "database" && c.is_healthy));
    assert!(health.components.iter().any(|c| c.name == "sync_scheduler" && c.is_healthy));

    context.trigger_sync(SyncScope::All).await.expect("trigger should enqueue");
    wait_for_success(&context, "pipelines").await;
    wait_for_success(&context, "stages").await;
    wait_for_success(&context, "deals_5").await;

    // Query surface over the synced cache
    let (deal, notes) = context
        .deal_detail(1, 5)
        .await
        .expect("detail should read")
        .expect("deal 1 should be cached");
    assert_eq!(deal.title, "Deal 1");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "Invoice sent, awaiting payment");

    let hits = context
        .search_deals("deal", DealFilter::default())
        .await
        .expect("search should run");
    assert_eq!(hits.len(), 1);

    // Updated an hour ago, so nothing is overdue yet
    let overdue = context.overdue_deals(5, None).await.expect("overdue should run");
    assert!(overdue.is_empty());

    // The invoiced stage resolves in the precheck; no completion call happens
    let forecast = context
        .predict_cashflow(&ForecastRequest {
            pipeline_ids: vec![5],
            horizon_days: 365,
            granularity: BucketGranularity::Month,
            min_confidence: None,
        })
        .await
        .expect("forecast should run");
    assert_eq!(forecast.per_deal.len(), 1);
    assert_eq!(forecast.per_deal[0].source, PredictionSource::Precheck);
    assert!((forecast.per_deal[0].confidence - 1.0).abs() < f32::EPSILON);
    assert_eq!(forecast.buckets.len(), 1);
    assert_eq!(forecast.buckets[0].deal_count, 1);
    assert!((forecast.buckets[0].total_value - 10_000.0).abs() < f64::EPSILON);

    let report = context.explain_assumptions(&forecast.per_deal);
    assert_eq!(report.confidence_histogram.high, 1);
    assert!(report.per_deal.contains_key(&1));

    context.shutdown().await.expect("shutdown should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_schedule_still_serves_manual_triggers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pipelines"))
        .respond_with(page(json!([{ "id": 5, "name": "Service", "order_nr": 1 }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stages"))
        .respond_with(page(json!([])))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir should be created");
    let mut config = engine_config(server.uri(), &dir.path().join("engine.db"));
    config.sync.enabled = false;

    let context = EngineContext::new_with_config(config).await.expect("context should assemble");

    // The loop runs in trigger-only mode, so it still counts as healthy
    let health = context.health_check().await;
    assert!(health.components.iter().any(|c| c.name == "sync_scheduler" && c.is_healthy));

    context.trigger_sync(SyncScope::Catalog).await.expect("trigger should enqueue");
    wait_for_success(&context, "pipelines").await;

    let watermarks = context.sync_status().await.expect("status should read");
    assert!(watermarks.iter().any(|w| w.entity == "pipelines"));
}
