//! CRM API client
//!
//! Speaks the CRM's offset-paginated JSON API. The client hides pagination
//! and wire conversion behind [`CrmGateway`]; records that fail conversion
//! are logged and skipped so one bad record never sinks a whole fetch.

use async_trait::async_trait;
use dealflow_core::CrmGateway;
use dealflow_domain::{CrmConfig, Deal, DealflowError, Note, Pipeline, Result, Stage};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use super::types::{ListEnvelope, RemoteDeal, RemoteNote, RemotePipeline, RemoteStage};
use crate::http::HttpClient;

/// CRM API client
pub struct CrmClient {
    http_client: HttpClient,
    base_url: String,
    api_token: String,
    page_size: u32,
}

impl CrmClient {
    /// Create a new client
    ///
    /// The transport-level retry policy lives in the supplied [`HttpClient`];
    /// this type only adds pagination, auth and conversion.
    pub fn new(http_client: HttpClient, config: &CrmConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            page_size: config.page_size.max(1),
        }
    }

    /// Fetch every page of a list endpoint, accumulating raw elements
    async fn fetch_collection(
        &self,
        path: &str,
        extra: &[(String, String)],
    ) -> Result<Vec<Value>> {
        let mut items: Vec<Value> = Vec::new();
        let mut start: u32 = 0;

        loop {
            let envelope = self.fetch_page(path, extra, start).await?;
            let page = envelope.data.unwrap_or_default();
            let fetched = page.len() as u32;
            items.extend(page);

            let more = envelope
                .additional_data
                .and_then(|a| a.pagination)
                .map(|p| p.more_items_in_collection)
                .unwrap_or(false);

            // An empty page with more=true would loop forever; trust the data
            if !more || fetched == 0 {
                break;
            }
            start += fetched;
        }

        Ok(items)
    }

    async fn fetch_page(
        &self,
        path: &str,
        extra: &[(String, String)],
        start: u32,
    ) -> Result<ListEnvelope> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self
            .http_client
            .request(Method::GET, &url)
            .query(&[("api_token", self.api_token.as_str())])
            .query(&[("start", start.to_string()), ("limit", self.page_size.to_string())]);
        for (key, value) in extra {
            request = request.query(&[(key.as_str(), value.as_str())]);
        }

        let response = self.http_client.send(request).await?;
        let status = response.status();
        debug!(path, start, status = status.as_u16(), "CRM page fetched");

        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), path));
        }

        let envelope: ListEnvelope = response.json().await.map_err(|e| {
            DealflowError::Network(format!("CRM response for {path} did not parse: {e}"))
        })?;
        if !envelope.success {
            return Err(DealflowError::Network(format!("CRM reported failure for {path}")));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl CrmGateway for CrmClient {
    async fn fetch_pipelines(&self) -> Result<Vec<Pipeline>> {
        let raw = self.fetch_collection("pipelines", &[]).await?;
        let mut pipelines = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<RemotePipeline>(value) {
                Ok(remote) => pipelines.push(remote.into_pipeline()),
                Err(e) => warn!(error = %e, "skipping malformed pipeline record"),
            }
        }
        Ok(pipelines)
    }

    async fn fetch_stages(&self) -> Result<Vec<Stage>> {
        let raw = self.fetch_collection("stages", &[]).await?;
        let mut stages = Vec::with_capacity(raw.len());
        for value in raw {
            match serde_json::from_value::<RemoteStage>(value) {
                Ok(remote) => stages.push(remote.into_stage()),
                Err(e) => warn!(error = %e, "skipping malformed stage record"),
            }
        }
        Ok(stages)
    }

    async fn fetch_open_deals(&self, pipeline_id: i64) -> Result<Vec<Deal>> {
        let extra = [
            ("pipeline_id".to_string(), pipeline_id.to_string()),
            ("status".to_string(), "open".to_string()),
        ];
        let raw = self.fetch_collection("deals", &extra).await?;

        let mut deals = Vec::with_capacity(raw.len());
        for value in raw {
            let raw_payload = value.to_string();
            let converted = serde_json::from_value::<RemoteDeal>(value)
                .map_err(|e| e.to_string())
                .and_then(|remote| remote.into_deal(raw_payload));
            match converted {
                Ok(deal) => deals.push(deal),
                Err(e) => warn!(pipeline_id, error = %e, "skipping malformed deal record"),
            }
        }
        Ok(deals)
    }

    async fn fetch_notes(&self, deal_id: i64, limit: usize) -> Result<Vec<Note>> {
        let extra = [("deal_id".to_string(), deal_id.to_string())];
        let raw = self.fetch_collection("notes", &extra).await?;

        let mut notes = Vec::with_capacity(raw.len());
        for value in raw {
            let converted = serde_json::from_value::<RemoteNote>(value)
                .map_err(|e| e.to_string())
                .and_then(RemoteNote::into_note);
            match converted {
                Ok(note) => notes.push(note),
                Err(e) => warn!(deal_id, error = %e, "skipping malformed note record"),
            }
        }

        // The CRM does not guarantee an order; newest first is ours to enforce
        notes.sort_by(|a, b| b.noted_at.cmp(&a.noted_at).then(b.id.cmp(&a.id)));
        notes.truncate(limit);
        Ok(notes)
    }
}

fn error_for_status(status: u16, path: &str) -> DealflowError {
    match status {
        401 | 403 => DealflowError::Auth(format!("CRM rejected the API token ({status})")),
        404 => DealflowError::NotFound(format!("CRM endpoint {path} not found")),
        429 => DealflowError::Network(format!("CRM rate limited the request to {path}")),
        _ => DealflowError::Network(format!("CRM returned status {status} for {path}")),
    }
}
