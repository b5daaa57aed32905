use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::security::request_signer::Query;
use crate::tuya::openapi::TuyaOpenApi;

/// "The actual data" reported by the device.
pub const DEFAULT_LOG_TYPE: u32 = 7;
/// Largest page the device-log endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Time window and options for a device-log query.
///
/// Timestamps are Unix epoch values in seconds (10 digits) or milliseconds
/// (13 digits), passed through as given. Tuya's free tier keeps about a week
/// of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLogQuery {
    pub start_time: i64,
    pub end_time: i64,
    pub log_type: u32,
    pub page_size: u32,
    pub warn_on_empty_data: bool,
}

impl DeviceLogQuery {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            log_type: DEFAULT_LOG_TYPE,
            page_size: MAX_PAGE_SIZE,
            warn_on_empty_data: false,
        }
    }

    pub fn with_log_type(mut self, log_type: u32) -> Self {
        self.log_type = log_type;
        self
    }

    /// Clamped to `1..=100`.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn warn_on_empty_data(mut self, warn: bool) -> Self {
        self.warn_on_empty_data = warn;
        self
    }

    fn to_query(&self) -> Query {
        let mut query = Query::new();
        query.insert("type".into(), self.log_type.to_string());
        query.insert("start_time".into(), self.start_time.to_string());
        query.insert("end_time".into(), self.end_time.to_string());
        // `page_size` is public; clamp what goes on the wire.
        let size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        query.insert("size".into(), size.to_string());
        query
    }
}

#[derive(Debug, Deserialize)]
struct LogPage {
    #[serde(default)]
    logs: Vec<Value>,
    has_next: bool,
    next_row_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEnvelope {
    result: LogPage,
}

/// Cursor over the pages of `GET /v1.0/devices/{id}/logs`.
///
/// Each call to [`DeviceLogPages::next_page`] fetches one page; the
/// `next_row_key` of a page becomes the `start_row_key` of the next request
/// until a page reports `has_next == false`.
#[derive(Debug)]
pub struct DeviceLogPages<'a> {
    api: &'a TuyaOpenApi,
    device_id: String,
    path: String,
    query: Query,
    warn_on_empty_data: bool,
    pages_fetched: usize,
    exhausted: bool,
}

impl<'a> DeviceLogPages<'a> {
    pub fn new(api: &'a TuyaOpenApi, device_id: &str, query: &DeviceLogQuery) -> Self {
        Self {
            api,
            device_id: device_id.to_string(),
            path: format!("/v1.0/devices/{device_id}/logs"),
            query: query.to_query(),
            warn_on_empty_data: query.warn_on_empty_data,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Fetch the next page of logs, or `None` once the last page was returned.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        if self.exhausted {
            return Ok(None);
        }

        let response = self.api.get(&self.path, &self.query).await?;
        let envelope = LogEnvelope::deserialize(&response)
            .with_context(|| format!("parsing log page for device {}", self.device_id))?;
        let page = envelope.result;
        self.pages_fetched += 1;

        if self.pages_fetched == 1 && self.warn_on_empty_data && page.logs.is_empty() {
            warn!(
                device_id = %self.device_id,
                params = ?self.query,
                "Detected empty result"
            );
        }

        if page.has_next {
            let cursor = page
                .next_row_key
                .filter(|key| !key.is_empty())
                .with_context(|| {
                    format!(
                        "log page {} for device {} has more data but no next_row_key",
                        self.pages_fetched, self.device_id
                    )
                })?;
            debug!(device_id = %self.device_id, cursor = %cursor, "More log pages available");
            self.query.insert("start_row_key".into(), cursor);
        } else {
            self.exhausted = true;
        }

        Ok(Some(page.logs))
    }

    /// Drain every remaining page, concatenating logs in page order.
    pub async fn collect_all(mut self) -> Result<Vec<Value>> {
        let mut logs = Vec::new();
        while let Some(page) = self.next_page().await? {
            logs.extend(page);
        }
        Ok(logs)
    }
}
