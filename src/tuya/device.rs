use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::security::request_signer::Query;
use crate::tuya::logs::{DeviceLogPages, DeviceLogQuery};
use crate::tuya::openapi::TuyaOpenApi;

fn device_ids_query(device_ids: &[String]) -> Query {
    let mut query = Query::new();
    query.insert("device_ids".into(), device_ids.join(","));
    query
}

fn is_success(response: &Value) -> bool {
    response.get("success").and_then(Value::as_bool) == Some(true)
}

/// Smart-home device endpoints.
///
/// See <https://developer.tuya.com/en/docs/cloud/device-management?id=K9g6rfntdz78a>.
#[derive(Debug, Clone, Copy)]
pub struct SmartHomeDeviceApi<'a> {
    api: &'a TuyaOpenApi,
}

impl<'a> SmartHomeDeviceApi<'a> {
    pub fn new(api: &'a TuyaOpenApi) -> Self {
        Self { api }
    }

    /// Device details, including properties and (optionally) the latest status.
    pub async fn get_device_info(&self, device_id: &str, include_device_status: bool) -> Result<Value> {
        let mut response = self
            .api
            .get(&format!("/v1.0/devices/{device_id}"), &Query::new())
            .await?;
        if !include_device_status {
            if let Some(result) = response.get_mut("result").and_then(Value::as_object_mut) {
                result.remove("status");
            }
        }
        Ok(response)
    }

    pub async fn get_device_list_info(
        &self,
        device_ids: &[String],
        include_device_status: bool,
    ) -> Result<Value> {
        let mut response = self
            .api
            .get("/v1.0/devices/", &device_ids_query(device_ids))
            .await?;
        if is_success(&response) && !include_device_status {
            if let Some(devices) = response
                .pointer_mut("/result/devices")
                .and_then(Value::as_array_mut)
            {
                for info in devices.iter_mut().filter_map(Value::as_object_mut) {
                    info.remove("status");
                }
            }
        }
        Ok(response)
    }

    /// Device details with `result` narrowed to the status list.
    pub async fn get_device_status(&self, device_id: &str) -> Result<Value> {
        let mut response = self
            .api
            .get(&format!("/v1.0/devices/{device_id}"), &Query::new())
            .await?;
        let status = response
            .pointer("/result/status")
            .cloned()
            .unwrap_or(Value::Null);
        response["result"] = status;
        Ok(response)
    }

    /// `result` becomes `[{"id": ..., "status": [...]}, ...]`.
    pub async fn get_device_list_status(&self, device_ids: &[String]) -> Result<Value> {
        let mut response = self
            .api
            .get("/v1.0/devices/", &device_ids_query(device_ids))
            .await?;

        let mut status_list = Vec::new();
        if is_success(&response) {
            if let Some(devices) = response.pointer("/result/devices").and_then(Value::as_array) {
                status_list = devices
                    .iter()
                    .map(|info| {
                        json!({
                            "id": info.get("id").cloned().unwrap_or(Value::Null),
                            "status": info.get("status").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect();
            }
        }
        response["result"] = Value::Array(status_list);
        Ok(response)
    }

    /// Factory information: id, uuid, sn, mac.
    pub async fn get_factory_info(&self, device_ids: &[String]) -> Result<Value> {
        self.api
            .get("/v1.0/devices/factory-infos", &device_ids_query(device_ids))
            .await
    }

    /// Instruction set the device supports for issuing commands.
    pub async fn get_device_functions(&self, device_id: &str) -> Result<Value> {
        self.api
            .get(&format!("/v1.0/devices/{device_id}/functions"), &Query::new())
            .await
    }

    /// Instruction set the platform defines for a product category.
    pub async fn get_category_functions(&self, category_id: &str) -> Result<Value> {
        self.api
            .get(&format!("/v1.0/functions/{category_id}"), &Query::new())
            .await
    }

    /// Instruction set and status set of the device.
    pub async fn get_device_specification(&self, device_id: &str) -> Result<Value> {
        self.api
            .get(&format!("/v1.0/devices/{device_id}/specifications"), &Query::new())
            .await
    }

    /// Issue standard instructions, e.g. `[{"code": "switch_1", "value": true}]`.
    pub async fn send_commands(&self, device_id: &str, commands: &[Value]) -> Result<Value> {
        let body = json!({ "commands": commands });
        self.api
            .post(&format!("/v1.0/devices/{device_id}/commands"), Some(&body))
            .await
    }

    pub fn device_log_pages(&self, device_id: &str, query: &DeviceLogQuery) -> DeviceLogPages<'a> {
        DeviceLogPages::new(self.api, device_id, query)
    }

    /// Every log entry in the window, all pages concatenated in order.
    ///
    /// `device_name` only labels log output; it defaults to the id.
    pub async fn get_device_log(
        &self,
        device_id: &str,
        query: &DeviceLogQuery,
        device_name: Option<&str>,
    ) -> Result<Vec<Value>> {
        let name = device_name.unwrap_or(device_id);
        info!(device = %name, "Start fetching historical data");

        let mut pages = self.device_log_pages(device_id, query);
        let mut device_logs = Vec::new();
        while let Some(page) = pages.next_page().await? {
            info!(
                device = %name,
                page = pages.pages_fetched(),
                entries = page.len(),
                "Fetched historical data"
            );
            device_logs.extend(page);
        }

        if query.warn_on_empty_data && device_logs.is_empty() {
            warn!(device = %name, "Detected empty result");
        }

        Ok(device_logs)
    }
}

/// Batch calls over a fixed set of named devices.
#[derive(Debug, Clone)]
pub struct TuyaDeviceManager {
    api: TuyaOpenApi,
    device_map: BTreeMap<String, String>,
    device_ids: Vec<String>,
}

impl TuyaDeviceManager {
    /// Devices keyed by a friendly name (e.g. `"PIR3" -> "<device id>"`).
    pub fn from_map(api: TuyaOpenApi, device_map: BTreeMap<String, String>) -> Result<Self> {
        if device_map.is_empty() {
            bail!("device map must contain at least one device");
        }
        let device_ids = device_map.values().cloned().collect();
        Ok(Self {
            api,
            device_map,
            device_ids,
        })
    }

    /// Devices named by their own ids. Batch list calls send the ids in the
    /// order given.
    pub fn from_list(api: TuyaOpenApi, device_ids: &[String]) -> Result<Self> {
        if device_ids.is_empty() {
            bail!("device list must contain at least one device");
        }
        let device_map = device_ids
            .iter()
            .map(|id| (id.clone(), id.clone()))
            .collect();
        Ok(Self {
            api,
            device_map,
            device_ids: device_ids.to_vec(),
        })
    }

    pub fn device_map(&self) -> &BTreeMap<String, String> {
        &self.device_map
    }

    pub fn device_ids(&self) -> &[String] {
        &self.device_ids
    }

    fn devices(&self) -> SmartHomeDeviceApi<'_> {
        SmartHomeDeviceApi::new(&self.api)
    }

    pub async fn get_device_status_in_batch(&self) -> Result<Value> {
        self.devices().get_device_list_status(&self.device_ids).await
    }

    pub async fn get_device_info_in_batch(&self, include_device_status: bool) -> Result<Value> {
        self.devices()
            .get_device_list_info(&self.device_ids, include_device_status)
            .await
    }

    pub async fn get_factory_info_in_batch(&self) -> Result<Value> {
        self.devices().get_factory_info(&self.device_ids).await
    }

    /// Device name -> full log for the window.
    pub async fn get_device_log_in_batch(
        &self,
        query: &DeviceLogQuery,
    ) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut logs = BTreeMap::new();
        for (name, device_id) in &self.device_map {
            let device_log = self
                .devices()
                .get_device_log(device_id, query, Some(name))
                .await?;
            logs.insert(name.clone(), device_log);
        }
        Ok(logs)
    }

    /// Device name -> command response.
    pub async fn send_command_in_batch(&self, commands: &[Value]) -> Result<BTreeMap<String, Value>> {
        let mut responses = BTreeMap::new();
        for (name, device_id) in &self.device_map {
            let response = self.devices().send_commands(device_id, commands).await?;
            responses.insert(name.clone(), response);
        }
        Ok(responses)
    }
}
