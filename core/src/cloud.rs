//! Cloud deployment API client.
//!
//! The provider exposes a JSON-over-HTTPS control plane: private image
//! listing, per-region GPU stock, machine blacklist, and deployment /
//! container / container-event CRUD. Every response is an envelope
//! `{code, msg, data}` where anything but `code == "Success"` is a
//! failure. `CloudApi` is the trait the remote engine programs against;
//! `CloudClient` is the production implementation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{JobError, Result};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A private execution image registered with the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudImage {
    pub id: i64,
    pub image_name: String,
    pub image_uuid: String,
}

/// GPU availability for one GPU type in one region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GpuStock {
    pub idle_gpu_num: i64,
    pub total_gpu_num: i64,
}

/// A data-center machine the account is currently barred from.
#[derive(Debug, Clone, Deserialize)]
pub struct BlacklistEntry {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub data_center: String,
    #[serde(default)]
    pub expired_time: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub msg: String,
}

/// One deployment (the provider's unit of workload submission).
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

/// A running (or stopped) container backing a deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    pub uuid: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub gpu_name: String,
    /// Provider-issued connection string, e.g. `ssh -p 30022 root@host`.
    #[serde(default)]
    pub ssh_command: Option<String>,
    #[serde(default)]
    pub root_password: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub stopped_at: Option<String>,
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// A lifecycle event of a deployment's container.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerEvent {
    pub deployment_container_uuid: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: String,
}

/// Parameters for creating a deployment of kind Job. One job maps to
/// one deployment; replica and parallelism counts stay at 1.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRequest {
    pub name: String,
    pub image_uuid: String,
    pub replica_num: i64,
    pub parallelism_num: i64,
    pub gpu_name_set: Vec<String>,
    pub gpu_num: i64,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_sign: Option<String>,
    /// Extra environment injected into the deployment's containers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// CloudApi
// ---------------------------------------------------------------------------

/// The control-plane surface the remote engine needs.
pub trait CloudApi {
    fn image_list(&self) -> Result<Vec<CloudImage>>;
    fn gpu_stock(&self, region: Option<&str>) -> Result<BTreeMap<String, GpuStock>>;
    fn blacklist(&self) -> Result<Vec<BlacklistEntry>>;
    fn create_job_deployment(&self, request: &DeploymentRequest) -> Result<String>;
    fn deployment_list(&self) -> Result<Vec<Deployment>>;
    fn deployment_get(&self, uuid: &str) -> Result<Deployment>;
    fn deployment_delete(&self, uuid: &str) -> Result<()>;
    fn container_list(&self, deployment_uuid: &str) -> Result<Vec<Container>>;
    fn container_event_list(&self, deployment_uuid: &str) -> Result<Vec<ContainerEvent>>;
}

// ---------------------------------------------------------------------------
// Envelope parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Check HTTP status and API result code, returning the `data` payload.
fn parse_envelope(http_status: u16, body: &str) -> Result<Value> {
    if http_status != 200 {
        return Err(JobError::Network(format!(
            "http code not 200: {} - {}",
            http_status, body
        )));
    }
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| JobError::Network(format!("malformed API response: {}", e)))?;
    if envelope.code != "Success" {
        return Err(JobError::Network(format!(
            "return code not Success: {} - {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        )));
    }
    Ok(envelope.data)
}

/// The stock payload is a list of single-key objects
/// `{"<gpu type>": {"idle_gpu_num": n, "total_gpu_num": m}}`.
fn parse_gpu_stocks(data: Value) -> Result<BTreeMap<String, GpuStock>> {
    let items = data
        .as_array()
        .ok_or_else(|| JobError::Network("gpu stock payload is not a list".into()))?;
    let mut stocks = BTreeMap::new();
    for item in items {
        let object = item
            .as_object()
            .ok_or_else(|| JobError::Network("gpu stock entry is not an object".into()))?;
        for (gpu_type, stock) in object {
            let stock: GpuStock = serde_json::from_value(stock.clone())
                .map_err(|e| JobError::Network(format!("bad gpu stock entry: {}", e)))?;
            stocks.insert(gpu_type.clone(), stock);
        }
    }
    Ok(stocks)
}

fn from_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| JobError::Network(format!("unexpected API payload: {}", e)))
}

// ---------------------------------------------------------------------------
// CloudClient
// ---------------------------------------------------------------------------

const DEFAULT_HOST: &str = "https://api.autodl.com";
const DEFAULT_REGION: &str = "westDC3";
const IMAGE_PAGE_SIZE: i64 = 10;

/// Production client over the provider's REST API.
pub struct CloudClient {
    token: String,
    host: String,
    default_region: String,
    http: reqwest::blocking::Client,
}

impl CloudClient {
    pub fn new(token: &str) -> CloudClient {
        CloudClient::with_host(token, DEFAULT_HOST)
    }

    pub fn with_host(token: &str, host: &str) -> CloudClient {
        CloudClient {
            token: token.to_string(),
            host: host.trim_end_matches('/').to_string(),
            default_region: DEFAULT_REGION.to_string(),
            http: reqwest::blocking::Client::new(),
        }
    }

    /// POST `body` (or GET when `body` is `None`) and unwrap the
    /// response envelope.
    fn request(&self, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.host, path);
        let builder = match &body {
            Some(body) => self.http.post(&url).json(body),
            None => self.http.get(&url),
        };
        let response = builder
            .header("Authorization", &self.token)
            .header("Content-Type", "application/json")
            .send()
            .map_err(|e| JobError::Network(format!("request to {} failed: {}", url, e)))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| JobError::Network(format!("reading response from {}: {}", url, e)))?;
        parse_envelope(status, &text)
    }
}

impl CloudApi for CloudClient {
    fn image_list(&self) -> Result<Vec<CloudImage>> {
        let mut images = Vec::new();
        let mut page_index = 1;
        loop {
            let data = self.request(
                "/api/v1/dev/image/private/list",
                Some(json!({
                    "offset": 0,
                    "page_size": IMAGE_PAGE_SIZE,
                    "page_index": page_index,
                })),
            )?;
            let page: Vec<CloudImage> = from_data(data["list"].clone())?;
            images.extend(page);
            let max_page = data["max_page"].as_i64().unwrap_or(page_index);
            if page_index >= max_page {
                break;
            }
            page_index += 1;
        }
        Ok(images)
    }

    fn gpu_stock(&self, region: Option<&str>) -> Result<BTreeMap<String, GpuStock>> {
        let region = region.unwrap_or(&self.default_region);
        let data = self.request(
            "/api/v1/dev/machine/region/gpu_stock",
            Some(json!({ "region_sign": region })),
        )?;
        parse_gpu_stocks(data)
    }

    fn blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        let data = self.request("/api/v1/dev/deployment/blacklist", Some(json!({})))?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        from_data(data)
    }

    fn create_job_deployment(&self, request: &DeploymentRequest) -> Result<String> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| JobError::Validation(format!("bad deployment request: {}", e)))?;
        body["deployment_type"] = json!("Job");
        let data = self.request("/api/v1/dev/deployment", Some(body))?;
        data["deployment_uuid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| JobError::Network("create returned no deployment_uuid".into()))
    }

    fn deployment_list(&self) -> Result<Vec<Deployment>> {
        let data = self.request(
            "/api/v1/dev/deployment/list",
            Some(json!({ "page_index": 1, "page_size": 100 })),
        )?;
        from_data(data["list"].clone())
    }

    fn deployment_get(&self, uuid: &str) -> Result<Deployment> {
        self.deployment_list()?
            .into_iter()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| JobError::NotFound(uuid.to_string()))
    }

    fn deployment_delete(&self, uuid: &str) -> Result<()> {
        self.request(
            "/api/v1/dev/deployment/operate",
            Some(json!({ "deployment_uuid": uuid, "operate": "delete" })),
        )?;
        Ok(())
    }

    fn container_list(&self, deployment_uuid: &str) -> Result<Vec<Container>> {
        let data = self.request(
            "/api/v1/dev/deployment/container/list",
            Some(json!({
                "deployment_uuid": deployment_uuid,
                "page_index": 1,
                "page_size": 100,
            })),
        )?;
        from_data(data["list"].clone())
    }

    fn container_event_list(&self, deployment_uuid: &str) -> Result<Vec<ContainerEvent>> {
        let data = self.request(
            "/api/v1/dev/deployment/container/event/list",
            Some(json!({ "deployment_uuid": deployment_uuid })),
        )?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        from_data(data["list"].clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Envelope --

    #[test]
    fn envelope_unwraps_success() {
        let data =
            parse_envelope(200, r#"{"code":"Success","msg":null,"data":{"x":1}}"#).unwrap();
        assert_eq!(data["x"], 1);
    }

    #[test]
    fn envelope_rejects_http_failure() {
        let err = parse_envelope(500, "oops").unwrap_err();
        match err {
            JobError::Network(msg) => assert!(msg.contains("500")),
            other => panic!("expected Network, got {:?}", other),
        }
    }

    #[test]
    fn envelope_rejects_api_failure_code() {
        let err = parse_envelope(
            200,
            r#"{"code":"AuthFailure","msg":"bad token","data":null}"#,
        )
        .unwrap_err();
        match err {
            JobError::Network(msg) => {
                assert!(msg.contains("AuthFailure"));
                assert!(msg.contains("bad token"));
            }
            other => panic!("expected Network, got {:?}", other),
        }
    }

    // -- Payload shapes --

    #[test]
    fn gpu_stock_folds_single_key_objects() {
        let data = serde_json::json!([
            {"RTX 4090": {"idle_gpu_num": 3, "total_gpu_num": 8}},
            {"A100": {"idle_gpu_num": 0, "total_gpu_num": 4}}
        ]);
        let stocks = parse_gpu_stocks(data).unwrap();
        assert_eq!(
            stocks["RTX 4090"],
            GpuStock {
                idle_gpu_num: 3,
                total_gpu_num: 8
            }
        );
        assert_eq!(stocks["A100"].idle_gpu_num, 0);
        assert_eq!(stocks.len(), 2);
    }

    #[test]
    fn container_parses_with_optional_fields_missing() {
        let container: Container = serde_json::from_str(
            r#"{"uuid":"c-1","status":"running","gpu_name":"RTX 4090"}"#,
        )
        .unwrap();
        assert!(container.is_running());
        assert!(container.ssh_command.is_none());
    }

    #[test]
    fn container_parses_ssh_info() {
        let container: Container = serde_json::from_str(
            r#"{"uuid":"c-2","status":"stopped",
                "ssh_command":"ssh -p 30022 root@gpu.example.com",
                "root_password":"pw"}"#,
        )
        .unwrap();
        assert!(!container.is_running());
        assert_eq!(
            container.ssh_command.as_deref(),
            Some("ssh -p 30022 root@gpu.example.com")
        );
    }

    #[test]
    fn deployment_request_serializes_expected_keys() {
        let request = DeploymentRequest {
            name: "job-1".into(),
            image_uuid: "img-uuid".into(),
            replica_num: 1,
            parallelism_num: 1,
            gpu_name_set: vec!["RTX 4090".into()],
            gpu_num: 1,
            cmd: "jobrig remote-worker abc".into(),
            region_sign: None,
            env: BTreeMap::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["name"], "job-1");
        assert_eq!(value["gpu_name_set"][0], "RTX 4090");
        assert_eq!(value["gpu_num"], 1);
        assert!(value.get("region_sign").is_none());
        assert!(value.get("env").is_none());
    }

    #[test]
    fn blacklist_entry_tolerates_sparse_payload() {
        let entry: BlacklistEntry =
            serde_json::from_str(r#"{"machine_id":"m-9","data_center":"dc-3"}"#).unwrap();
        assert_eq!(entry.machine_id, "m-9");
        assert!(entry.msg.is_empty());
    }
}
