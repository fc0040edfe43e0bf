//! FIT IoT-LAB REST client.
//!
//! The driver talks to the testbed only through [`TestbedApi`], so the whole
//! pipeline can be exercised against an in-memory double.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use labctl_core::config::LabConfig;
use labctl_core::experiment::{ExperimentId, ExperimentState, SubmitRequest};
use labctl_core::node::{NodeInfo, NodeInventory};
use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Firmware uploads can be slow on a busy frontend.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Operations the batch driver needs from the testbed.
pub trait TestbedApi {
    /// `Ok(false)` when the testbed rejects the credentials.
    fn check_credentials(&self) -> Result<bool>;
    fn site_nodes(&self, site: &str) -> Result<Vec<NodeInfo>>;
    fn submit_experiment(&self, request: &SubmitRequest) -> Result<ExperimentId>;
    fn experiment_state(&self, id: ExperimentId) -> Result<ExperimentState>;
    /// Network addresses reserved by the experiment.
    fn experiment_nodes(&self, id: ExperimentId) -> Result<Vec<String>>;
    fn stop_experiment(&self, id: ExperimentId) -> Result<serde_json::Value>;
    fn flash_firmware(
        &self,
        id: ExperimentId,
        nodes: &[String],
        firmware: &Path,
    ) -> Result<FlashOutcome>;
}

/// Per-node result of a flash request. The testbed keys successes by `"0"`
/// and failures by `"1"`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct FlashOutcome {
    #[serde(rename = "0", default)]
    pub succeeded: Vec<String>,
    #[serde(rename = "1", default)]
    pub failed: Vec<String>,
}

impl FlashOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    state: ExperimentState,
    #[serde(default)]
    nodes: Vec<String>,
}

/// Blocking REST client with HTTP basic auth.
pub struct RestClient {
    http: Client,
    upload: Client,
    base: String,
    user: String,
    password: String,
}

impl RestClient {
    pub fn new(base_url: &str, user: &str, password: &str) -> Result<Self> {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        Ok(Self {
            http: build_client(HTTP_TIMEOUT)?,
            upload: build_client(UPLOAD_TIMEOUT)?,
            base,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_config(config: &LabConfig) -> Result<Self> {
        Self::new(&config.api.url, &config.account.user, &config.account.password)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
    }

    /// Single attempt. A failed read fails the batch.
    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .authed(self.http.get(&url).query(query))
            .send()
            .with_context(|| format!("HTTP request failed: {}", url))?;
        decode(resp, &url)
    }

    fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let resp = self
            .authed(request)
            .send()
            .with_context(|| format!("HTTP request failed: {}", what))?;
        decode(resp, what)
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("labctl/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        anyhow::bail!("HTTP {} for {}: {}", status, what, body.trim());
    }
    resp.json::<T>()
        .with_context(|| format!("Failed to parse JSON from {}", what))
}

fn json_part(name: &str, body: String) -> Result<Part> {
    Part::text(body)
        .file_name(name.to_string())
        .mime_str("application/json")
        .context("Invalid MIME type")
}

impl TestbedApi for RestClient {
    fn check_credentials(&self) -> Result<bool> {
        let url = self.url("user");
        let resp = self
            .authed(self.http.get(&url))
            .send()
            .with_context(|| format!("HTTP request failed: {}", url))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            s => anyhow::bail!("HTTP {} for {}", s, url),
        }
    }

    fn site_nodes(&self, site: &str) -> Result<Vec<NodeInfo>> {
        let inventory: NodeInventory = self.get_json("nodes", &[("site", site)])?;
        debug!(site, nodes = inventory.items.len(), "Fetched node inventory");
        Ok(inventory.items)
    }

    fn submit_experiment(&self, request: &SubmitRequest) -> Result<ExperimentId> {
        let body = serde_json::to_string(request).context("Failed to encode experiment")?;
        let form = Form::new().part("new_exp.json", json_part("new_exp.json", body)?);
        let url = self.url("experiments");
        let resp: SubmitResponse =
            self.send_json(self.http.post(&url).multipart(form), &url)?;
        Ok(ExperimentId(resp.id))
    }

    fn experiment_state(&self, id: ExperimentId) -> Result<ExperimentState> {
        let info: ExperimentInfo = self.get_json(&format!("experiments/{}", id), &[])?;
        Ok(info.state)
    }

    fn experiment_nodes(&self, id: ExperimentId) -> Result<Vec<String>> {
        let info: ExperimentInfo = self.get_json(&format!("experiments/{}", id), &[])?;
        Ok(info.nodes)
    }

    fn stop_experiment(&self, id: ExperimentId) -> Result<serde_json::Value> {
        let url = self.url(&format!("experiments/{}", id));
        self.send_json(self.http.delete(&url), &url)
    }

    fn flash_firmware(
        &self,
        id: ExperimentId,
        nodes: &[String],
        firmware: &Path,
    ) -> Result<FlashOutcome> {
        let name = firmware
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid firmware path: {}", firmware.display()))?
            .to_string();
        let image = std::fs::read(firmware)
            .with_context(|| format!("Failed to read firmware: {}", firmware.display()))?;
        let nodes_json = serde_json::to_string(nodes).context("Failed to encode node list")?;

        let form = Form::new()
            .part("nodes.json", json_part("nodes.json", nodes_json)?)
            .part(name.clone(), Part::bytes(image).file_name(name));

        let url = self.url(&format!("experiments/{}/nodes/flash", id));
        self.send_json(self.upload.post(&url).multipart(form), &url)
    }
}
