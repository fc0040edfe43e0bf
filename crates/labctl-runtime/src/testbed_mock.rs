//! In-memory testbed used by the runtime tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;
use labctl_core::experiment::{ExperimentId, ExperimentState, SubmitRequest};
use labctl_core::node::{NodeInfo, NodeState};

use crate::testbed::{FlashOutcome, TestbedApi};

pub struct MockTestbed {
    pub inventory: Vec<NodeInfo>,
    pub next_id: u64,
    pub credentials_ok: bool,
    /// States handed out by `experiment_state`, in order.
    pub states: RefCell<VecDeque<ExperimentState>>,
    /// Returned once `states` runs dry.
    pub settled_state: ExperimentState,
    reserved: RefCell<Vec<String>>,
    calls: RefCell<Vec<String>>,
}

impl MockTestbed {
    pub fn new(inventory: Vec<NodeInfo>) -> Self {
        Self {
            inventory,
            next_id: 1,
            credentials_ok: true,
            states: RefCell::new(VecDeque::new()),
            settled_state: ExperimentState::Running,
            reserved: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_states(self, states: impl IntoIterator<Item = ExperimentState>) -> Self {
        *self.states.borrow_mut() = states.into_iter().collect();
        self
    }

    pub fn with_reserved(self, nodes: &[&str]) -> Self {
        *self.reserved.borrow_mut() = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

/// Alive m3 nodes on grenoble with the given IDs.
pub fn grenoble_m3(ids: impl IntoIterator<Item = u32>) -> Vec<NodeInfo> {
    ids.into_iter()
        .map(|id| NodeInfo {
            network_address: format!("m3-{}.grenoble.iot-lab.info", id),
            archi: "m3:at86rf231".to_string(),
            state: NodeState::Alive,
        })
        .collect()
}

impl TestbedApi for MockTestbed {
    fn check_credentials(&self) -> Result<bool> {
        self.record("check_credentials".to_string());
        Ok(self.credentials_ok)
    }

    fn site_nodes(&self, site: &str) -> Result<Vec<NodeInfo>> {
        self.record(format!("site_nodes {}", site));
        Ok(self.inventory.clone())
    }

    fn submit_experiment(&self, request: &SubmitRequest) -> Result<ExperimentId> {
        self.record(format!("submit {} {}", request.duration, request.nodes.join(",")));
        *self.reserved.borrow_mut() = request.nodes.clone();
        Ok(ExperimentId(self.next_id))
    }

    fn experiment_state(&self, id: ExperimentId) -> Result<ExperimentState> {
        self.record(format!("state {}", id));
        Ok(self
            .states
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.settled_state))
    }

    fn experiment_nodes(&self, id: ExperimentId) -> Result<Vec<String>> {
        self.record(format!("nodes {}", id));
        Ok(self.reserved.borrow().clone())
    }

    fn stop_experiment(&self, id: ExperimentId) -> Result<serde_json::Value> {
        self.record(format!("stop {}", id));
        Ok(serde_json::json!({ "id": id.0 }))
    }

    fn flash_firmware(
        &self,
        id: ExperimentId,
        nodes: &[String],
        firmware: &Path,
    ) -> Result<FlashOutcome> {
        let image = firmware
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("flash {} {} {}", id, image, nodes.join(",")));
        Ok(FlashOutcome {
            succeeded: nodes.to_vec(),
            failed: Vec::new(),
        })
    }
}
