use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Digits after the last `-` of the host label, e.g. `m3-12.grenoble...` → 12.
static NODE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^.]*-(\d+)\.").expect("node id pattern is valid"));

/// Bracketed range tokens in a corridor value, e.g. `[1-10][20-30]`.
static RANGE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]").expect("range token pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("cannot extract a node id from '{0}'")]
    InvalidAddress(String),
    #[error("invalid node id range '{0}' (expected start-end)")]
    InvalidRange(String),
}

/// Reported node health on the testbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Alive,
    Busy,
    Suspected,
    Absent,
    Dead,
    #[serde(other)]
    Unknown,
}

impl NodeState {
    /// Busy and Suspected nodes are never offered for reservation.
    pub fn is_reservable(self) -> bool {
        !matches!(self, NodeState::Busy | NodeState::Suspected)
    }
}

/// One entry of a site's node inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub network_address: String,
    pub archi: String,
    pub state: NodeState,
}

impl NodeInfo {
    pub fn id(&self) -> Result<u32, NodeError> {
        extract_node_id(&self.network_address)
    }
}

/// Envelope the inventory endpoint wraps its node list in.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInventory {
    pub items: Vec<NodeInfo>,
}

/// Extract the numeric node ID from a network address.
pub fn extract_node_id(address: &str) -> Result<u32, NodeError> {
    NODE_ID_RE
        .captures(address)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| NodeError::InvalidAddress(address.to_string()))
}

/// First DNS label of an address (`m3-12.grenoble.iot-lab.info` → `m3-12`).
pub fn host_label(address: &str) -> &str {
    address.split('.').next().unwrap_or(address)
}

/// Extract IDs for every address in `addresses`.
pub fn parse_node_ids(addresses: &[String]) -> Result<Vec<u32>, NodeError> {
    addresses.iter().map(|a| extract_node_id(a)).collect()
}

/// The raw `start-end` text of every bracketed token.
pub fn range_tokens(text: &str) -> Vec<&str> {
    RANGE_TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Expand every `[start-end]` token into the IDs it covers, inclusive.
///
/// Tokens are concatenated in order with no de-duplication. A token whose end
/// is below its start contributes nothing.
pub fn expand_id_ranges(text: &str) -> Result<Vec<u32>, NodeError> {
    let mut ids = Vec::new();
    for token in range_tokens(text) {
        let (start, end) = parse_range(token)?;
        ids.extend(start..=end);
    }
    Ok(ids)
}

fn parse_range(token: &str) -> Result<(u32, u32), NodeError> {
    let invalid = || NodeError::InvalidRange(token.to_string());
    let (start, end) = token.split_once('-').ok_or_else(invalid)?;
    let start = start.trim().parse().map_err(|_| invalid())?;
    let end = end.trim().parse().map_err(|_| invalid())?;
    Ok((start, end))
}
