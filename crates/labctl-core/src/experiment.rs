use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PAN IDs drawn per experiment for the firmware build.
pub const PAN_ID_MIN: u16 = 1;
pub const PAN_ID_MAX: u16 = 200;

/// Experiment ID assigned by the testbed at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(pub u64);

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Experiment state as reported by the testbed scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    Waiting,
    #[serde(rename = "toLaunch")]
    ToLaunch,
    Launching,
    Running,
    Finishing,
    Terminated,
    Stopped,
    Error,
    #[serde(other)]
    Unknown,
}

impl ExperimentState {
    pub fn is_running(self) -> bool {
        self == ExperimentState::Running
    }

    /// States an experiment never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExperimentState::Terminated | ExperimentState::Stopped | ExperimentState::Error
        )
    }
}

/// Where a reservation stands from the driver's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationPhase {
    Submitted,
    Active,
    Terminated,
}

/// A reservation made by this driver.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: ExperimentId,
    pub site: String,
    pub nodes: Vec<String>,
    /// Requested duration in minutes, including the configured extra time.
    pub duration_minutes: u32,
    pub phase: ReservationPhase,
}

impl Reservation {
    pub fn submitted(id: ExperimentId, site: &str, nodes: Vec<String>, duration_minutes: u32) -> Self {
        Self {
            id,
            site: site.to_string(),
            nodes,
            duration_minutes,
            phase: ReservationPhase::Submitted,
        }
    }

    pub fn activate(&mut self) {
        self.phase = ReservationPhase::Active;
    }

    pub fn terminate(&mut self) {
        self.phase = ReservationPhase::Terminated;
    }
}

/// Body of a physical-node experiment submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Minutes.
    pub duration: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub nodes: Vec<String>,
}

impl SubmitRequest {
    pub fn physical(duration: u32, nodes: Vec<String>) -> Self {
        Self {
            name: None,
            duration,
            kind: "physical".to_string(),
            nodes,
        }
    }
}

// ---------------------------------------------------------------------------
// Port mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("port range starting at {base} cannot hold {count} nodes")]
    Overflow { base: u16, count: usize },
}

/// A node reached through a local forwarded port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForward {
    pub node: String,
    pub local_port: u16,
}

/// One local port per node, assigned sequentially from a base port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMapping {
    forwards: Vec<PortForward>,
}

impl PortMapping {
    pub fn assign(nodes: &[String], base: u16) -> Result<Self, PortError> {
        let overflow = || PortError::Overflow {
            base,
            count: nodes.len(),
        };
        let forwards = nodes
            .iter()
            .enumerate()
            .map(|(offset, node)| {
                let offset = u16::try_from(offset).map_err(|_| overflow())?;
                let local_port = base.checked_add(offset).ok_or_else(|| overflow())?;
                Ok(PortForward {
                    node: node.clone(),
                    local_port,
                })
            })
            .collect::<Result<Vec<_>, PortError>>()?;
        Ok(Self { forwards })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PortForward> {
        self.forwards.iter()
    }

    pub fn len(&self) -> usize {
        self.forwards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwards.is_empty()
    }

    pub fn port_for(&self, node: &str) -> Option<u16> {
        self.forwards
            .iter()
            .find(|f| f.node == node)
            .map(|f| f.local_port)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.forwards.iter().map(|f| f.local_port).collect()
    }
}

// ---------------------------------------------------------------------------
// Firmware roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Sink,
    Node,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sink => "sink",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which reserved node gets the sink image and which get the node image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    pub sink: String,
    pub nodes: Vec<String>,
}

impl FlashPlan {
    /// Shuffle the reserved nodes; the first becomes the sink.
    pub fn shuffled<R: Rng + ?Sized>(mut reserved: Vec<String>, rng: &mut R) -> Option<Self> {
        if reserved.is_empty() {
            return None;
        }
        reserved.shuffle(rng);
        let sink = reserved.remove(0);
        Some(Self {
            sink,
            nodes: reserved,
        })
    }
}

pub fn random_pan_id<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    rng.gen_range(PAN_ID_MIN..=PAN_ID_MAX)
}
