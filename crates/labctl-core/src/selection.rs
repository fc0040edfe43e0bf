//! Node selection: filter a site inventory down to eligible nodes, then draw
//! a uniform random sample of the requested size.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::index;
use thiserror::Error;
use tracing::debug;

use crate::node::{self, NodeError, NodeInfo};

/// Architecture selected when the caller does not ask for another.
pub const DEFAULT_ARCH: &str = "m3";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("not enough eligible nodes: requested {requested}, only {available} available")]
    InsufficientCandidates { requested: usize, available: usize },
    #[error("invalid exclusion entry: {0}")]
    InvalidExclusion(#[from] NodeError),
}

/// What to pick and what to leave out.
#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    pub acceptable_ids: HashSet<u32>,
    /// Raw addresses; only their numeric IDs matter.
    pub excluded: Vec<String>,
    pub total_nodes: usize,
    /// Matched as a substring of the inventory `archi` field.
    pub arch: String,
    /// Appended after sampling, unchecked.
    pub fixed_nodes: Vec<String>,
}

impl SelectionCriteria {
    pub fn new(acceptable_ids: impl IntoIterator<Item = u32>, total_nodes: usize) -> Self {
        Self {
            acceptable_ids: acceptable_ids.into_iter().collect(),
            excluded: Vec::new(),
            total_nodes,
            arch: DEFAULT_ARCH.to_string(),
            fixed_nodes: Vec::new(),
        }
    }

    pub fn with_exclusions(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self
    }

    pub fn with_fixed_nodes(mut self, fixed: Vec<String>) -> Self {
        self.fixed_nodes = fixed;
        self
    }
}

/// Addresses of every inventory entry that passes the filters, in inventory order.
pub fn eligible_candidates<'a>(
    inventory: &'a [NodeInfo],
    criteria: &SelectionCriteria,
) -> Result<Vec<&'a str>, SelectionError> {
    let excluded_ids: HashSet<u32> = node::parse_node_ids(&criteria.excluded)?
        .into_iter()
        .collect();

    let candidates = inventory
        .iter()
        .filter(|item| item.archi.contains(&criteria.arch) && item.state.is_reservable())
        .filter_map(|item| match item.id() {
            Ok(id) => Some((id, item.network_address.as_str())),
            Err(e) => {
                debug!(error = %e, "Skipping inventory entry without a node id");
                None
            }
        })
        .filter(|(id, _)| criteria.acceptable_ids.contains(id) && !excluded_ids.contains(id))
        .map(|(_, address)| address)
        .collect();

    Ok(candidates)
}

/// Pick exactly `criteria.total_nodes` eligible nodes at random, then append
/// any fixed nodes.
pub fn select_candidates<R: Rng + ?Sized>(
    inventory: &[NodeInfo],
    criteria: &SelectionCriteria,
    rng: &mut R,
) -> Result<Vec<String>, SelectionError> {
    let candidates = eligible_candidates(inventory, criteria)?;

    if candidates.len() < criteria.total_nodes {
        return Err(SelectionError::InsufficientCandidates {
            requested: criteria.total_nodes,
            available: candidates.len(),
        });
    }

    let mut selected: Vec<String> = index::sample(rng, candidates.len(), criteria.total_nodes)
        .into_iter()
        .map(|i| candidates[i].to_string())
        .collect();

    selected.extend(criteria.fixed_nodes.iter().cloned());
    Ok(selected)
}
