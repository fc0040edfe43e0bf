// labctl-core: Pure types, settings, node selection
// No internal labctl dependencies

pub mod config;
pub mod experiment;
pub mod node;
pub mod selection;
