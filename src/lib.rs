//! # labctl: batch experiment driver for the FIT IoT-LAB testbed
//!
//! Facade crate that re-exports the labctl workspace crates so consumers
//! can depend on a single `labctl` library.
//!
//! ## Crate breakdown
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | labctl-core | Settings, node IDs, node selection, reservation and port types |
//! | [`runtime`] | labctl-runtime | Shell and tmux, testbed REST client, firmware, monitor, batch driver |
//! | [`cli`] | labctl-cli | Argument parsing, logging, preflight checks |

pub use labctl_cli as cli;
pub use labctl_core as core;
pub use labctl_runtime as runtime;
