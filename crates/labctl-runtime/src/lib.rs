// labctl-runtime: Shell execution, tmux sessions, testbed API, batch driver
// Depends on labctl-core

pub mod bridge;
pub mod firmware;
pub mod monitor;
pub mod pipeline;
pub mod reservation;
pub mod session;
pub mod shell;
#[cfg(test)]
pub mod shell_mock;
pub mod supervisor;
pub mod testbed;
#[cfg(test)]
pub mod testbed_mock;
pub mod wait;
