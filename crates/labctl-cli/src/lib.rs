// labctl-cli: Clap arguments, logging, preflight checks, UI
// Depends on labctl-core, labctl-runtime

pub mod commands;
pub mod logging;
pub mod preflight;
pub mod ui;

pub use commands::run;
