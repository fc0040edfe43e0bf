//! Checks run once before any testbed work starts.

use anyhow::{Context, Result};
use labctl_core::config::LabConfig;
use labctl_runtime::testbed::TestbedApi;
use tracing::info;

/// Host tools the driver shells out to.
pub const REQUIRED_TOOLS: &[&str] = &["bash", "ssh", "tmux", "socat"];

pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|t| which::which(t).is_err())
        .map(|t| t.to_string())
        .collect()
}

/// Tools on `PATH` and the tmux helper script in place.
pub fn check_host(config: &LabConfig) -> Result<()> {
    let missing = missing_tools(REQUIRED_TOOLS);
    if !missing.is_empty() {
        anyhow::bail!("Required tools not found on PATH: {}", missing.join(", "));
    }

    let helper = &config.workspace.tmux_helper;
    if !helper.is_file() {
        anyhow::bail!("tmux helper script not found: {}", helper.display());
    }
    Ok(())
}

pub fn check_credentials(api: &dyn TestbedApi) -> Result<()> {
    let valid = api
        .check_credentials()
        .context("Failed to verify IoT-LAB credentials")?;
    if !valid {
        anyhow::bail!("Invalid IoT-LAB credentials");
    }
    info!("IoT-LAB credentials accepted");
    Ok(())
}
