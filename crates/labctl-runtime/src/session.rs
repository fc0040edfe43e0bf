//! tmux session plumbing. Background processes (tunnel, serial bridges,
//! monitor) each run inside a named session opened by the helper script.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::shell;

/// Type `command` into the named session, creating it if needed.
pub fn open_session(helper: &Path, name: &str, command: &str) -> Result<()> {
    let helper = helper
        .to_str()
        .with_context(|| format!("tmux helper path is not valid UTF-8: {}", helper.display()))?;
    shell::run_host_checked(helper, &[name, command])?;
    debug!(session = name, command, "Command sent to tmux session");
    Ok(())
}

pub fn session_alive(name: &str) -> bool {
    shell::succeeds("tmux", &["has-session", "-t", name])
}

/// Stop the tmux server, and with it every session. No server is not an error.
pub fn kill_all_sessions() -> Result<()> {
    let output = shell::run_host("tmux", &["kill-server"])?;
    if !output.status.success() {
        debug!("No tmux server was running");
    }
    Ok(())
}
