use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use crate::session;

/// A background session the driver started and keeps an eye on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedSession {
    pub name: String,
    pub purpose: String,
}

/// Tracks the tmux sessions launched for the current experiment so that a
/// tunnel or bridge dying in the background shows up in the log.
#[derive(Debug)]
pub struct Supervisor {
    helper: PathBuf,
    sessions: Vec<SupervisedSession>,
}

impl Supervisor {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
            sessions: Vec::new(),
        }
    }

    pub fn helper(&self) -> &Path {
        &self.helper
    }

    pub fn sessions(&self) -> &[SupervisedSession] {
        &self.sessions
    }

    /// Start `command` in session `name` and begin watching it.
    pub fn launch(&mut self, name: &str, purpose: &str, command: &str) -> Result<()> {
        session::open_session(&self.helper, name, command)?;
        if !self.sessions.iter().any(|s| s.name == name) {
            self.sessions.push(SupervisedSession {
                name: name.to_string(),
                purpose: purpose.to_string(),
            });
        }
        Ok(())
    }

    /// Type into an existing session without registering it again.
    pub fn send(&self, name: &str, command: &str) -> Result<()> {
        session::open_session(&self.helper, name, command)
    }

    pub fn dead_sessions(&self) -> Vec<&SupervisedSession> {
        self.sessions
            .iter()
            .filter(|s| !session::session_alive(&s.name))
            .collect()
    }

    /// Log every session that is gone. Returns how many were.
    pub fn report(&self, checkpoint: &str) -> usize {
        let dead = self.dead_sessions();
        for s in &dead {
            warn!(
                session = %s.name,
                purpose = %s.purpose,
                checkpoint,
                "Background session is no longer running"
            );
        }
        if dead.is_empty() {
            info!(
                checkpoint,
                sessions = self.sessions.len(),
                "All background sessions alive"
            );
        }
        dead.len()
    }

    /// Kill every session and forget them.
    pub fn shutdown(&mut self) -> Result<()> {
        info!("Killing tmux sessions");
        session::kill_all_sessions()?;
        self.sessions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell_mock::{self, MockResponse};

    #[test]
    fn test_launch_registers_each_session_once() {
        let (_guard, log) = shell_mock::mock_shell().install();
        let mut sup = Supervisor::new("helper.sh");
        sup.launch("ssh_forward", "ssh tunnel", "ssh -T x").unwrap();
        sup.launch("ssh_forward", "ssh tunnel", "ssh -T y").unwrap();
        sup.launch("m3-1", "serial bridge", "socat").unwrap();

        assert_eq!(sup.sessions().len(), 2);
        assert_eq!(shell_mock::commands(&log).len(), 3);
    }

    #[test]
    fn test_report_counts_dead_sessions() {
        let (_guard, _log) = shell_mock::mock_shell()
            .respond("has-session -t m3-2", MockResponse::fail(1))
            .install();
        let mut sup = Supervisor::new("helper.sh");
        sup.launch("m3-1", "serial bridge", "socat a").unwrap();
        sup.launch("m3-2", "serial bridge", "socat b").unwrap();

        let dead = sup.dead_sessions();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].name, "m3-2");
        assert_eq!(sup.report("test"), 1);
    }

    #[test]
    fn test_send_does_not_register() {
        let (_guard, _log) = shell_mock::mock_shell().install();
        let sup = Supervisor::new("helper.sh");
        sup.send("OpenVisualizer", "quit").unwrap();
        assert!(sup.sessions().is_empty());
    }

    #[test]
    fn test_shutdown_forgets_sessions() {
        let (_guard, log) = shell_mock::mock_shell().install();
        let mut sup = Supervisor::new("helper.sh");
        sup.launch("m3-1", "serial bridge", "socat").unwrap();
        sup.shutdown().unwrap();
        assert!(sup.sessions().is_empty());
        assert!(shell_mock::commands(&log).contains(&"tmux kill-server".to_string()));
    }
}
