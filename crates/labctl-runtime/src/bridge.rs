//! Serial bridge from the testbed to local pseudo-terminals.
//!
//! One ssh session forwards a local TCP port to each reserved node's serial
//! port; one socat session per node turns that port into
//! `/dev/ttyUSB-pseudo-<n>` for the monitor to open.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use labctl_core::config::LabConfig;
use labctl_core::experiment::{ExperimentId, PortMapping};
use labctl_core::node;
use tracing::info;

use crate::supervisor::Supervisor;
use crate::testbed::TestbedApi;
use crate::wait::{self, PROBE_INTERVAL, Pause};

pub const TUNNEL_SESSION: &str = "ssh_forward";
pub const TESTBED_DOMAIN: &str = "iot-lab.info";
pub const PSEUDO_TTY_PREFIX: &str = "/dev/ttyUSB-pseudo-";
/// Gap between socat launches; sudo prompts and the tunnel need the breathing room.
pub const PSEUDO_TTY_STAGGER: Duration = Duration::from_secs(1);

pub fn pseudo_tty_path(index: usize) -> PathBuf {
    PathBuf::from(format!("{}{}", PSEUDO_TTY_PREFIX, index))
}

/// `ssh -T user@site.iot-lab.info -L <local>:<node>:<listening> ...`
pub fn ssh_forward_command(
    user: &str,
    site: &str,
    mapping: &PortMapping,
    listening_port: u16,
) -> String {
    let forwards: String = mapping
        .iter()
        .map(|f| format!(" -L {}:{}:{}", f.local_port, f.node, listening_port))
        .collect();
    format!("ssh -T {}@{}.{}{}", user, site, TESTBED_DOMAIN, forwards)
}

pub fn socat_command(local_port: u16, link: &Path) -> String {
    format!(
        "sudo socat TCP4:localhost:{} pty,link={},raw",
        local_port,
        link.display()
    )
}

/// Forward one local port per reserved node through the site frontend.
pub fn open_ssh_tunnel(
    api: &dyn TestbedApi,
    config: &LabConfig,
    supervisor: &mut Supervisor,
    id: ExperimentId,
    site: &str,
) -> Result<PortMapping> {
    info!("Creating tunnel to IoT-LAB");
    let nodes = api
        .experiment_nodes(id)
        .with_context(|| format!("Failed to list nodes of experiment {}", id))?;
    let site_cfg = config.site(site)?;
    let mapping = PortMapping::assign(&nodes, config.starting_port.port)?;

    for forward in mapping.iter() {
        info!(node = %forward.node, port = forward.local_port, "Forwarding");
    }

    let command = ssh_forward_command(
        &config.account.user,
        site,
        &mapping,
        site_cfg.listening_port,
    );
    supervisor.launch(TUNNEL_SESSION, "ssh tunnel", &command)?;
    Ok(mapping)
}

/// Start a socat bridge per forwarded port, each in a session named after
/// the node's host label. Returns the pseudo-tty links in mapping order.
pub fn open_pseudo_ttys(
    supervisor: &mut Supervisor,
    mapping: &PortMapping,
    pause: &dyn Pause,
) -> Result<Vec<PathBuf>> {
    info!("Creating pseudo ports");
    let mut links = Vec::with_capacity(mapping.len());
    for (index, forward) in mapping.iter().enumerate() {
        if index > 0 {
            pause.pause(PSEUDO_TTY_STAGGER);
        }
        let link = pseudo_tty_path(index);
        supervisor.launch(
            node::host_label(&forward.node),
            "serial bridge",
            &socat_command(forward.local_port, &link),
        )?;
        links.push(link);
    }
    Ok(links)
}

/// Wait for every forwarded port to accept connections.
pub fn await_tunnel(mapping: &PortMapping, timeout: Duration, pause: &dyn Pause) -> bool {
    wait::wait_until("ssh tunnel", timeout, PROBE_INTERVAL, pause, || {
        mapping.iter().all(|f| wait::port_open(f.local_port))
    })
}

/// Wait for every pseudo-tty link to appear.
pub fn await_pseudo_ttys(links: &[PathBuf], timeout: Duration, pause: &dyn Pause) -> bool {
    wait::wait_until("pseudo ttys", timeout, PROBE_INTERVAL, pause, || {
        links.iter().all(|l| l.exists())
    })
}
