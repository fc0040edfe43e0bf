//! Build and flash the OpenWSN images.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use labctl_core::config::FirmwareSource;
use labctl_core::experiment::{ExperimentId, FlashPlan, Role};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::shell;
use crate::testbed::TestbedApi;

/// Every image is pushed this many times. A single push has been seen to
/// leave nodes on their previous image.
pub const FLASH_PASSES: usize = 2;

/// Named build slots, in the order positional `{}` slots are filled.
const BUILD_SLOTS: [&str; 2] = ["{{ pan_id }}", "{{ experiment }}"];

/// Fill the PAN ID and experiment label into a build command template.
///
/// Takes either `{{ pan_id }}` / `{{ experiment }}` or up to two positional
/// `{}` slots, filled in that order.
pub fn render_build_command(template: &str, pan_id: u16, experiment: &str) -> Result<String> {
    let named = named_slots(template)?;
    let mut ctx = tera::Context::new();
    ctx.insert("pan_id", &pan_id);
    ctx.insert("experiment", experiment);
    tera::Tera::one_off(&named, &ctx, false)
        .map_err(|e| anyhow::anyhow!("Failed to render build command '{}': {}", template, e))
}

fn named_slots(template: &str) -> Result<String> {
    let mut pieces = template.split("{}");
    let mut named = pieces.next().unwrap_or_default().to_string();
    for (i, piece) in pieces.enumerate() {
        let slot = BUILD_SLOTS.get(i).with_context(|| {
            format!(
                "Build command '{}' has more than {} '{{}}' slots",
                template,
                BUILD_SLOTS.len()
            )
        })?;
        named.push_str(slot);
        named.push_str(piece);
    }
    Ok(named)
}

/// Local directory holding the built `sink` and `node` images.
#[derive(Debug, Clone)]
pub struct FirmwareStage {
    dir: PathBuf,
}

impl FirmwareStage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn artifact(&self, role: Role) -> PathBuf {
        self.dir.join(role.as_str())
    }

    /// Delete images left by a previous experiment. Missing files are fine.
    pub fn remove_stale_artifacts(&self) -> Result<()> {
        for role in [Role::Sink, Role::Node] {
            let path = self.artifact(role);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale firmware"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }

    /// Run `script` in the firmware tree and stage the result as `role`.
    ///
    /// A failing build is logged and the run goes on: the flash step then
    /// pushes whatever image the build left behind.
    pub fn build(&self, source: &FirmwareSource, script: &str, role: Role) -> Result<PathBuf> {
        info!(%role, "Building firmware");
        let output = shell::run_script_in(&source.fw_path, script)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                %role,
                exit_code = output.status.code().unwrap_or(-1),
                stderr = %tail(&stderr, 20),
                "Firmware build failed"
            );
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let dest = self.artifact(role);
        if let Err(e) = fs::copy(&source.fw_firmware_path, &dest) {
            warn!(
                %role,
                from = %source.fw_firmware_path.display(),
                error = %e,
                "Could not stage firmware image"
            );
        }
        Ok(dest)
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Shuffle the reserved nodes, pick the sink, and push both images.
/// Regular nodes are flashed before the sink.
pub fn flash<R: Rng + ?Sized>(
    api: &dyn TestbedApi,
    stage: &FirmwareStage,
    id: ExperimentId,
    rng: &mut R,
) -> Result<FlashPlan> {
    let reserved = api
        .experiment_nodes(id)
        .with_context(|| format!("Failed to list nodes of experiment {}", id))?;
    let plan = FlashPlan::shuffled(reserved, rng)
        .with_context(|| format!("Experiment {} has no reserved nodes", id))?;
    info!("Sink: {}", plan.sink);
    info!("Nodes: {}", plan.nodes.join(" "));

    if plan.nodes.is_empty() {
        info!("No regular nodes to flash");
    } else {
        info!("Flashing nodes");
        push(api, id, &plan.nodes, &stage.artifact(Role::Node))?;
    }

    info!("Flashing sink");
    push(api, id, std::slice::from_ref(&plan.sink), &stage.artifact(Role::Sink))?;

    Ok(plan)
}

fn push(api: &dyn TestbedApi, id: ExperimentId, targets: &[String], image: &Path) -> Result<()> {
    for pass in 1..=FLASH_PASSES {
        let outcome = api
            .flash_firmware(id, targets, image)
            .with_context(|| format!("Failed to flash {}", image.display()))?;
        if !outcome.all_succeeded() {
            warn!(
                pass,
                failed = %outcome.failed.join(" "),
                "Some nodes did not accept the firmware"
            );
        }
    }
    Ok(())
}
