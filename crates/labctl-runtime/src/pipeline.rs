//! Batch driver: runs each labelled experiment through the full
//! reserve, bridge, build, flash, run, and tear-down sequence.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use labctl_core::config::LabConfig;
use labctl_core::experiment::{self, ExperimentId, Role};
use rand::rngs::StdRng;
use tracing::info;

use crate::bridge;
use crate::firmware::{self, FirmwareStage};
use crate::monitor;
use crate::reservation::{self, LaunchRequest};
use crate::supervisor::Supervisor;
use crate::testbed::TestbedApi;
use crate::wait::Pause;

/// Coarse position of the driver in an experiment's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Reserving,
    Active,
    Flashing,
    Running,
    Finishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Launch,
    Settle,
    OpenTunnel,
    AwaitTunnel,
    OpenPseudoTtys,
    AwaitPseudoTtys,
    RemoveStaleArtifacts,
    StartMonitor,
    BuildNodeFirmware,
    BuildSinkFirmware,
    AwaitMonitor,
    Flash,
    RunExperiment,
    StopMonitor,
    KillAllSessions,
    Abort,
    ArchiveLogs,
    Cooldown,
}

impl Step {
    /// Every step, in the order one experiment goes through them.
    pub const SEQUENCE: [Step; 18] = [
        Step::Launch,
        Step::Settle,
        Step::OpenTunnel,
        Step::AwaitTunnel,
        Step::OpenPseudoTtys,
        Step::AwaitPseudoTtys,
        Step::RemoveStaleArtifacts,
        Step::StartMonitor,
        Step::BuildNodeFirmware,
        Step::BuildSinkFirmware,
        Step::AwaitMonitor,
        Step::Flash,
        Step::RunExperiment,
        Step::StopMonitor,
        Step::KillAllSessions,
        Step::Abort,
        Step::ArchiveLogs,
        Step::Cooldown,
    ];

    pub fn stage(self) -> Stage {
        match self {
            Step::Launch => Stage::Reserving,
            Step::Settle
            | Step::OpenTunnel
            | Step::AwaitTunnel
            | Step::OpenPseudoTtys
            | Step::AwaitPseudoTtys => Stage::Active,
            Step::RemoveStaleArtifacts
            | Step::StartMonitor
            | Step::BuildNodeFirmware
            | Step::BuildSinkFirmware
            | Step::AwaitMonitor
            | Step::Flash => Stage::Flashing,
            Step::RunExperiment => Stage::Running,
            Step::StopMonitor
            | Step::KillAllSessions
            | Step::Abort
            | Step::ArchiveLogs
            | Step::Cooldown => Stage::Finishing,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::Launch => "Reserve nodes",
            Step::Settle => "Let nodes settle",
            Step::OpenTunnel => "Open ssh tunnel",
            Step::AwaitTunnel => "Wait for tunnel",
            Step::OpenPseudoTtys => "Open pseudo ttys",
            Step::AwaitPseudoTtys => "Wait for pseudo ttys",
            Step::RemoveStaleArtifacts => "Remove old firmware",
            Step::StartMonitor => "Start OpenVisualizer",
            Step::BuildNodeFirmware => "Build node firmware",
            Step::BuildSinkFirmware => "Build sink firmware",
            Step::AwaitMonitor => "Wait for OpenVisualizer",
            Step::Flash => "Flash firmware",
            Step::RunExperiment => "Run experiment",
            Step::StopMonitor => "Stop OpenVisualizer",
            Step::KillAllSessions => "Kill tmux sessions",
            Step::Abort => "Stop experiment",
            Step::ArchiveLogs => "Archive logs",
            Step::Cooldown => "Cool down",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One invocation's worth of experiments.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Experiment labels, run in order.
    pub labels: Vec<String>,
    /// Minutes each experiment runs for.
    pub duration_minutes: u32,
    pub node_count: usize,
    pub corridor: String,
    pub site: String,
    pub include_fixed_nodes: bool,
}

/// Everything the driver borrows from its caller.
#[derive(Clone, Copy)]
pub struct BatchContext<'a> {
    pub api: &'a dyn TestbedApi,
    pub config: &'a LabConfig,
    pub pause: &'a dyn Pause,
}

pub type Timestamp = DateTime<Local>;

#[derive(Debug, Clone)]
pub struct ExperimentRecord {
    pub label: String,
    pub experiment_id: ExperimentId,
    pub pan_id: u16,
    pub sink: String,
    pub nodes: Vec<String>,
    pub archive: PathBuf,
    pub steps: Vec<Step>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub experiments: Vec<ExperimentRecord>,
}

pub struct BatchDriver<'a> {
    ctx: BatchContext<'a>,
    rng: StdRng,
    supervisor: Supervisor,
    stage: Stage,
    steps: Vec<Step>,
}

impl<'a> BatchDriver<'a> {
    pub fn new(ctx: BatchContext<'a>, rng: StdRng) -> Self {
        let supervisor = Supervisor::new(&ctx.config.workspace.tmux_helper);
        Self {
            ctx,
            rng,
            supervisor,
            stage: Stage::Idle,
            steps: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Steps entered for the current (or last) experiment.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every labelled experiment in order. The first failure ends the batch.
    pub fn run(&mut self, request: &BatchRequest) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let total = request.labels.len();

        for (index, label) in request.labels.iter().enumerate() {
            info!(
                experiment = %label,
                index = index + 1,
                total,
                "Starting batch experiment"
            );
            let record = self.run_one(label, request).with_context(|| {
                format!(
                    "Experiment '{}' failed at step '{}'",
                    label,
                    self.current_step()
                )
            })?;
            report.experiments.push(record);
        }

        Ok(report)
    }

    fn current_step(&self) -> String {
        self.steps
            .last()
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| "start".to_string())
    }

    fn enter(&mut self, step: Step) {
        let stage = step.stage();
        if stage != self.stage {
            info!(from = ?self.stage, to = ?stage, "Stage change");
            self.stage = stage;
        }
        self.steps.push(step);
        info!("********************* {} *********************", step);
    }

    fn run_one(&mut self, label: &str, request: &BatchRequest) -> Result<ExperimentRecord> {
        let BatchContext { api, config, pause } = self.ctx;
        let timing = &config.experiment;
        let started_at = Local::now();
        self.steps.clear();

        let pan_id = experiment::random_pan_id(&mut self.rng);
        info!(experiment = %label, pan_id, "Experiment parameters");

        self.enter(Step::Launch);
        let launch = LaunchRequest {
            site: &request.site,
            corridor: &request.corridor,
            node_count: request.node_count,
            duration_minutes: request.duration_minutes,
            include_fixed_nodes: request.include_fixed_nodes,
        };
        let mut reservation = reservation::launch(api, config, &launch, pause, &mut self.rng)?;

        self.enter(Step::Settle);
        pause.pause(timing.step_delay());

        self.enter(Step::OpenTunnel);
        let mapping = bridge::open_ssh_tunnel(
            api,
            config,
            &mut self.supervisor,
            reservation.id,
            &request.site,
        )?;

        self.enter(Step::AwaitTunnel);
        bridge::await_tunnel(&mapping, timing.step_delay(), pause);

        self.enter(Step::OpenPseudoTtys);
        let links = bridge::open_pseudo_ttys(&mut self.supervisor, &mapping, pause)?;

        self.enter(Step::AwaitPseudoTtys);
        bridge::await_pseudo_ttys(&links, timing.step_delay(), pause);

        let stage = FirmwareStage::new(&config.workspace.firmware_dir);
        self.enter(Step::RemoveStaleArtifacts);
        stage.remove_stale_artifacts()?;

        self.enter(Step::StartMonitor);
        monitor::start_monitor(&mut self.supervisor, &config.monitor)?;

        self.enter(Step::BuildNodeFirmware);
        let script =
            firmware::render_build_command(config.build.template_for(Role::Node), pan_id, label)?;
        stage.build(&config.firmware, &script, Role::Node)?;

        self.enter(Step::BuildSinkFirmware);
        let script =
            firmware::render_build_command(config.build.template_for(Role::Sink), pan_id, label)?;
        stage.build(&config.firmware, &script, Role::Sink)?;

        self.enter(Step::AwaitMonitor);
        monitor::await_monitor(&config.monitor, timing.monitor_delay(), pause);

        self.enter(Step::Flash);
        let plan = firmware::flash(api, &stage, reservation.id, &mut self.rng)?;

        self.enter(Step::RunExperiment);
        self.supervisor.report("experiment start");
        pause.pause(Duration::from_secs(u64::from(request.duration_minutes) * 60));
        self.supervisor.report("experiment end");

        self.enter(Step::StopMonitor);
        monitor::stop_monitor(&self.supervisor)?;

        self.enter(Step::KillAllSessions);
        self.supervisor.shutdown()?;

        self.enter(Step::Abort);
        reservation::abort(api, &mut reservation)?;

        self.enter(Step::ArchiveLogs);
        let archive = monitor::archive_logs(&config.monitor.sw_log_path, label)?;

        self.enter(Step::Cooldown);
        pause.pause(timing.monitor_delay());

        self.stage = Stage::Idle;
        info!(experiment = %label, "Experiment complete");

        Ok(ExperimentRecord {
            label: label.to_string(),
            experiment_id: reservation.id,
            pan_id,
            sink: plan.sink,
            nodes: plan.nodes,
            archive,
            steps: self.steps.clone(),
            started_at,
            finished_at: Local::now(),
        })
    }
}
