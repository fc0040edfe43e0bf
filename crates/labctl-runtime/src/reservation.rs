//! Experiment lifecycle: pick nodes, submit, wait for the scheduler, stop.

use std::time::Duration;

use anyhow::{Context, Result};
use labctl_core::config::LabConfig;
use labctl_core::experiment::{ExperimentId, Reservation, SubmitRequest};
use labctl_core::selection::{self, SelectionCriteria};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::testbed::TestbedApi;
use crate::wait::Pause;

/// What to reserve.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub site: &'a str,
    pub corridor: &'a str,
    pub node_count: usize,
    /// Experiment runtime in minutes, before the configured extra time.
    pub duration_minutes: u32,
    pub include_fixed_nodes: bool,
}

/// Select nodes, submit the experiment, and block until it is running.
pub fn launch<R: Rng + ?Sized>(
    api: &dyn TestbedApi,
    config: &LabConfig,
    request: &LaunchRequest<'_>,
    pause: &dyn Pause,
    rng: &mut R,
) -> Result<Reservation> {
    let site = config.site(request.site)?;
    let ids = site.corridor_ids(request.site, request.corridor)?;

    let inventory = api
        .site_nodes(request.site)
        .with_context(|| format!("Failed to fetch node inventory for {}", request.site))?;

    let mut criteria =
        SelectionCriteria::new(ids, request.node_count).with_exclusions(site.excluded());
    if request.include_fixed_nodes {
        criteria = criteria.with_fixed_nodes(site.fixed());
    }
    let nodes = selection::select_candidates(&inventory, &criteria, rng)?;

    let duration = request
        .duration_minutes
        .checked_add(config.experiment.extra_time)
        .with_context(|| {
            format!(
                "Experiment time {} min plus extra time {} min is out of range",
                request.duration_minutes, config.experiment.extra_time
            )
        })?;
    let id = api
        .submit_experiment(&SubmitRequest::physical(duration, nodes.clone()))
        .context("Failed to submit experiment")?;
    info!(experiment_id = %id, duration_min = duration, "Starting new experiment");
    info!("Selected nodes: {}", nodes.join(" "));

    let mut reservation = Reservation::submitted(id, request.site, nodes, duration);
    wait_until_running(
        api,
        id,
        config.experiment.reservation_timeout(),
        config.experiment.poll_interval(),
        pause,
    )?;
    reservation.activate();
    Ok(reservation)
}

/// Poll the scheduler until the experiment is running.
///
/// Fails if it reaches a terminal state first. With a `timeout`, also fails
/// once it runs out, after asking the testbed to stop the reservation.
pub fn wait_until_running(
    api: &dyn TestbedApi,
    id: ExperimentId,
    timeout: Option<Duration>,
    interval: Duration,
    pause: &dyn Pause,
) -> Result<()> {
    info!(experiment_id = %id, "Waiting for experiment to start");
    let step = interval.max(Duration::from_millis(100));
    let mut waited = Duration::ZERO;

    loop {
        let state = api.experiment_state(id)?;
        debug!(experiment_id = %id, ?state, "Polled experiment state");

        if state.is_running() {
            info!(experiment_id = %id, "Experiment is running");
            return Ok(());
        }
        if state.is_terminal() {
            anyhow::bail!("Experiment {} ended in state {:?} before running", id, state);
        }
        if let Some(limit) = timeout.filter(|limit| waited >= *limit) {
            if let Err(e) = api.stop_experiment(id) {
                warn!(experiment_id = %id, "Failed to stop timed-out experiment: {:#}", e);
            }
            anyhow::bail!(
                "Experiment {} still {:?} after {}s",
                id,
                state,
                limit.as_secs()
            );
        }
        pause.pause(step);
        waited += step;
    }
}

/// Stop the experiment and release its nodes.
pub fn abort(api: &dyn TestbedApi, reservation: &mut Reservation) -> Result<()> {
    info!(experiment_id = %reservation.id, "Stopping experiment");
    let response = api
        .stop_experiment(reservation.id)
        .with_context(|| format!("Failed to stop experiment {}", reservation.id))?;
    debug!(%response, "Stop acknowledged");
    reservation.terminate();
    Ok(())
}
