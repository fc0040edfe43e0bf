use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::error;

use crate::logging;
use crate::preflight;
use crate::ui;

use labctl_core::config::{self, LabConfig};
use labctl_runtime::pipeline::{BatchContext, BatchDriver, BatchRequest};
use labctl_runtime::testbed::RestClient;
use labctl_runtime::wait::ThreadPause;

#[derive(Parser, Debug)]
#[command(
    name = "labctl",
    version,
    about = "Run batches of OpenWSN experiments on the FIT IoT-LAB testbed"
)]
struct Cli {
    /// Comma-separated experiment labels, run in order
    #[arg(long)]
    experiments: String,

    /// Minutes each experiment runs for
    #[arg(long, alias = "experiment_time")]
    experiment_time: u32,

    /// Nodes to reserve per experiment
    #[arg(long, alias = "number_of_nodes", value_parser = clap::value_parser!(u32).range(1..))]
    number_of_nodes: u32,

    /// Corridor of the site to pick nodes from
    #[arg(long, value_enum)]
    corridor: Corridor,

    /// Testbed site
    #[arg(long, value_enum)]
    site: Site,

    /// Settings file
    #[arg(long, default_value = config::DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Log file (rotated)
    #[arg(long, alias = "log_file", default_value = "experiment.log")]
    log_file: PathBuf,

    /// Also reserve the site's fixed_nodes
    #[arg(long, alias = "fixed_nodes")]
    fixed_nodes: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Corridor {
    A,
    B,
    C,
    D,
}

impl Corridor {
    fn as_str(self) -> &'static str {
        match self {
            Corridor::A => "a",
            Corridor::B => "b",
            Corridor::C => "c",
            Corridor::D => "d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Site {
    Grenoble,
}

impl Site {
    fn as_str(self) -> &'static str {
        match self {
            Site::Grenoble => "grenoble",
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log_file)?;

    let result = execute(&cli);
    if let Err(ref e) = result {
        error!("{:#}", e);
        ui::error(&format!("{:#}", e));
    }
    result
}

fn execute(cli: &Cli) -> Result<()> {
    let labels = parse_labels(&cli.experiments)?;
    let site = cli.site.as_str();
    let corridor = cli.corridor.as_str();

    let config = LabConfig::load(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    config.require_site(site, corridor)?;

    preflight::check_host(&config)?;
    let client = RestClient::from_config(&config)?;
    preflight::check_credentials(&client)?;

    let headline = format!("labctl: {} experiment(s) on {}", labels.len(), site);
    let detail = format!(
        "{} node(s), corridor {}, {} min each",
        cli.number_of_nodes, corridor, cli.experiment_time
    );
    ui::banner(&[headline.as_str(), detail.as_str()]);

    let pause = ThreadPause;
    let ctx = BatchContext {
        api: &client,
        config: &config,
        pause: &pause,
    };
    let mut driver = BatchDriver::new(ctx, StdRng::from_entropy());
    let report = driver.run(&BatchRequest {
        labels,
        duration_minutes: cli.experiment_time,
        node_count: cli.number_of_nodes as usize,
        corridor: corridor.to_string(),
        site: site.to_string(),
        include_fixed_nodes: cli.fixed_nodes,
    })?;

    ui::summary(&report);
    Ok(())
}

/// Split `--experiments` into labels. Blank entries are dropped.
fn parse_labels(raw: &str) -> Result<Vec<String>> {
    let labels = config::split_list(raw);
    if labels.is_empty() {
        anyhow::bail!("--experiments needs at least one label");
    }
    if let Some(bad) = labels.iter().find(|l| l.contains('/')) {
        anyhow::bail!("Experiment label '{}' must not contain '/'", bad);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 10] = [
        "labctl",
        "--experiments",
        "a,b",
        "--experiment-time",
        "30",
        "--number-of-nodes",
        "5",
        "--corridor",
        "c",
        "--site=grenoble",
    ];

    #[test]
    fn test_parse_required_args_with_defaults() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        assert_eq!(cli.experiments, "a,b");
        assert_eq!(cli.experiment_time, 30);
        assert_eq!(cli.number_of_nodes, 5);
        assert_eq!(cli.corridor, Corridor::C);
        assert_eq!(cli.site, Site::Grenoble);
        assert_eq!(cli.config, PathBuf::from("settings.toml"));
        assert_eq!(cli.log_file, PathBuf::from("experiment.log"));
        assert!(!cli.fixed_nodes);
    }

    #[test]
    fn test_underscore_aliases() {
        let cli = Cli::try_parse_from([
            "labctl",
            "--experiments",
            "x",
            "--experiment_time",
            "10",
            "--number_of_nodes",
            "2",
            "--corridor",
            "a",
            "--site",
            "grenoble",
            "--fixed_nodes",
        ])
        .unwrap();
        assert_eq!(cli.experiment_time, 10);
        assert_eq!(cli.number_of_nodes, 2);
        assert!(cli.fixed_nodes);
    }

    #[test]
    fn test_rejects_unknown_corridor_and_site() {
        let mut args = REQUIRED.to_vec();
        args[8] = "e";
        assert!(Cli::try_parse_from(args).is_err());

        let mut args = REQUIRED.to_vec();
        args[9] = "--site=lille";
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_rejects_zero_nodes() {
        let mut args = REQUIRED.to_vec();
        args[6] = "0";
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!(parse_labels("a, b,,c").unwrap(), vec!["a", "b", "c"]);
        assert!(parse_labels(" , ").is_err());
        assert!(parse_labels("ok,../escape").is_err());
    }

    #[test]
    fn test_corridor_names_match_settings_keys() {
        let names: Vec<&str> = Corridor::value_variants()
            .iter()
            .map(|c| c.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }
}
