use colored::Colorize;
use labctl_runtime::pipeline::BatchReport;

// ---------------------------------------------------------------------------
// Colored message helpers
// ---------------------------------------------------------------------------

fn prefix() -> String {
    "[labctl]".bold().cyan().to_string()
}

/// Print a success message: [labctl] message (in green)
pub fn success(msg: &str) {
    println!("{} {}", prefix(), msg.green());
}

/// Print an error message: [labctl] ERROR: message (in red)
pub fn error(msg: &str) {
    eprintln!("{} {}", "[labctl] ERROR:".bold().red(), msg.red());
}

// ---------------------------------------------------------------------------
// Banner
// ---------------------------------------------------------------------------

/// Print a green bold banner box.
pub fn banner(lines: &[&str]) {
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    let rule = "=".repeat(width);

    println!();
    println!("{}", rule.bold().green());
    for line in lines {
        let pad = width - line.len() - 4;
        println!(
            "{}",
            format!("  {}{}  ", line, " ".repeat(pad)).bold().green()
        );
    }
    println!("{}", rule.bold().green());
    println!();
}

// ---------------------------------------------------------------------------
// Batch summary
// ---------------------------------------------------------------------------

/// One line per finished experiment.
pub fn summary_lines(report: &BatchReport) -> Vec<String> {
    report
        .experiments
        .iter()
        .map(|r| {
            let minutes = (r.finished_at - r.started_at).num_minutes();
            format!(
                "{:<16} id {:<8} pan {:<4} sink {}  ({} min) -> {}",
                r.label,
                r.experiment_id.0,
                r.pan_id,
                r.sink,
                minutes,
                r.archive.display()
            )
        })
        .collect()
}

pub fn summary(report: &BatchReport) {
    println!("{}", "Batch summary".bold());
    println!("{}", "-------------".dimmed());
    for line in summary_lines(report) {
        println!("  {}", line);
    }
    success(&format!(
        "{} experiment(s) completed",
        report.experiments.len()
    ));
}
