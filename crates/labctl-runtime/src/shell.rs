use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};

/// Run a command on the host, capturing output.
pub fn run_host(cmd: &str, args: &[&str]) -> Result<Output> {
    #[cfg(test)]
    if let Some(output) = super::shell_mock::intercept(&command_line(cmd, args)) {
        return Ok(output);
    }

    Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run: {}", command_line(cmd, args)))
}

/// Run a command on the host, failing on a non-zero exit.
pub fn run_host_checked(cmd: &str, args: &[&str]) -> Result<Output> {
    let output = run_host(cmd, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "Command failed (exit {}): {}\n{}",
            output.status.code().unwrap_or(-1),
            command_line(cmd, args),
            stderr.trim()
        );
    }
    Ok(output)
}

/// Run a bash script with `dir` as working directory, capturing output.
/// The exit status is left for the caller to judge.
pub fn run_script_in(dir: &Path, script: &str) -> Result<Output> {
    #[cfg(test)]
    if let Some(output) =
        super::shell_mock::intercept(&format!("cd {} && {}", dir.display(), script))
    {
        return Ok(output);
    }

    Command::new("bash")
        .args(["-c", script])
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to run script in {}", dir.display()))
}

/// True when the command runs and exits zero.
pub fn succeeds(cmd: &str, args: &[&str]) -> bool {
    run_host(cmd, args)
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn command_line(cmd: &str, args: &[&str]) -> String {
    std::iter::once(cmd)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
