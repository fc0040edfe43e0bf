//! OpenVisualizer: start, stop, and archive its logs.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use labctl_core::config::MonitorConfig;
use tracing::info;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::supervisor::Supervisor;
use crate::wait::{self, PROBE_INTERVAL, Pause};

pub const MONITOR_SESSION: &str = "OpenVisualizer";
/// Log files the monitor writes, including rotated ones.
pub const MONITOR_LOG_PREFIX: &str = "openVisualizer.log";

pub fn monitor_command(path: &Path) -> String {
    format!("cd {};sudo scons runweb", path.display())
}

pub fn start_monitor(supervisor: &mut Supervisor, config: &MonitorConfig) -> Result<()> {
    info!("Loading OpenVisualizer");
    supervisor.launch(
        MONITOR_SESSION,
        "monitor",
        &monitor_command(&config.sw_openvisualizer_path),
    )
}

pub fn stop_monitor(supervisor: &Supervisor) -> Result<()> {
    info!("Closing OpenVisualizer");
    supervisor.send(MONITOR_SESSION, "quit")
}

/// Wait for the web UI when a port is configured, otherwise for the full delay.
pub fn await_monitor(config: &MonitorConfig, timeout: Duration, pause: &dyn Pause) -> bool {
    match config.web_port {
        Some(port) => wait::wait_until("monitor web UI", timeout, PROBE_INTERVAL, pause, || {
            wait::port_open(port)
        }),
        None => {
            pause.pause(timeout);
            true
        }
    }
}

/// Pack every monitor log in `log_dir` into a deflated `<label>.zip` next to
/// them, then delete the originals. Returns the archive path.
///
/// Entry names are relative to `log_dir`.
pub fn archive_logs(log_dir: &Path, label: &str) -> Result<PathBuf> {
    let archive_path = log_dir.join(format!("{}.zip", label));

    let mut logs: Vec<(PathBuf, String)> = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory {}", log_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file() && entry.path() != archive_path)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with(MONITOR_LOG_PREFIX).then(|| (entry.path(), name))
        })
        .collect();
    logs.sort();

    let file = File::create(&archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, name) in &logs {
        zip.start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add {} to archive", name))?;
        let mut source =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        io::copy(&mut source, &mut zip)
            .with_context(|| format!("Failed to archive {}", path.display()))?;
    }
    zip.finish()
        .with_context(|| format!("Failed to finish {}", archive_path.display()))?;

    for (path, _) in &logs {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    info!(
        archive = %archive_path.display(),
        files = logs.len(),
        "Archived monitor logs"
    );
    Ok(archive_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell_mock;
    use crate::wait::testing::RecordingPause;
    use std::io::Read;

    fn monitor_config(dir: &Path, web_port: Option<u16>) -> MonitorConfig {
        MonitorConfig {
            sw_openvisualizer_path: dir.join("openvisualizer"),
            sw_log_path: dir.to_path_buf(),
            web_port,
        }
    }

    #[test]
    fn test_start_and_stop_use_monitor_session() {
        let (_guard, log) = shell_mock::mock_shell().install();
        let mut sup = Supervisor::new("helper.sh");
        let config = monitor_config(Path::new("/opt/sw"), None);

        start_monitor(&mut sup, &config).unwrap();
        stop_monitor(&sup).unwrap();

        assert_eq!(
            shell_mock::commands(&log),
            vec![
                "helper.sh OpenVisualizer cd /opt/sw/openvisualizer;sudo scons runweb",
                "helper.sh OpenVisualizer quit",
            ]
        );
    }

    #[test]
    fn test_await_monitor_without_port_waits_full_delay() {
        let pause = RecordingPause::default();
        let config = monitor_config(Path::new("/opt/sw"), None);
        assert!(await_monitor(&config, Duration::from_secs(30), &pause));
        assert_eq!(*pause.calls.borrow(), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn test_archive_logs_collects_rotated_logs_only() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("openVisualizer.log"), "current").unwrap();
        fs::write(tmp.path().join("openVisualizer.log.1"), "rotated").unwrap();
        fs::write(tmp.path().join("notes.txt"), "keep").unwrap();

        let archive = archive_logs(tmp.path(), "exp-a").unwrap();

        assert_eq!(archive, tmp.path().join("exp-a.zip"));
        assert!(!tmp.path().join("openVisualizer.log").exists());
        assert!(!tmp.path().join("openVisualizer.log.1").exists());
        assert!(tmp.path().join("notes.txt").exists());

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<String> = zip.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["openVisualizer.log", "openVisualizer.log.1"]);

        let mut entry = zip.by_name("openVisualizer.log.1").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "rotated");
    }

    #[test]
    fn test_archive_with_no_logs_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = archive_logs(tmp.path(), "quiet").unwrap();
        assert_eq!(archive, tmp.path().join("quiet.zip"));
        let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.len(), 0);
    }

    #[test]
    fn test_archive_missing_directory_fails() {
        assert!(archive_logs(Path::new("/nonexistent/logs"), "x").is_err());
    }
}
