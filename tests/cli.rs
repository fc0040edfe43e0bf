use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn labctl() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("labctl").unwrap()
}

/// A run that would reach the settings file, with logs kept inside `dir`.
fn batch(dir: &Path, corridor: &str) -> Command {
    let mut cmd = labctl();
    cmd.current_dir(dir).args([
        "--experiments",
        "exp1,exp2",
        "--experiment-time",
        "5",
        "--number-of-nodes",
        "3",
        "--corridor",
        corridor,
        "--site",
        "grenoble",
    ]);
    cmd
}

const SETTINGS: &str = r#"
[iot-lab-account]
user = "alice"
password = "secret"

[experiment]
extra_time = 5
step_time = 10
openvisualizer_time = 30

[starting_port]
port = 20000

[grenoble]
a = "[1-10]"
excluded_nodes = ""
listening_port = 20000

[build]
build_command_node = "scons panid={{ pan_id }} oos_openwsn"
build_command_sink = "scons dagroot=1 panid={{ pan_id }} oos_openwsn"

[openwsn-fw]
fw_path = "fw"
fw_firmware_path = "fw/build/prog"

[openwsn-sw]
sw_openvisualizer_path = "sw"
sw_log_path = "sw/logs"
"#;

#[test]
fn test_help_exits_successfully() {
    labctl().arg("--help").assert().success();
}

#[test]
fn test_version_exits_successfully() {
    labctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("labctl"));
}

#[test]
fn test_help_lists_all_options() {
    let assert = labctl().arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for opt in [
        "--experiments",
        "--experiment-time",
        "--number-of-nodes",
        "--corridor",
        "--site",
        "--config",
        "--log-file",
        "--fixed-nodes",
    ] {
        assert!(output.contains(opt), "Help output should list '{}'", opt);
    }
}

#[test]
fn test_no_args_shows_usage() {
    labctl()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_corridor_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    batch(tmp.path(), "z")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'z'"));
}

#[test]
fn test_missing_settings_file_fails_and_logs() {
    let tmp = tempfile::tempdir().unwrap();
    batch(tmp.path(), "a")
        .args(["--config", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings from nope.toml"));

    assert!(tmp.path().join("experiment.log").exists());
}

#[test]
fn test_incomplete_settings_report_every_missing_key() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("settings.toml"),
        "[iot-lab-account]\nuser = \"alice\"\n",
    )
    .unwrap();

    batch(tmp.path(), "a")
        .assert()
        .failure()
        .stderr(predicate::str::contains("iot-lab-account.password"))
        .stderr(predicate::str::contains("starting_port.port"));
}

#[test]
fn test_unconfigured_corridor_fails_before_any_work() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("settings.toml"), SETTINGS).unwrap();

    batch(tmp.path(), "d")
        .assert()
        .failure()
        .stderr(predicate::str::contains("grenoble.d"));
}

#[test]
fn test_log_file_option_is_honoured() {
    let tmp = tempfile::tempdir().unwrap();
    batch(tmp.path(), "a")
        .args(["--config", "nope.toml", "--log-file", "logs/run.log"])
        .assert()
        .failure();

    assert!(tmp.path().join("logs/run.log").exists());
}
