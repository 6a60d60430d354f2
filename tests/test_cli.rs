use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// TOML literal for a shell loop that records a SIGTERM in `$OUT` and then exits cleanly
const TRAPS_TERM: &str = r#"'''trap 'echo term > "$$OUT"; exit 0' TERM; touch "$$READY"; while true; do sleep 0.1; done'''"#;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("procession.toml");
    fs::write(&path, body).unwrap();
    path
}

fn procession() -> Command {
    let mut cmd = Command::cargo_bin("procession").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("PROCESSION_CONFIG");
    cmd
}

fn spawn_procession(config: &Path) -> Child {
    StdCommand::new(cargo_bin("procession"))
        .arg("--config")
        .arg(config)
        .env_remove("RUST_LOG")
        .env_remove("PROCESSION_CONFIG")
        .stdin(Stdio::null())
        .spawn()
        .unwrap()
}

fn terminate(child: &Child) {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
}

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if path.exists() {
            return true;
        }
        sleep(Duration::from_millis(50));
    }
    false
}

fn wait_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if start.elapsed() > timeout {
            child.kill().ok();
            panic!("launcher did not exit after SIGTERM");
        }
        sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_relays_foreground_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[service]]
name = "worker"
command = "true"

[[service]]
name = "web"
command = "sh"
args = ["-c", "exit 7"]
"#,
    );

    procession().arg("--config").arg(&config).assert().code(7);
}

#[test]
fn test_missing_command_exits_with_reserved_code() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("web-started");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[service]]
name = "worker"
command = "/no/such/binary"

[[service]]
name = "web"
command = "touch"
args = ["{}"]
"#,
            marker.display()
        ),
    );

    let output = procession()
        .arg("--config")
        .arg(&config)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("worker"), "stderr: {}", stderr);
    assert!(stderr.contains("/no/such/binary"), "stderr: {}", stderr);
    assert!(!marker.exists());
}

#[test]
fn test_config_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[service]]
name = "web"
command = "sh"
args = ["-c", "exit 4"]
"#,
    );

    let mut cmd = Command::cargo_bin("procession").unwrap();
    cmd.env_remove("RUST_LOG")
        .env("PROCESSION_CONFIG", &config)
        .assert()
        .code(4);
}

#[test]
fn test_invalid_config_exits_with_reserved_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[service]]
name = "web"
command = "sh"
mode = "background"
"#,
    );

    procession().arg("--config").arg(&config).assert().code(2);
}

#[test]
fn test_unset_variable_exits_with_reserved_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[service]]
name = "web"
command = "sh"
args = ["-c", "exit 0", "${PROCESSION_TEST_UNSET}"]
"#,
    );

    let output = procession()
        .arg("--config")
        .arg(&config)
        .env_remove("PROCESSION_TEST_UNSET")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PROCESSION_TEST_UNSET"), "stderr: {}", stderr);
}

#[test]
fn test_check_prints_plan_without_starting() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("started");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[service]]
name = "worker"
command = "touch"
args = ["{marker}"]

[[service]]
name = "web"
command = "touch"
args = ["{marker}"]
"#,
            marker = marker.display()
        ),
    );

    let output = procession()
        .arg("--config")
        .arg(&config)
        .arg("--check")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("1. worker (Background): "));
    assert!(lines[1].starts_with("2. web (Foreground): "));
    assert!(!marker.exists());
}

#[test]
fn test_sigterm_is_forwarded_to_foreground() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let out = dir.path().join("out");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[service]]
name = "web"
command = "sh"
args = ["-c", {}]
env = {{ OUT = "{}", READY = "{}" }}
"#,
            TRAPS_TERM,
            out.display(),
            ready.display()
        ),
    );

    let mut child = spawn_procession(&config);
    assert!(
        wait_for(&ready, Duration::from_secs(10)),
        "foreground never started"
    );
    terminate(&child);

    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
    assert_eq!(fs::read_to_string(&out).unwrap().trim(), "term");
}

#[test]
fn test_sigterm_reaches_background_services() {
    let dir = tempfile::tempdir().unwrap();
    let worker_ready = dir.path().join("worker-ready");
    let worker_out = dir.path().join("worker-out");
    let web_ready = dir.path().join("web-ready");
    let web_out = dir.path().join("web-out");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[service]]
name = "worker"
command = "sh"
args = ["-c", {script}]
readiness = {{ file = "{worker_ready}" }}
readiness_timeout_ms = 10000
env = {{ OUT = "{worker_out}", READY = "{worker_ready}" }}

[[service]]
name = "web"
command = "sh"
args = ["-c", {script}]
env = {{ OUT = "{web_out}", READY = "{web_ready}" }}
"#,
            script = TRAPS_TERM,
            worker_ready = worker_ready.display(),
            worker_out = worker_out.display(),
            web_ready = web_ready.display(),
            web_out = web_out.display(),
        ),
    );

    let mut child = spawn_procession(&config);
    assert!(
        wait_for(&web_ready, Duration::from_secs(10)),
        "foreground never started"
    );
    terminate(&child);

    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
    assert_eq!(fs::read_to_string(&web_out).unwrap().trim(), "term");
    assert!(
        wait_for(&worker_out, Duration::from_secs(5)),
        "background service never saw the signal"
    );
}

#[test]
fn test_sigterm_during_startup_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let out = dir.path().join("out");
    let web_started = dir.path().join("web-started");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[[service]]
name = "worker"
command = "sh"
args = ["-c", {script}]
readiness_timeout_ms = 30000
env = {{ OUT = "{out}", READY = "{ready}" }}

[[service]]
name = "web"
command = "touch"
args = ["{web_started}"]
"#,
            script = TRAPS_TERM,
            out = out.display(),
            ready = ready.display(),
            web_started = web_started.display(),
        ),
    );

    let mut child = spawn_procession(&config);
    assert!(
        wait_for(&ready, Duration::from_secs(10)),
        "background service never started"
    );
    terminate(&child);

    // the readiness wait is cut short rather than waited out
    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(143));
    assert!(
        wait_for(&out, Duration::from_secs(5)),
        "background service never saw the signal"
    );
    assert!(!web_started.exists());
}

#[test]
fn test_kill_timeout_escalates_to_sigkill() {
    let dir = tempfile::tempdir().unwrap();
    let ready = dir.path().join("ready");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[orchestrator]
kill_timeout_ms = 300

[[service]]
name = "web"
command = "sh"
args = ["-c", '''trap '' TERM; touch "$$READY"; while true; do sleep 0.1; done''']
env = {{ READY = "{}" }}
"#,
            ready.display()
        ),
    );

    let mut child = spawn_procession(&config);
    assert!(
        wait_for(&ready, Duration::from_secs(10)),
        "foreground never started"
    );

    let start = Instant::now();
    terminate(&child);

    let status = wait_exit(&mut child, Duration::from_secs(10));
    assert_eq!(status.code(), Some(137));
    assert!(start.elapsed() >= Duration::from_millis(300));
}
