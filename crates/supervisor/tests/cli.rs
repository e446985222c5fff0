use std::process::Command;

fn runwarden() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_runwarden"));
    for (key, _) in std::env::vars() {
        if key.starts_with("RUNWARDEN_") || key == "DATABASE_URL" || key == "RUST_LOG" {
            command.env_remove(key);
        }
    }
    command
}

#[test]
fn json_logs_stay_off_stdout() {
    let output = runwarden().args(["status", "7"]).output().unwrap();

    assert!(!output.status.success());
    assert!(
        output.stdout.is_empty(),
        "stdout must only carry command output: {:?}",
        String::from_utf8_lossy(&output.stdout)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    let log_line = stderr
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json log line on stderr");
    let log: serde_json::Value = serde_json::from_str(log_line).unwrap();
    assert_eq!(log["level"], "ERROR");
    assert!(stderr.contains("RUNWARDEN_REDIS_URL"), "unexpected stderr: {stderr}");
}

#[test]
fn text_logs_stay_off_stdout() {
    let output = runwarden()
        .env("RUNWARDEN_LOG_FORMAT", "text")
        .args(["stop", "7"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("runwarden failed"));
}

#[test]
fn rejects_non_numeric_datarun_id() {
    let output = runwarden().args(["start", "abc"]).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid identifier"));
}
