use std::process::Command;

fn certus() -> Command {
    Command::new(env!("CARGO_BIN_EXE_certus"))
}

#[test]
fn help_lists_the_typical_flow() {
    let output = certus()
        .arg("--help")
        .output()
        .expect("failed to execute certus --help");
    assert!(output.status.success(), "--help should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let list = stdout.find("certus list").expect("help should mention list");
    let run = stdout
        .find("certus run linear2d")
        .expect("help should mention a run");
    assert!(list < run, "list should come before run");
}

#[test]
fn list_names_every_benchmark() {
    let output = certus().arg("list").output().expect("failed to execute certus list");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["linear2d", "nonpoly1", "barr1", "barr3"] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }
}

#[test]
fn list_json_is_an_array_of_named_entries() {
    let output = certus()
        .args(["list", "--format", "json"])
        .output()
        .expect("failed to execute certus list");
    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("list output should be JSON");
    let entries = value.as_array().expect("list output should be an array");
    assert!(entries.iter().any(|e| e["name"] == "linear2d"));
}

#[test]
fn run_writes_a_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reports/linear2d.json");
    let output = certus()
        .args(["-q", "run", "linear2d", "--format", "json", "--seed", "3", "--out"])
        .arg(&out)
        .output()
        .expect("failed to execute certus run");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("report should be written"))
            .expect("report should be JSON");
    assert_eq!(report["benchmark"], "linear2d");
    assert_eq!(report["backend"], "interval");
    let runs = report["runs"].as_array().expect("runs array");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["seed"], 3);
    let succeeded = runs[0]["status"] == "success";
    assert_eq!(output.status.success(), succeeded);
    if !succeeded {
        assert_eq!(output.status.code(), Some(2));
    }
}

#[test]
fn unknown_benchmark_fails() {
    let output = certus()
        .args(["run", "no-such-system"])
        .output()
        .expect("failed to execute certus run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown benchmark"), "stderr was:\n{stderr}");
}

#[test]
fn bad_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("opts.json");
    std::fs::write(&path, r#"{"batch_size": 0}"#).unwrap();
    let output = certus()
        .args(["run", "linear2d", "--config"])
        .arg(&path)
        .output()
        .expect("failed to execute certus run");
    assert!(!output.status.success());
    assert_ne!(output.status.code(), Some(2));
}
