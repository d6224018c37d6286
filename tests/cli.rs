use std::fs;
use std::path::Path;

use assert_cmd::Command;
use mockito::{Matcher, Server};
use predicates::prelude::*;
use serde_json::Value;

fn promdump(cwd: &Path) -> Command {
    let mut cmd = Command::cargo_bin("promdump").unwrap();
    cmd.current_dir(cwd)
        .env_remove("PROMDUMP_ENDPOINT")
        .env_remove("PROMDUMP_VM_ENDPOINT")
        .env_remove("PROMDUMP_OUT")
        .env_remove("PROMDUMP_BATCH_SIZE")
        .env_remove("PROMDUMP_ENV_FILE");
    cmd
}

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).unwrap()
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    promdump(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dump"))
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("list-metrics"));
}

#[test]
fn dump_requires_an_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    promdump(dir.path())
        .arg("dump")
        .assert()
        .failure()
        .stderr(predicate::str::contains("prometheus endpoint is required"));
}

#[test]
fn dump_rejects_bad_options_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    // Nothing listens on this port; validation must fail first.
    let endpoint = "http://127.0.0.1:9";

    promdump(dir.path())
        .args(["dump", "-e", endpoint, "--parts", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parts must be greater than 0"));

    promdump(dir.path())
        .args([
            "dump",
            "-e",
            endpoint,
            "--start",
            "2024-01-02T00:00:00Z",
            "--end",
            "2024-01-01T00:00:00Z",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("start time must be before end time"));

    promdump(dir.path())
        .args(["dump", "-e", endpoint, "--memory-ratio", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("memory ratio must be in (0, 1]"));

    promdump(dir.path())
        .args(["dump", "-e", endpoint, "--step", "fast"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid duration"));
}

#[test]
fn endpoint_can_come_from_env_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("custom.env"),
        "PROMDUMP_ENDPOINT=http://127.0.0.1:9\n",
    )
    .unwrap();

    // The endpoint is found, so the failure is the parts check instead.
    promdump(dir.path())
        .args(["dump", "--env-file", "custom.env", "--parts", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parts must be greater than 0"));

    promdump(dir.path())
        .args(["dump", "--env-file", "missing.env"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read env file"));
}

#[test]
fn dump_then_noop_push_round_trip() {
    let mut server = Server::new();
    let labels = server
        .mock("GET", "/api/v1/label/__name__/values")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"status":"success","data":["up"]}"#)
        .expect(1)
        .create();
    let query = server
        .mock("GET", "/api/v1/query_range")
        .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
        .with_status(200)
        .with_body(
            r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{"__name__":"up","job":"a"},"values":[[1704067200,"1"],[1704067201,"1"]]},
                {"metric":{"__name__":"up","job":"b"},"values":[[1704067200,"0"]]}
            ]}}"#,
        )
        .expect(1)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let output = promdump(dir.path())
        .args([
            "dump",
            "--json",
            "-e",
            &server.url(),
            "--start",
            "2024-01-01T00:00:00Z",
            "--end",
            "2024-01-01T01:00:00Z",
            "--out",
        ])
        .arg(&out)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    labels.assert();
    query.assert();
    let summary = stdout_json(&output);
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["series"], 2);
    assert_eq!(summary["samples"], 3);

    let dumped = out.join("promdump.ndjson");
    assert_eq!(fs::read_to_string(&dumped).unwrap().lines().count(), 2);

    let output = promdump(dir.path())
        .args(["push", "--json", "--noop", "--path"])
        .arg(&dumped)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary = stdout_json(&output);
    assert_eq!(summary["records_pushed"], 2);
    assert_eq!(summary["noop"], true);
}

#[test]
fn push_skips_invalid_records_and_fails_on_malformed_lines() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.ndjson");
    fs::write(
        &input,
        concat!(
            r#"{"metric":{"__name__":"up"},"values":[[1704067200,"1"]]}"#,
            "\n",
            r#"{"metric":{"__name__":"up"},"values":[[1704067200,"5.0"],[1704067201,"Inf"]]}"#,
            "\n",
        ),
    )
    .unwrap();

    let output = promdump(dir.path())
        .args(["push", "--json", "--noop", "--path"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary = stdout_json(&output);
    assert_eq!(summary["records_pushed"], 1);
    assert_eq!(summary["records_skipped"], 1);

    let broken = dir.path().join("broken.ndjson");
    fs::write(&broken, "{\"metric\":\n").unwrap();
    promdump(dir.path())
        .args(["push", "--noop", "--path"])
        .arg(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to push"));
}

#[test]
fn push_requires_endpoint_unless_noop() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.ndjson");
    fs::write(&input, "").unwrap();

    promdump(dir.path())
        .args(["push", "--path"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("vm-endpoint is required"));

    promdump(dir.path())
        .args(["push", "--noop", "--path", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to get file info"));
}

#[test]
fn push_sends_batches_to_import_endpoint() {
    let mut server = Server::new();
    let import = server
        .mock("POST", "/api/v1/import")
        .match_header("content-type", "application/jsonl")
        .match_body(Matcher::Regex(r#""timestamps":\[1704067200000\]"#.into()))
        .with_status(204)
        .expect(2)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("0.ndjson");
    let line = r#"{"metric":{"__name__":"up"},"values":[[1704067200,"1"]]}"#;
    fs::write(&input, format!("{line}\n{line}\n{line}\n")).unwrap();

    promdump(dir.path())
        .args(["push", "--batch-size", "2", "-e", &server.url(), "--path"])
        .arg(&input)
        .assert()
        .success()
        .stderr(predicate::str::contains("Push complete"));

    import.assert();
}

#[test]
fn tiny_point_budget_fails_before_touching_disk() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    promdump(dir.path())
        .args(["dump", "-e", "http://127.0.0.1:9", "--memory-ratio", "0.00001", "--out"])
        .arg(&out)
        .assert()
        .failure()
        .stderr(predicate::str::contains("leaves no room for a single point"));
    assert!(!out.exists());
}

#[test]
fn json_push_keeps_ignored_files_off_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    fs::create_dir(&inputs).unwrap();
    fs::write(
        inputs.join("a.json"),
        r#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"__name__":"up"},"values":[[1704067200,"1"]]}
        ]}}"#,
    )
    .unwrap();
    fs::write(inputs.join("b.json"), "<html>").unwrap();

    let output = promdump(dir.path())
        .args([
            "push",
            "--json",
            "--noop",
            "--format",
            "query-response",
            "--ignore-invalid-files",
            "--path",
        ])
        .arg(&inputs)
        .assert()
        .success()
        .stderr(predicate::str::contains("not a valid query response").not())
        .get_output()
        .stdout
        .clone();
    let summary = stdout_json(&output);
    assert_eq!(summary["ignored_files"], 1);
    assert_eq!(summary["records_pushed"], 1);
}
