//! Transport contract: newline-delimited JSON in, `[RESULT] `/`[LOG] `
//! lines out, clean termination on EOF. Drives the real binary.

use serde_json::Value;
use std::io::Write;
use std::process::{Command, Stdio};

#[test]
fn daemon_speaks_line_protocol_and_exits_on_eof() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut child = Command::new(env!("CARGO_BIN_EXE_cogni-daemon"))
        .env("COGNI_DATA_DIR", dir.path())
        .env("COGNI_LOG", "error")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daemon");

    {
        let mut stdin = child.stdin.take().expect("stdin handle");
        writeln!(stdin, r#"{{"command":"PING"}}"#).expect("write");
        writeln!(
            stdin,
            r#"{{"command":"SET_TOPOLOGY","rooms":["a","b"],"matrix":[[0,1],[1,0]]}}"#
        )
        .expect("write");
        writeln!(stdin, r#"{{"command":"SIMULATE_SIGNAL","room":"a"}}"#).expect("write");
        writeln!(stdin, "this is not json").expect("write");
        // Dropping stdin is the EOF that shuts the daemon down.
    }

    let output = child.wait_with_output().expect("wait for daemon");
    assert!(output.status.success(), "daemon exited with {:?}", output.status);

    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    let lines: Vec<&str> = stdout.lines().collect();

    let results: Vec<Value> = lines
        .iter()
        .filter_map(|line| line.strip_prefix("[RESULT] "))
        .map(|body| serde_json::from_str(body).expect("result body is json"))
        .collect();
    assert_eq!(results.len(), 3, "stdout was: {stdout}");

    assert_eq!(results[0]["type"], "PONG");
    assert!(results[0]["payload"]["timestamp"].as_i64().expect("ts") > 0);

    assert_eq!(results[1]["type"], "TOPOLOGY_ACK");
    assert_eq!(results[1]["payload"]["ok"], true);

    assert_eq!(results[2]["type"], "SIGNAL_RESULT");
    // Two rooms with the forced self-loop: degree 2 each, score 0.5.
    assert_eq!(results[2]["payload"]["b"], 0.5);

    // The malformed line produced a protocol log, never a result.
    assert!(lines.iter().any(|line| line.starts_with("[LOG] ")));
}
