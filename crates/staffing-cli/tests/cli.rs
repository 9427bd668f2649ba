use assert_cmd::Command;
use predicates::prelude::*;

fn staffing() -> Command {
    Command::cargo_bin("staffing").unwrap()
}

#[test]
fn test_validate_prints_canonical_rule() {
    staffing()
        .args(["validate", "rrule:freq=weekly;byday=fr,mo;interval=2;count=4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("FREQ=WEEKLY;INTERVAL=2;COUNT=4;BYDAY=FR,MO"))
        .stdout(predicate::str::contains("Every 2 weeks"));
}

#[test]
fn test_validate_rejects_invalid_rule() {
    staffing()
        .args(["validate", "FREQ=SOMETIMES"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid recurrence rule"));
}

#[test]
fn test_expand_skips_cancelled_occurrence() {
    let output = staffing()
        .args([
            "expand",
            "FREQ=WEEKLY;COUNT=4",
            "--start",
            "2026-02-01T10:00:00Z",
            "--exclude",
            "2026-02-08 10:00",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "2026-02-01 10:00 - 2026-02-01 12:00",
            "2026-02-15 10:00 - 2026-02-15 12:00",
            "2026-02-22 10:00 - 2026-02-22 12:00",
        ]
    );
}

#[test]
fn test_expand_json_flags_cancelled() {
    let output = staffing()
        .args([
            "expand",
            "FREQ=WEEKLY;COUNT=4",
            "--start",
            "2026-02-01T10:00:00Z",
            "--exclude",
            "2026-02-08 10:00",
            "--show-cancelled",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[1]["key"], "2026-02-08 10:00");
    assert_eq!(rows[1]["cancelled"], true);
    assert_eq!(rows[2]["cancelled"], false);
}

#[test]
fn test_expand_rejects_bad_anchor() {
    staffing()
        .args(["expand", "FREQ=DAILY", "--start", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid datetime"));
}

#[test]
fn test_summary_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.json");
    let content = serde_json::json!({
        "events": [{
            "id": 1,
            "title": "Sunday Ops",
            "start": "2030-06-02T17:00:00Z",
            "end": "2030-06-02T20:00:00Z",
            "recurrence_rule": "FREQ=WEEKLY",
            "cancelled": ["2030-06-09 17:00"],
            "channel": {"channel_id": "chan-1", "message_id": "msg-1"}
        }],
        "sections": [{"id": 10, "event_id": 1, "name": "Oslo"}],
        "positions": [{
            "id": 102,
            "section_id": 10,
            "slot_id": "ENGM_TWR",
            "name": "Oslo Tower",
            "occupancy": {
                "state": "booked",
                "occupant": {"kind": "external", "cid": 1234567, "channel_user_id": "disc-1"}
            }
        }]
    });
    std::fs::write(&snapshot, content.to_string()).unwrap();

    let output = staffing()
        .args(["summary", "--event", "1", "--now", "2030-06-03T00:00:00Z", "--snapshot"])
        .arg(&snapshot)
        .output()
        .unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["title"], "Sunday Ops");
    assert_eq!(summary["recurrence"], "Every week");
    assert_eq!(summary["next_start"], "2030-06-16T17:00:00Z");
    assert_eq!(summary["message_id"], "msg-1");
    assert_eq!(summary["positions"][0]["section"], 1);
    assert_eq!(summary["positions"][0]["occupant"], "CID 1234567");
}

#[test]
fn test_summary_unknown_event_fails() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("snapshot.json");
    std::fs::write(&snapshot, "{}").unwrap();

    staffing()
        .args(["summary", "--event", "9", "--snapshot"])
        .arg(&snapshot)
        .assert()
        .failure()
        .stderr(predicate::str::contains("event not found: 9"));
}
