//! Integration tests for the import / update / report cycle via CLI.
//!
//! - `tj import` reconciles documents and is idempotent
//! - `tj update` validates payloads before touching the store
//! - `tj report` writes a dated copy and spools mail

mod common;

use common::{TestEnv, parse_json};
use predicates::prelude::*;
use serde_json::{Value, json};

fn update_payload(uid: i64) -> Value {
    json!({
        "uid": uid,
        "project_name": "Apollo",
        "task_name": "Apollo",
        "step_name": "1.2, Build",
        "user_working": "bob@acme.test",
        "is_complete": "true",
        "actual_work": 6,
        "additional_time": "",
        "task_note": "walls framed",
        "actual_start": "2024-05-02 08:00",
        "actual_finish": "2024-05-02T17:30:00",
        "security_token": "field-token"
    })
}

// === Import ===

#[test]
fn test_import_reports_inserted_tasks() {
    let env = TestEnv::new();
    env.pack_sample("acme");

    let output = env.tj().args(["import", "acme"]).output().unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["tenant"], "acme");
    assert_eq!(json["documents"][0]["inserted"], 5);
    assert_eq!(json["documents"][0]["project_name"], "Apollo");
    assert!(env.tenant_dir("acme").join("acme.db").exists());
}

#[test]
fn test_import_twice_inserts_nothing() {
    let env = TestEnv::imported("acme");

    let output = env.tj().args(["import", "acme"]).output().unwrap();
    let json = parse_json(&output.stdout);
    assert_eq!(json["documents"][0]["inserted"], 0);
    assert_eq!(json["documents"][0]["unchanged"], 5);
}

#[test]
fn test_import_skips_broken_documents() {
    let env = TestEnv::new();
    env.pack_sample("acme");
    std::fs::write(env.tenant_dir("acme").join("junk.tjp"), b"not a document").unwrap();

    let output = env.tj().args(["import", "acme"]).output().unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["documents"].as_array().unwrap().len(), 1);
    assert_eq!(json["skipped"].as_array().unwrap().len(), 1);
}

#[test]
fn test_import_human_output() {
    let env = TestEnv::new();
    env.pack_sample("acme");

    env.tj()
        .args(["-H", "import", "acme"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5 task(s) inserted"));
}

#[test]
fn test_invalid_tenant_is_rejected() {
    let env = TestEnv::new();

    env.tj()
        .args(["dump", "../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}

#[test]
fn test_projects_lists_documents() {
    let env = TestEnv::new();
    env.pack_sample("acme");

    let output = env.tj().args(["projects", "acme"]).output().unwrap();
    let json = parse_json(&output.stdout);
    assert_eq!(json["projects"][0]["project_name"], "Apollo");
}

// === Dump ===

#[test]
fn test_dump_after_import() {
    let env = TestEnv::imported("acme");

    let output = env.tj().args(["dump", "acme"]).output().unwrap();
    let json = parse_json(&output.stdout);
    let tasks = json["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 5);

    let build = tasks.iter().find(|t| t["uid"] == 4).unwrap();
    assert_eq!(build["task_name"], "Apollo");
    assert_eq!(build["step_name"], "1.2, Build");
    assert_eq!(build["is_complete"], false);

    let emails: Vec<&str> = json["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, vec!["ann@acme.test", "bob@acme.test"]);
}

// === Update ===

#[test]
fn test_update_from_stdin() {
    let env = TestEnv::imported("acme");

    env.tj()
        .args(["-H", "update", "acme"])
        .write_stdin(update_payload(4).to_string())
        .assert()
        .success()
        .stdout("ok\n");

    let output = env.tj().args(["dump", "acme"]).output().unwrap();
    let json = parse_json(&output.stdout);
    let build = json["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["uid"] == 4)
        .unwrap()
        .clone();
    assert_eq!(build["is_complete"], true);
    assert_eq!(build["task_note"], "walls framed");
    assert_eq!(build["user_working"], "bob@acme.test");
}

#[test]
fn test_update_from_file() {
    let env = TestEnv::imported("acme");
    let payload = env.write_work_file("update.json", &update_payload(3).to_string());

    let output = env.tj().args(["update", "acme"]).arg(&payload).output().unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["uid"], 3);
}

#[test]
fn test_update_lists_missing_fields() {
    let env = TestEnv::imported("acme");
    let mut payload = update_payload(4);
    payload.as_object_mut().unwrap().remove("task_note");
    payload.as_object_mut().unwrap().remove("security_token");

    env.tj()
        .args(["-H", "update", "acme"])
        .write_stdin(payload.to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Errors in json: missing task_note, security_token",
        ));
}

#[test]
fn test_update_unknown_task() {
    let env = TestEnv::imported("acme");

    env.tj()
        .args(["-H", "update", "acme"])
        .write_stdin(update_payload(404).to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project: Apollo with uid: 404 not found"));
}

#[test]
fn test_update_rejects_malformed_json() {
    let env = TestEnv::imported("acme");

    env.tj()
        .args(["update", "acme"])
        .write_stdin("{ not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

#[test]
fn test_reimport_keeps_operator_fields() {
    let env = TestEnv::imported("acme");
    env.tj()
        .args(["update", "acme"])
        .write_stdin(update_payload(4).to_string())
        .assert()
        .success();

    env.tj().args(["import", "acme"]).assert().success();

    let output = env.tj().args(["dump", "acme"]).output().unwrap();
    let json = parse_json(&output.stdout);
    let build = json["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["uid"] == 4)
        .unwrap()
        .clone();
    assert_eq!(build["task_note"], "walls framed");
}

// === Report ===

#[test]
fn test_report_writes_dated_copy_and_spools_mail() {
    let env = TestEnv::imported("acme");
    env.tj()
        .args(["update", "acme"])
        .write_stdin(update_payload(4).to_string())
        .assert()
        .success();

    let output = env
        .tj()
        .args(["report", "acme", "APOLLO", "--to", "Bob@Acme.test"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = parse_json(&output.stdout);
    assert_eq!(json["rendered"], true);
    assert_eq!(json["delivery"]["status"], "delivered");
    assert_eq!(json["delivery"]["to"], "bob@acme.test");

    let reports = env.files_in("acme", "reports");
    assert_eq!(reports.len(), 1);
    let name = reports[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("Apollo_"), "{}", name);
    assert!(name.ends_with(".tjp"), "{}", name);

    let shown = env.tj().args(["doc", "show"]).arg(&reports[0]).output().unwrap();
    let doc = parse_json(&shown.stdout);
    let build = doc["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["unique_id"] == 4)
        .unwrap()
        .clone();
    assert_eq!(build["actual_work_minutes"], 360.0);
    assert_eq!(build["notes"], "walls framed");
    assert_eq!(build["task_type"], "fixed_work");

    let outbox = env.files_in("acme", "outbox");
    assert_eq!(outbox.len(), 1);
    let mail: Value = serde_json::from_str(&std::fs::read_to_string(&outbox[0]).unwrap()).unwrap();
    assert_eq!(mail["to"], "bob@acme.test");
    assert_eq!(mail["attachment"]["filename"], name);
}

#[test]
fn test_report_leaves_source_document_untouched() {
    let env = TestEnv::imported("acme");
    let source = env.tenant_dir("acme").join("apollo.tjp");
    let before = std::fs::read(&source).unwrap();

    env.tj()
        .args(["update", "acme"])
        .write_stdin(update_payload(4).to_string())
        .assert()
        .success();
    env.tj().args(["report", "acme", "Apollo"]).assert().success();

    assert_eq!(std::fs::read(&source).unwrap(), before);
    assert!(!source.with_extension("tjp.lock").exists());
}

#[test]
fn test_report_without_recipient_skips_delivery() {
    let env = TestEnv::imported("acme");

    let output = env.tj().args(["report", "acme", "Apollo"]).output().unwrap();
    let json = parse_json(&output.stdout);
    assert_eq!(json["delivery"]["status"], "skipped");
    assert!(env.files_in("acme", "outbox").is_empty());
}

#[test]
fn test_report_unknown_project() {
    let env = TestEnv::imported("acme");

    env.tj()
        .args(["-H", "report", "acme", "Gemini"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No project document for project: Gemini"));
}
