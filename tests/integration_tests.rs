//! Integration tests for the mend CLI
//!
//! Stages are stood in for by small `sh` scripts written into the target directory, so these
//! tests exercise configuration, discovery, the orchestrator and the exit-code contract together.

#![cfg(unix)]

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ISSUE_JSON: &str =
    r#"[{"type": "error", "path": "calc.py", "line": 2, "message": "division by zero", "symbol": "zero-division"}]"#;

/// Helper to create a mend Command with a clean `MEND_*` environment
fn mend() -> Command {
    let mut cmd = cargo_bin_cmd!("mend");
    for key in [
        "MEND_MAX_ITERATIONS",
        "MEND_ENCODING",
        "MEND_DETECTOR_CMD",
        "MEND_CORRECTOR_CMD",
        "MEND_VERIFIER_CMD",
        "RUST_LOG",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

/// A target directory holding one Python artifact and the stand-in stage scripts.
struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("calc.py"), "def divide(a, b):\n    return a / b\n").unwrap();
        let project = Self { dir };
        project.detector_reports("[]");
        // The corrector records each call and "fixes" the code by leaving a marker.
        project.script(
            "correct.sh",
            "cat > request.txt\necho call >> corrector.calls\ntouch fixed.marker\necho 'Guarded divide against zero'\n",
        );
        project.verifier_passes_after_fix();
        project
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str, body: &str) {
        fs::write(self.path().join(name), format!("#!/bin/sh\n{body}")).unwrap();
    }

    fn detector_reports(&self, json: &str) {
        self.script("detect.sh", &format!("cat <<'EOF'\n{json}\nEOF\n"));
    }

    fn verifier_passes_after_fix(&self) {
        self.script(
            "verify.sh",
            "if [ -f fixed.marker ]; then\n  echo '1 passed in 0.01s'\n  exit 0\nfi\necho 'FAILED test_calc.py::test_div - ZeroDivisionError'\necho '1 failed in 0.01s'\nexit 1\n",
        );
    }

    fn verifier_always_fails(&self) {
        self.script(
            "verify.sh",
            "echo 'FAILED test_calc.py::test_div - ZeroDivisionError'\necho '1 failed in 0.01s'\nexit 1\n",
        );
    }

    fn corrector_calls(&self) -> usize {
        fs::read_to_string(self.path().join("corrector.calls"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// `mend run` against this project with the scripts wired in through the environment.
    fn run(&self) -> Command {
        let mut cmd = mend();
        cmd.current_dir(self.path())
            .env("MEND_DETECTOR_CMD", "sh detect.sh")
            .env("MEND_CORRECTOR_CMD", "sh correct.sh")
            .env("MEND_VERIFIER_CMD", "sh verify.sh")
            .arg("run")
            .arg(self.path());
        cmd
    }

    fn report(&self) -> Value {
        let text = fs::read_to_string(self.path().join("report.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_mend_help() {
        mend()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_mend_version() {
        mend().arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_target() {
        mend().arg("run").assert().code(2);
    }

    #[test]
    fn test_missing_target_is_misconfiguration() {
        mend()
            .args(["run", "/definitely/not/a/real/target"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Target not found"));
    }

    #[test]
    fn test_file_target_is_misconfiguration() {
        let project = Project::new();
        mend()
            .arg("run")
            .arg(project.path().join("calc.py"))
            .assert()
            .code(2)
            .stderr(predicate::str::contains("not a directory"));
    }
}

// =============================================================================
// Pipeline Runs
// =============================================================================

mod pipeline_runs {
    use super::*;

    #[test]
    fn test_clean_target_succeeds_without_correction() {
        let project = Project::new();
        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(0);

        let report = project.report();
        assert_eq!(report["outcome"], "SUCCESS");
        assert_eq!(report["final_state"], "DONE_SUCCESS");
        assert_eq!(report["healing_attempts"], 0);
        assert_eq!(report["artifact_count"], 1);
        assert_eq!(project.corrector_calls(), 0);
    }

    #[test]
    fn test_single_cycle_heals_issue() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project
            .run()
            .args(["--max-iterations", "3", "--output", "report.json"])
            .assert()
            .code(0);

        let report = project.report();
        assert_eq!(report["outcome"], "SUCCESS");
        assert_eq!(report["healing_attempts"], 1);
        assert_eq!(report["fix_history"].as_array().unwrap().len(), 1);
        assert_eq!(report["fix_history"][0]["summary"], "Guarded divide against zero");
        assert_eq!(report["detected_issues"][0]["location"]["artifact"], "calc.py");
        assert_eq!(project.corrector_calls(), 1);

        let request = fs::read_to_string(project.path().join("request.txt")).unwrap();
        assert!(request.contains("## calc.py"));
        assert!(request.contains("division by zero"));
    }

    #[test]
    fn test_budget_exhaustion_exits_3() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project.verifier_always_fails();
        project
            .run()
            .args(["--max-iterations", "2", "--output", "report.json"])
            .assert()
            .code(3);

        let report = project.report();
        assert_eq!(report["outcome"], "EXHAUSTED");
        assert_eq!(report["final_state"], "DONE_EXHAUSTED");
        assert_eq!(report["healing_attempts"], 2);
        assert_eq!(report["fix_history"].as_array().unwrap().len(), 2);
        assert_eq!(report["fix_history"][1]["feedback"], "errors");
        assert!(!report["verification_errors"].as_array().unwrap().is_empty());
        assert_eq!(project.corrector_calls(), 2);
    }

    #[test]
    fn test_zero_budget_never_corrects() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project
            .run()
            .args(["--max-iterations", "0", "--output", "report.json"])
            .assert()
            .code(3);

        assert_eq!(project.report()["healing_attempts"], 0);
        assert_eq!(project.corrector_calls(), 0);
    }

    #[test]
    fn test_dry_run_reports_without_correcting() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project
            .run()
            .args(["--dry-run", "--output", "report.json"])
            .assert()
            .code(0);

        let report = project.report();
        assert_eq!(report["final_state"], "DONE_SUCCESS");
        assert_eq!(report["dry_run"], true);
        assert_eq!(report["detected_issues"].as_array().unwrap().len(), 1);
        assert_eq!(project.corrector_calls(), 0);
        assert!(!project.path().join("fixed.marker").exists());
    }

    #[test]
    fn test_detector_fault_aborts_with_exit_4() {
        let project = Project::new();
        project.script("detect.sh", "echo 'not json at all'\n");
        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(4);

        let report = project.report();
        assert_eq!(report["outcome"], "ABORTED");
        assert_eq!(report["final_state"], "DONE_ABORTED");
        assert!(report["halt_reason"].as_str().unwrap().contains("detector"));
        assert_eq!(project.corrector_calls(), 0);
    }

    #[test]
    fn test_detector_crash_without_output_aborts_with_exit_4() {
        let project = Project::new();
        project.script("detect.sh", "echo 'Traceback: ImportError' >&2\nexit 1\n");
        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(4);

        let report = project.report();
        assert_eq!(report["final_state"], "DONE_ABORTED");
        assert!(report["halt_reason"].as_str().unwrap().contains("ImportError"));
        assert_eq!(project.corrector_calls(), 0);
    }

    #[test]
    fn test_corrector_fault_aborts_with_exit_4() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project.script("correct.sh", "cat >/dev/null\necho 'model unavailable' >&2\nexit 1\n");
        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(4);

        let report = project.report();
        assert_eq!(report["final_state"], "DONE_ABORTED");
        assert_eq!(report["healing_attempts"], 0);
    }

    #[test]
    fn test_graph_encoding_matches_relay() {
        let relay = Project::new();
        relay.detector_reports(ISSUE_JSON);
        relay.verifier_always_fails();
        relay
            .run()
            .args(["--max-iterations", "2", "--output", "report.json"])
            .assert()
            .code(3);

        let graph = Project::new();
        graph.detector_reports(ISSUE_JSON);
        graph.verifier_always_fails();
        graph
            .run()
            .args(["--graph", "--max-iterations", "2", "--output", "report.json"])
            .assert()
            .code(3);

        let (a, b) = (relay.report(), graph.report());
        assert_eq!(a["encoding"], "relay");
        assert_eq!(b["encoding"], "graph");
        for key in ["outcome", "final_state", "healing_attempts", "detected_issues"] {
            assert_eq!(a[key], b[key], "{key} differs between encodings");
        }
        assert_eq!(
            a["fix_history"].as_array().unwrap().len(),
            b["fix_history"].as_array().unwrap().len()
        );
    }

    #[test]
    fn test_config_file_sets_budget() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project.verifier_always_fails();
        fs::create_dir_all(project.path().join(".mend")).unwrap();
        fs::write(
            project.path().join(".mend/mend.toml"),
            "[pipeline]\nmax_iterations = 1\n",
        )
        .unwrap();

        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(3);
        assert_eq!(project.report()["max_iterations"], 1);
        assert_eq!(project.corrector_calls(), 1);
    }

    #[test]
    fn test_invalid_env_value_is_misconfiguration() {
        let project = Project::new();
        project
            .run()
            .env("MEND_MAX_ITERATIONS", "lots")
            .assert()
            .code(2)
            .stderr(predicate::str::contains("MEND_MAX_ITERATIONS"));
    }

    #[test]
    fn test_malformed_config_is_misconfiguration() {
        let project = Project::new();
        let bad = project.path().join("bad.toml");
        fs::write(&bad, "[pipeline\nmax_iterations =").unwrap();
        project
            .run()
            .arg("--config")
            .arg(&bad)
            .assert()
            .code(2);
    }

    #[test]
    fn test_invalid_artifact_glob_is_misconfiguration() {
        let project = Project::new();
        fs::create_dir_all(project.path().join(".mend")).unwrap();
        fs::write(
            project.path().join(".mend/mend.toml"),
            "[artifacts]\ninclude = [\"[\"]\n",
        )
        .unwrap();
        project
            .run()
            .assert()
            .code(2)
            .stderr(predicate::str::contains("artifacts.include"));
        assert_eq!(project.corrector_calls(), 0);
    }
}

// =============================================================================
// Graph Rendering
// =============================================================================

mod graph_rendering {
    use super::*;

    #[test]
    fn test_graph_defaults_to_mermaid() {
        mend()
            .arg("graph")
            .assert()
            .success()
            .stdout(predicate::str::starts_with("stateDiagram-v2"))
            .stdout(predicate::str::contains("ISSUES_FOUND --> CORRECTING"));
    }

    #[test]
    fn test_graph_dot_and_table() {
        mend()
            .args(["graph", "--format", "dot"])
            .assert()
            .success()
            .stdout(predicate::str::contains("digraph mend"));

        mend()
            .args(["graph", "--format", "table"])
            .assert()
            .success()
            .stdout(predicate::str::contains("attempts += 1"))
            .stdout(predicate::str::contains("DONE_ABORTED"));
    }

    #[test]
    fn test_graph_rejects_unknown_format() {
        mend().args(["graph", "--format", "svg"]).assert().code(2);
    }
}

// =============================================================================
// Telemetry
// =============================================================================

mod telemetry {
    use super::*;

    #[test]
    fn test_run_persists_telemetry() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project.run().assert().code(0);

        let runs_dir = project.path().join(".mend/telemetry/runs");
        let runs: Vec<_> = fs::read_dir(&runs_dir).unwrap().collect();
        assert_eq!(runs.len(), 1);
        assert!(!project.path().join(".mend/telemetry/current-run.json").exists());

        mend()
            .arg("telemetry")
            .arg(project.path())
            .arg("--validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("Events:"))
            .stdout(predicate::str::contains("detector:sh"))
            .stdout(predicate::str::contains("consistent"));
    }

    #[test]
    fn test_telemetry_disabled_in_config() {
        let project = Project::new();
        fs::create_dir_all(project.path().join(".mend")).unwrap();
        fs::write(
            project.path().join(".mend/mend.toml"),
            "[telemetry]\nenabled = false\n",
        )
        .unwrap();
        project.run().assert().code(0);
        assert!(!project.path().join(".mend/telemetry/runs").exists());
    }

    #[test]
    fn test_unwritable_telemetry_dir_does_not_change_outcome() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        fs::create_dir_all(project.path().join(".mend/telemetry")).unwrap();
        fs::write(project.path().join(".mend/telemetry/runs"), "").unwrap();

        project
            .run()
            .args(["--output", "report.json"])
            .assert()
            .code(0);
        assert_eq!(project.report()["outcome"], "SUCCESS");
        assert_eq!(project.corrector_calls(), 1);
    }

    #[test]
    fn test_telemetry_lost_mid_run_keeps_exit_code() {
        let project = Project::new();
        project.detector_reports(ISSUE_JSON);
        project.verifier_always_fails();
        // The corrector replaces the runs directory with a file, so the final save fails.
        project.script(
            "correct.sh",
            "cat >/dev/null\necho call >> corrector.calls\nrm -rf .mend/telemetry/runs\ntouch .mend/telemetry/runs\necho 'tried'\n",
        );

        project
            .run()
            .args(["--max-iterations", "1", "--output", "report.json"])
            .assert()
            .code(3);
        assert_eq!(project.report()["outcome"], "EXHAUSTED");
    }

    #[test]
    fn test_telemetry_without_runs_fails() {
        let project = Project::new();
        mend()
            .arg("telemetry")
            .arg(project.path())
            .assert()
            .code(1)
            .stderr(predicate::str::contains("No telemetry runs"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let project = Project::new();
        mend()
            .args(["config", "--target"])
            .arg(project.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("max_iterations = 10"))
            .stdout(predicate::str::contains("pylint"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let project = Project::new();
        mend()
            .args(["config", "--target"])
            .arg(project.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created mend.toml"));
        assert!(project.path().join(".mend/mend.toml").exists());

        mend()
            .args(["config", "--target"])
            .arg(project.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let project = Project::new();
        fs::create_dir_all(project.path().join(".mend")).unwrap();
        fs::write(
            project.path().join(".mend/mend.toml"),
            "[pipeline]\nmax_iterations = 500\n",
        )
        .unwrap();
        mend()
            .args(["config", "--target"])
            .arg(project.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("unusually high"));
    }
}
