//! End-to-end orchestrator scenarios against local git fixture
//! repositories, with the in-memory journal, a scripted forge, and an
//! overridden test command so no third-party toolchain is required.

use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use mend_core::{
    cancellation_pair, AgentConfig, AgentContext, BugType, CancelToken, CiStatus,
    CompletionClient, EventBus, FeatureFlags, FinalStatus, FixStatus, Forge, JsonReportRenderer,
    MendError, Orchestrator, ResultsJson, RunSpec, RunStatus, ScriptedForge,
};
use mend_state::fakes::MemoryJournal;
use mend_state::Journal;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// An origin repository the agent can clone from and push back to.
fn make_origin(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init"]);
    git(dir.path(), &["checkout", "-B", "main"]);
    git(dir.path(), &["config", "user.name", "fixture"]);
    git(dir.path(), &["config", "user.email", "fixture@example.com"]);
    for (rel, content) in files {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-m", "fixture"]);
    dir
}

struct Harness {
    journal: Arc<MemoryJournal>,
    bus: Arc<EventBus>,
    repos: tempfile::TempDir,
    outputs: tempfile::TempDir,
}

impl Harness {
    fn context(
        &self,
        forge: Arc<dyn Forge>,
        completion: Option<Arc<dyn CompletionClient>>,
        command_override: Option<Vec<String>>,
        cancel: CancelToken,
    ) -> AgentContext {
        let mut config = AgentConfig::default();
        config.repos_dir = self.repos.path().to_path_buf();
        config.outputs_dir = self.outputs.path().to_path_buf();
        config.ci_poll_timeout_secs = 2;
        config.ci_poll_interval_secs = 1;
        config.runner.command_override = command_override;

        AgentContext {
            config,
            journal: self.journal.clone(),
            bus: self.bus.clone(),
            forge,
            completion,
            renderer: Arc::new(JsonReportRenderer),
            cancel,
        }
    }
}

fn harness() -> Harness {
    Harness {
        journal: Arc::new(MemoryJournal::new()),
        bus: Arc::new(EventBus::new()),
        repos: tempfile::tempdir().unwrap(),
        outputs: tempfile::tempdir().unwrap(),
    }
}

fn spec(run_id: &str, origin: &Path, max_iterations: u32) -> RunSpec {
    RunSpec {
        run_id: run_id.to_string(),
        repo_url: origin.to_string_lossy().to_string(),
        team_name: "ACME".to_string(),
        leader_name: "Jordan".to_string(),
        branch_name: "ACME_JORDAN_AI_Fix".to_string(),
        max_iterations,
        feature_flags: FeatureFlags::default(),
    }
}

fn sh(script: &str) -> Option<Vec<String>> {
    Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

fn read_results(harness: &Harness, run_id: &str) -> ResultsJson {
    let path = harness.outputs.path().join(run_id).join("results.json");
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// Completion fake returning scripted responses in order.
struct ScriptedCompletion {
    responses: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, _system: &str, _user: &str) -> mend_core::Result<String> {
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "[]".to_string()))
    }

    fn model_tag(&self) -> String {
        "scripted-model".to_string()
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Happy path: a green suite scores a full base with the speed bonus and
/// produces an empty fix table.
#[tokio::test]
async fn passing_suite_scores_full_base() {
    let origin = make_origin(&[("tests/test_ok.py", "def test_ok():\n    assert True\n")]);
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("echo '1 passed'; exit 0"),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_pass", origin.path(), 5))
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Passed);
    assert_eq!(state.language, "python");
    assert_eq!(state.framework, "pytest");
    assert_eq!(state.test_exit_code, 0);
    assert!(state.fixes.is_empty());
    assert!(state.ci_runs.is_empty(), "no push means no CI poll");

    let results = read_results(&h, "run_pass");
    assert_eq!(results.final_status, FinalStatus::Passed);
    assert_eq!(results.total_failures, 0);
    assert_eq!(results.total_fixes, 0);
    assert_eq!(results.score.base, 100.0);
    assert!(results.score.total >= 100.0);
    assert!(results.fixes.is_empty());

    let row = h.journal.get_run("run_pass").await.unwrap();
    assert_eq!(row.status, "passed");
    assert_eq!(row.final_score, Some(results.score.total));
}

/// Missing pip dependency: the import rule lands in requirements.txt, the
/// fix is committed and pushed to the healing branch, and the next
/// iteration goes green.
#[tokio::test]
async fn missing_dependency_fixed_through_manifest() {
    let origin = make_origin(&[
        ("requirements.txt", "pytest==8.3.4\n"),
        ("tests/test_api.py", "import requests\n\ndef test_fetch():\n    assert requests\n"),
    ]);
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh(r#"grep -q "^requests$" requirements.txt && exit 0; echo "FAILED tests/test_api.py::test_fetch - ModuleNotFoundError: No module named 'requests'"; exit 1"#),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_dep", origin.path(), 3))
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Passed);
    assert_eq!(state.iteration, 2);
    assert_eq!(state.total_commits, 1);
    assert_eq!(state.fixes.len(), 1);
    assert_eq!(state.fixes[0].file_path, "requirements.txt");
    assert_eq!(state.fixes[0].bug_type, BugType::Import);
    assert_eq!(state.fixes[0].status, FixStatus::Applied);
    assert!(state.fixes[0].commit_sha.is_some());

    let results = read_results(&h, "run_dep");
    assert_eq!(results.final_status, FinalStatus::Passed);
    assert_eq!(results.fixes[0].file, "requirements.txt");
    assert_eq!(results.fixes[0].bug_type, BugType::Import);
    assert!(results.fixes[0].commit_message.starts_with("[AI-AGENT]"));
    assert_eq!(results.total_fixes, 1);

    // The push landed on the healing branch of the origin.
    let message = git_stdout(origin.path(), &["log", "-1", "--format=%s", "ACME_JORDAN_AI_Fix"]);
    assert_eq!(message, "[AI-AGENT] Fix 1 issue(s): IMPORT (iter 1)");
    let requirements = git_stdout(
        origin.path(),
        &["show", "ACME_JORDAN_AI_Fix:requirements.txt"],
    );
    assert!(requirements.contains("requests"));
}

/// Indentation auto-fix: the rule path rewrites the offending line and the
/// second pass goes green.
#[tokio::test]
async fn indentation_failure_auto_fixed() {
    let origin = make_origin(&[(
        "tests/test_app.py",
        "def test_f():\n    x = 1\n        assert x == 1\n",
    )]);
    let h = harness();
    let script = r#"
if grep -q "^        assert" tests/test_app.py; then
  printf '____________________ test_f ____________________\n'
  printf 'FAILED tests/test_app.py::test_f - IndentationError: unexpected indent\n'
  printf 'File "tests/test_app.py", line 3\n'
  exit 1
fi
exit 0
"#;
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh(script),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_indent", origin.path(), 3))
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Passed);
    let fixed: Vec<_> = state
        .fixes
        .iter()
        .filter(|f| f.status == FixStatus::Applied)
        .collect();
    assert_eq!(fixed.len(), 1);
    assert_eq!(fixed[0].bug_type, BugType::Indentation);

    let results = read_results(&h, "run_indent");
    assert_eq!(results.final_status, FinalStatus::Passed);
    let fixed_rows: Vec<_> = results
        .fixes
        .iter()
        .filter(|f| matches!(f.status, mend_core::domain::PublicFixStatus::Fixed))
        .collect();
    assert_eq!(fixed_rows.len(), 1);
    assert_eq!(fixed_rows[0].bug_type, BugType::Indentation);
}

/// Iteration-budget exhaustion: a suite that never converges stops at
/// max_iterations with one commit per iteration.
#[tokio::test]
async fn budget_exhaustion_stops_at_max_iterations() {
    let origin = make_origin(&[(
        "tests/test_app.py",
        "def test_f():\nassert_something()\n",
    )]);
    let h = harness();
    let script = r#"
printf '____________________ test_f ____________________\n'
printf 'FAILED tests/test_app.py::test_f - IndentationError: expected an indented block\n'
printf 'File "tests/test_app.py", line 2\n'
exit 1
"#;
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("failure")),
        None,
        sh(script),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_budget", origin.path(), 3))
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.iteration, 3);
    assert_eq!(state.total_commits, 3);
    assert_eq!(state.ci_runs.len(), 3);

    let results = read_results(&h, "run_budget");
    assert_eq!(results.final_status, FinalStatus::Failed);
    assert_eq!(results.ci_log.len(), 3);
    assert!(results.ci_log.iter().all(|c| c.status == "failed"));
    // One applied fix per iteration; every one carries a SHA.
    assert_eq!(results.total_fixes, 3);
    let fixed_rows = results
        .fixes
        .iter()
        .filter(|f| matches!(f.status, mend_core::domain::PublicFixStatus::Fixed))
        .count();
    assert_eq!(results.total_fixes as usize, fixed_rows);
    assert!(state
        .fixes
        .iter()
        .filter(|f| f.status == FixStatus::Applied)
        .all(|f| f.commit_sha.is_some()));

    let row = h.journal.get_run("run_budget").await.unwrap();
    assert_eq!(row.total_iterations, Some(3));
}

/// Completion fallback: nothing parseable in the output, the completion
/// service supplies both the failure and the whole-file patch.
#[tokio::test]
async fn completion_fallback_drives_fix_path() {
    let origin = make_origin(&[(
        "lib/cart.rb",
        "class Cart\n  def total\n    7\n  end\nend\n",
    )]);
    let h = harness();
    let completion = ScriptedCompletion::new(vec![
        // Analyzer fallback: one LOGIC failure.
        r#"[{"file_path": "lib/cart.rb", "test_name": "test_total", "line_number": 3, "error_message": "expected 10 got 7", "bug_type": "LOGIC"}]"#,
        // Synthesizer whole-file patch.
        "class Cart\n  def total\n    10\n  end\nend\n",
        // Second-iteration analyzer fallback: nothing left.
        "[]",
    ]);
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        Some(Arc::new(completion)),
        sh("echo 'suite exited with status 1'; exit 1"),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_llm", origin.path(), 3))
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Passed, "CI green ends the run");
    assert_eq!(state.fixes.len(), 1);
    assert_eq!(state.fixes[0].model_used, "scripted-model");
    assert!((state.fixes[0].confidence - 0.75).abs() < f64::EPSILON);

    let message = git_stdout(origin.path(), &["log", "-1", "--format=%s", "ACME_JORDAN_AI_Fix"]);
    assert_eq!(message, "[AI-AGENT] Fix 1 issue(s): LOGIC (iter 1)");
    let patched = git_stdout(origin.path(), &["show", "ACME_JORDAN_AI_Fix:lib/cart.rb"]);
    assert!(patched.contains("10"));
}

/// Workflow bootstrap: a repo with no CI gets a minimal workflow committed
/// once, then polling resumes.
#[tokio::test]
async fn bootstrap_commits_workflow_once() {
    let origin = make_origin(&[(
        "tests/test_app.py",
        "def test_f():\nassert_something()\n",
    )]);
    let h = harness();
    let script = r#"
printf 'FAILED tests/test_app.py::test_f - IndentationError: expected an indented block\n'
printf 'File "tests/test_app.py", line 2\n'
exit 1
"#;
    // No workflow on the forge; once bootstrapped, the next poll sees green.
    let forge = ScriptedForge::new(
        false,
        vec![Some(mend_core::ForgeRun {
            id: 7,
            status: mend_core::ForgeRunStatus::Completed,
            conclusion: Some("success".to_string()),
        })],
    );
    let ctx = h.context(Arc::new(forge), None, sh(script), CancelToken::never());

    let state = Orchestrator::new(ctx)
        .execute(spec("run_boot", origin.path(), 1))
        .await
        .unwrap();

    assert!(state.ci_workflow_created);
    // First CiRun is the internal no_ci observation, second the real poll.
    assert_eq!(state.ci_runs[0].status, CiStatus::NoCi);
    assert_eq!(state.ci_runs[1].status, CiStatus::Passed);

    // The workflow file landed on the healing branch with the prefix.
    let workflow = git_stdout(
        origin.path(),
        &["show", "ACME_JORDAN_AI_Fix:.github/workflows/mend-ci.yml"],
    );
    assert!(workflow.contains("name: mend-ci"));
    let messages = git_stdout(
        origin.path(),
        &["log", "--format=%s", "ACME_JORDAN_AI_Fix"],
    );
    assert!(messages.contains("[AI-AGENT] Add CI workflow"));
    for line in messages.lines().filter(|l| *l != "fixture") {
        assert!(line.starts_with("[AI-AGENT]"), "commit without prefix: {line}");
    }

    // The public log never says no_ci.
    let results = read_results(&h, "run_boot");
    assert!(results.ci_log.iter().all(|c| c.status != "no_ci"));
    assert_eq!(results.ci_log[0].status, "failed");
    assert_eq!(results.ci_log[1].status, "passed");
}

/// Missing test binary: exit 127 is data, and the run lands at the scorer
/// as FAILED.
#[tokio::test]
async fn missing_test_binary_fails_cleanly() {
    let origin = make_origin(&[("app.py", "x = 1\n")]);
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        Some(vec!["mend-no-such-binary-xyz".to_string()]),
        CancelToken::never(),
    );

    let state = Orchestrator::new(ctx)
        .execute(spec("run_127", origin.path(), 2))
        .await
        .unwrap();

    assert_eq!(state.test_exit_code, 127);
    assert_eq!(state.status, RunStatus::Failed);
    let results = read_results(&h, "run_127");
    assert_eq!(results.final_status, FinalStatus::Failed);
    assert_eq!(results.total_fixes, 0);
}

/// Cancellation: the orchestrator observes the token between nodes and
/// fails the run with a structured terminal surface.
#[tokio::test]
async fn cancellation_fails_the_run() {
    let origin = make_origin(&[("tests/test_ok.py", "def test_ok():\n    assert True\n")]);
    let h = harness();
    let (handle, token) = cancellation_pair();
    handle.cancel();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("exit 0"),
        token,
    );

    let err = Orchestrator::new(ctx)
        .execute(spec("run_cancel", origin.path(), 2))
        .await
        .unwrap_err();
    assert!(matches!(err, MendError::Cancelled));

    let row = h.journal.get_run("run_cancel").await.unwrap();
    assert_eq!(row.status, "failed");
}

/// The terminal event is emitted exactly once with the final verdict.
#[tokio::test]
async fn run_complete_event_reaches_subscribers() {
    let origin = make_origin(&[("tests/test_ok.py", "def test_ok():\n    assert True\n")]);
    let h = harness();
    let mut rx = h.bus.subscribe("run_events");
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("exit 0"),
        CancelToken::never(),
    );

    Orchestrator::new(ctx)
        .execute(spec("run_events", origin.path(), 2))
        .await
        .unwrap();

    let mut complete = None;
    while let Ok(event) = rx.try_recv() {
        if let mend_core::AgentEventKind::RunComplete { final_status, .. } = event.kind {
            assert!(complete.is_none(), "run_complete emitted twice");
            complete = Some(final_status);
        }
    }
    assert_eq!(complete, Some(FinalStatus::Passed));
}

/// Clone failure is fatal and surfaces as a git error after the run row
/// flips to failed.
#[tokio::test]
async fn clone_failure_is_fatal() {
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("exit 0"),
        CancelToken::never(),
    );

    let mut bad_spec = spec("run_noclone", Path::new("/nonexistent/repo"), 2);
    bad_spec.repo_url = "/nonexistent/repo".to_string();
    let err = Orchestrator::new(ctx).execute(bad_spec).await.unwrap_err();
    assert!(matches!(err, MendError::Git(_)));

    let row = h.journal.get_run("run_noclone").await.unwrap();
    assert_eq!(row.status, "failed");
}

/// Protected-branch guard: a branch that resolves to a protected name
/// quarantines the run before any commit is attempted.
#[tokio::test]
async fn protected_branch_quarantines_before_any_git_action() {
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("exit 0"),
        CancelToken::never(),
    );

    // Misconfiguration scenario: the healing branch resolved to `main`.
    let mut misconfigured = spec("run_guard", Path::new("/tmp/none"), 2);
    misconfigured.branch_name = "main".to_string();
    let state = mend_core::RunState::from_spec(&misconfigured);
    h.journal
        .create_run(mend_state::RunRow::new(
            "run_guard",
            &state.repo_url,
            "ACME",
            "Jordan",
            "main",
        ))
        .await
        .unwrap();

    let update = mend_core::publisher::publish(&state, &ctx).await.unwrap();

    assert_eq!(update.status, Some(RunStatus::Quarantined));
    let reason = update.quarantine_reason.unwrap();
    assert!(reason.starts_with("BLOCKED: Refusing to push to protected branch"));
    assert_eq!(update.pushed_this_iteration, Some(false));
    assert!(update.fixes.is_none(), "no commit is attempted");
}

/// Invalid specs are rejected before any side effect.
#[tokio::test]
async fn invalid_spec_rejected_before_side_effects() {
    let h = harness();
    let ctx = h.context(
        Arc::new(ScriptedForge::with_terminal("success")),
        None,
        sh("exit 0"),
        CancelToken::never(),
    );

    let mut bad = spec("run_badspec", Path::new("/tmp/x"), 2);
    bad.branch_name = "main".to_string();
    let err = Orchestrator::new(ctx).execute(bad).await.unwrap_err();
    assert!(matches!(err, MendError::InvalidRunSpec(_)));

    // Nothing was journaled for this run.
    assert!(h.journal.get_run("run_badspec").await.is_err());
}
