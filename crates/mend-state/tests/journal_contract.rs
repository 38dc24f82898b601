//! Contract tests for the in-memory journal fake.

use chrono::Utc;
use mend_state::fakes::MemoryJournal;
use mend_state::{CiEventRow, FixRow, Journal, JournalError, RunPatch, RunRow, TraceRow};

fn sample_run(run_id: &str) -> RunRow {
    RunRow::new(
        run_id,
        "https://github.com/org/repo",
        "ACME",
        "Jordan",
        "ACME_JORDAN_AI_Fix",
    )
}

fn sample_fix(run_id: &str, file: &str) -> FixRow {
    FixRow {
        fix_id: uuid::Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        file_path: file.to_string(),
        bug_type: "IMPORT".to_string(),
        line_number: 1,
        description: "No module named 'requests'".to_string(),
        fix_description: "rule-based fix for IMPORT".to_string(),
        original_code: String::new(),
        fixed_code: "requests\n".to_string(),
        status: "applied".to_string(),
        commit_sha: None,
        commit_message: None,
        confidence_score: 0.95,
        model_used: "rule-based".to_string(),
        applied_at: Utc::now(),
    }
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    let row = journal.get_run("run_1").await.unwrap();
    assert_eq!(row.status, "queued");
    assert_eq!(row.branch_name, "ACME_JORDAN_AI_Fix");
    assert!(row.final_score.is_none());
}

#[tokio::test]
async fn duplicate_create_rejected() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    let err = journal.create_run(sample_run("run_1")).await.unwrap_err();
    assert!(matches!(err, JournalError::DuplicateRun { .. }));
}

#[tokio::test]
async fn update_run_coalesces_unset_fields() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    journal
        .update_run(
            "run_1",
            RunPatch {
                status: "running".to_string(),
                total_commits: Some(2),
                ..RunPatch::default()
            },
        )
        .await
        .unwrap();

    // A later status-only patch must not clobber total_commits.
    journal
        .update_run("run_1", RunPatch::status("failed"))
        .await
        .unwrap();

    let row = journal.get_run("run_1").await.unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.total_commits, Some(2));
}

#[tokio::test]
async fn terminal_run_rejects_further_updates() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    journal
        .update_run(
            "run_1",
            RunPatch {
                status: "passed".to_string(),
                final_score: Some(110.0),
                ..RunPatch::default()
            },
        )
        .await
        .unwrap();

    // The row is terminal now; any further write is rejected.
    let err = journal
        .update_run("run_1", RunPatch::status("failed"))
        .await
        .unwrap_err();
    assert!(matches!(err, JournalError::TerminalRun { .. }));

    // And the stored row is untouched by the rejected patch.
    let row = journal.get_run("run_1").await.unwrap();
    assert_eq!(row.status, "passed");
    assert_eq!(row.final_score, Some(110.0));
}

#[test]
fn terminal_statuses_are_exactly_the_three_end_states() {
    for status in ["passed", "failed", "quarantined"] {
        assert!(mend_state::is_terminal_status(status));
    }
    for status in ["queued", "running", ""] {
        assert!(!mend_state::is_terminal_status(status));
    }
}

#[tokio::test]
async fn fixes_ordered_by_applied_at() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    let mut first = sample_fix("run_1", "a.py");
    let mut second = sample_fix("run_1", "b.py");
    second.applied_at = first.applied_at + chrono::Duration::seconds(5);
    first.applied_at = second.applied_at - chrono::Duration::seconds(10);

    // Insert out of order; query must sort.
    journal.record_fix(second).await.unwrap();
    journal.record_fix(first).await.unwrap();

    let fixes = journal.fixes_for_run("run_1").await.unwrap();
    assert_eq!(fixes.len(), 2);
    assert_eq!(fixes[0].file_path, "a.py");
    assert_eq!(fixes[1].file_path, "b.py");
}

#[tokio::test]
async fn ci_events_ordered_by_iteration() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    for iteration in [3u32, 1, 2] {
        journal
            .record_ci_event(CiEventRow {
                event_id: uuid::Uuid::new_v4().to_string(),
                run_id: "run_1".to_string(),
                iteration,
                status: "failed".to_string(),
                forge_run_id: None,
                failures_before: 1,
                failures_after: 1,
                regression_detected: false,
                rollback_triggered: false,
                rollback_commit_sha: None,
                duration_secs: 1.0,
                triggered_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();
    }

    let events = journal.ci_events_for_run("run_1").await.unwrap();
    let iterations: Vec<u32> = events.iter().map(|e| e.iteration).collect();
    assert_eq!(iterations, vec![1, 2, 3]);
}

#[tokio::test]
async fn traces_ordered_by_step_index() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    for step_index in [21u32, 11, 13] {
        journal
            .record_trace(TraceRow {
                trace_id: uuid::Uuid::new_v4().to_string(),
                run_id: "run_1".to_string(),
                step_index,
                agent_node: "runner".to_string(),
                action_type: "test_execution".to_string(),
                action_label: "ran tests".to_string(),
                payload: None,
                thought_text: None,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let traces = journal.traces_for_run("run_1").await.unwrap();
    let steps: Vec<u32> = traces.iter().map(|t| t.step_index).collect();
    assert_eq!(steps, vec![11, 13, 21]);
}

#[tokio::test]
async fn report_bytes_round_trip() {
    let journal = MemoryJournal::new();
    journal.create_run(sample_run("run_1")).await.unwrap();

    journal
        .store_report("run_1", b"report".to_vec())
        .await
        .unwrap();
    assert_eq!(journal.report_for("run_1"), Some(b"report".to_vec()));

    let err = journal
        .store_report("missing", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JournalError::RunNotFound { .. }));
}
