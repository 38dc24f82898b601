//! In-memory journal fake (testing only)
//!
//! `MemoryJournal` satisfies the [`Journal`] contract without any external
//! dependencies. Every test in the workspace runs against it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::JournalError;
use crate::journal::*;

#[derive(Debug, Default)]
struct RunEntry {
    row: Option<RunRow>,
    fixes: Vec<FixRow>,
    ci_events: Vec<CiEventRow>,
    traces: Vec<TraceRow>,
    report: Option<Vec<u8>>,
}

/// In-memory journal backed by a `HashMap<run_id, RunEntry>`.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    runs: Mutex<HashMap<String, RunEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored report bytes, if any (test inspection helper).
    pub fn report_for(&self, run_id: &str) -> Option<Vec<u8>> {
        let runs = self.runs.lock().unwrap();
        runs.get(run_id).and_then(|e| e.report.clone())
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn create_run(&self, row: RunRow) -> JournalResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs.entry(row.run_id.clone()).or_default();
        if entry.row.is_some() {
            return Err(JournalError::DuplicateRun { run_id: row.run_id });
        }
        entry.row = Some(row);
        Ok(())
    }

    async fn update_run(&self, run_id: &str, patch: RunPatch) -> JournalResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let row = runs
            .get_mut(run_id)
            .and_then(|e| e.row.as_mut())
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        if is_terminal_status(&row.status) {
            return Err(JournalError::TerminalRun {
                run_id: run_id.to_string(),
                status: row.status.clone(),
            });
        }

        row.status = patch.status;
        row.end_time = patch.end_time.or(row.end_time);
        row.total_time_secs = patch.total_time_secs.or(row.total_time_secs);
        row.base_score = patch.base_score.or(row.base_score);
        row.speed_bonus = patch.speed_bonus.or(row.speed_bonus);
        row.efficiency_penalty = patch.efficiency_penalty.or(row.efficiency_penalty);
        row.final_score = patch.final_score.or(row.final_score);
        row.total_failures = patch.total_failures.or(row.total_failures);
        row.total_fixes = patch.total_fixes.or(row.total_fixes);
        row.total_commits = patch.total_commits.or(row.total_commits);
        row.total_iterations = patch.total_iterations.or(row.total_iterations);
        row.quarantine_reason = patch.quarantine_reason.or(row.quarantine_reason.take());
        Ok(())
    }

    async fn record_fix(&self, fix: FixRow) -> JournalResult<String> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&fix.run_id)
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: fix.run_id.clone(),
            })?;
        let id = fix.fix_id.clone();
        entry.fixes.push(fix);
        Ok(id)
    }

    async fn record_ci_event(&self, event: CiEventRow) -> JournalResult<String> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&event.run_id)
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: event.run_id.clone(),
            })?;
        let id = event.event_id.clone();
        entry.ci_events.push(event);
        Ok(id)
    }

    async fn record_trace(&self, trace: TraceRow) -> JournalResult<String> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(&trace.run_id)
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: trace.run_id.clone(),
            })?;
        let id = trace.trace_id.clone();
        entry.traces.push(trace);
        Ok(id)
    }

    async fn store_report(&self, run_id: &str, bytes: Vec<u8>) -> JournalResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let entry = runs
            .get_mut(run_id)
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        entry.report = Some(bytes);
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> JournalResult<RunRow> {
        let runs = self.runs.lock().unwrap();
        runs.get(run_id)
            .and_then(|e| e.row.clone())
            .ok_or_else(|| JournalError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn fixes_for_run(&self, run_id: &str) -> JournalResult<Vec<FixRow>> {
        let runs = self.runs.lock().unwrap();
        let entry = runs.get(run_id).ok_or_else(|| JournalError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        let mut fixes = entry.fixes.clone();
        fixes.sort_by_key(|f| f.applied_at);
        Ok(fixes)
    }

    async fn ci_events_for_run(&self, run_id: &str) -> JournalResult<Vec<CiEventRow>> {
        let runs = self.runs.lock().unwrap();
        let entry = runs.get(run_id).ok_or_else(|| JournalError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        let mut events = entry.ci_events.clone();
        events.sort_by_key(|e| e.iteration);
        Ok(events)
    }

    async fn traces_for_run(&self, run_id: &str) -> JournalResult<Vec<TraceRow>> {
        let runs = self.runs.lock().unwrap();
        let entry = runs.get(run_id).ok_or_else(|| JournalError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        let mut traces = entry.traces.clone();
        traces.sort_by_key(|t| t.step_index);
        Ok(traces)
    }
}
