//! Synthesizer node: produce a patch per failure.
//!
//! Rule-based fixers run first, dispatched on bug type; the completion
//! service supplies a whole-file patch when no rule matches; IMPORT
//! failures get one last chance at the dependency manifest. Failures that
//! produce no patch are recorded, not raised.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::completion::strip_code_fences;
use crate::context::AgentContext;
use crate::domain::failure::truncate;
use crate::domain::{
    BugType, FixRecord, FixStatus, NodeName, Result, RunState, StateUpdate, TestFailure,
};

const RULE_CONFIDENCE: f64 = 0.95;
const COMPLETION_CONFIDENCE: f64 = 0.75;

// ---------------------------------------------------------------------------
// Rule-based fixers
// ---------------------------------------------------------------------------

/// Pull the missing module name out of a common import error message.
pub fn extract_missing_module(error_message: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"(?i)No module named ['"]([^'"]+)['"]"#).unwrap(),
            Regex::new(r#"(?i)cannot find module ['"]([^'"]+)['"]"#).unwrap(),
        ]
    });
    for pattern in patterns {
        if let Some(caps) = pattern.captures(error_message) {
            let module = caps[1].trim();
            return Some(module.split('.').next().unwrap_or(module).to_string());
        }
    }
    None
}

fn local_module_exists(module: &str, repo_dir: &Path, file_path: &Path) -> bool {
    let parent = file_path.parent().unwrap_or(repo_dir);
    [
        parent.join(format!("{module}.py")),
        parent.join(module).join("__init__.py"),
        repo_dir.join(format!("{module}.py")),
        repo_dir.join(module).join("__init__.py"),
    ]
    .iter()
    .any(|p| p.exists())
}

fn split_keep_newlines(content: &str) -> Vec<String> {
    content.split_inclusive('\n').map(String::from).collect()
}

/// Fix an import failure.
///
/// - `requirements.txt`: append the missing package (idempotent).
/// - `package.json`: add the package under `devDependencies` at `latest`.
/// - Python sources: rewrite absolute local imports to relative ones when
///   the module exists next to the file.
pub fn fix_import(
    failure: &TestFailure,
    file_content: &str,
    file_path: &Path,
    repo_dir: &Path,
) -> Option<String> {
    let missing = extract_missing_module(&failure.error_message)?;
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if file_name == "requirements.txt" {
        let present = file_content.lines().any(|line| {
            let name = line.trim().split("==").next().unwrap_or("").to_lowercase();
            name == missing.to_lowercase()
        });
        if present {
            return None;
        }
        let mut fixed = file_content.to_string();
        if !fixed.is_empty() && !fixed.ends_with('\n') {
            fixed.push('\n');
        }
        fixed.push_str(&missing);
        fixed.push('\n');
        return Some(fixed);
    }

    if file_name == "package.json" {
        let mut pkg: serde_json::Value = serde_json::from_str(file_content).ok()?;
        let obj = pkg.as_object_mut()?;
        let deps = obj
            .entry("devDependencies")
            .or_insert_with(|| json!({}))
            .as_object_mut()?;
        if deps.contains_key(&missing) {
            return None;
        }
        deps.insert(missing, json!("latest"));
        let mut out = serde_json::to_string_pretty(&pkg).ok()?;
        out.push('\n');
        return Some(out);
    }

    // Source-level Python rewrite (absolute → relative).
    if file_path.extension().and_then(|e| e.to_str()) != Some("py") {
        return None;
    }
    if !local_module_exists(&missing, repo_dir, file_path) {
        return None;
    }

    let escaped = regex::escape(&missing);
    let pat_from =
        Regex::new(&format!(r"^(\s*)from\s+{escaped}(\.[\w.]+)?\s+import\s+(.+)$")).ok()?;
    let pat_import =
        Regex::new(&format!(r"^(\s*)import\s+{escaped}(\.[\w.]+)?(\s+as\s+\w+)?\s*$")).ok()?;

    let mut lines = split_keep_newlines(file_content);
    let target = (failure.line_number as usize)
        .saturating_sub(1)
        .min(lines.len().saturating_sub(1));
    let order: Vec<usize> =
        std::iter::once(target).chain((0..lines.len()).filter(|i| *i != target)).collect();

    for idx in order {
        let line = lines[idx].trim_end_matches(['\n', '\r']).to_string();
        if line.trim_start().starts_with("from .") {
            continue;
        }
        if let Some(caps) = pat_from.captures(&line) {
            let indent = &caps[1];
            let submodule = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let imported = &caps[3];
            lines[idx] = format!("{indent}from .{missing}{submodule} import {imported}\n");
            return Some(lines.concat());
        }
        if let Some(caps) = pat_import.captures(&line) {
            let indent = &caps[1];
            let submodule = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let alias = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            lines[idx] = format!("{indent}from . import {missing}{submodule}{alias}\n");
            return Some(lines.concat());
        }
    }

    None
}

/// Expand tabs to the next multiple of `tabstop`, Python-style.
fn expand_tabs(line: &str, tabstop: usize) -> String {
    let mut out = String::with_capacity(line.len());
    let mut column = 0usize;
    for c in line.chars() {
        match c {
            '\t' => {
                let spaces = tabstop - (column % tabstop);
                out.extend(std::iter::repeat(' ').take(spaces));
                column += spaces;
            }
            '\n' | '\r' => {
                out.push(c);
                column = 0;
            }
            _ => {
                out.push(c);
                column += 1;
            }
        }
    }
    out
}

/// Fix indentation issues on the offending line.
pub fn fix_indentation(failure: &TestFailure, file_content: &str) -> Option<String> {
    let mut lines = split_keep_newlines(file_content);
    let target = (failure.line_number as usize).checked_sub(1)?;
    if target >= lines.len() {
        return None;
    }

    let line = lines[target].clone();
    let indent_len = line.len() - line.trim_start().len();
    let indent = &line[..indent_len];

    // Mixed tabs and spaces in the indent.
    if line.contains('\t') && indent.contains(' ') {
        lines[target] = expand_tabs(&line, 4);
        return Some(lines.concat());
    }

    let message = failure.error_message.to_lowercase();
    if message.contains("unexpected indent") {
        if indent.len() >= 4 {
            lines[target] = format!("{}{}", &indent[4..], line.trim_start());
            return Some(lines.concat());
        }
        return None;
    }

    if message.contains("expected an indented block") {
        lines[target] = format!("{indent}    {}", line.trim_start());
        return Some(lines.concat());
    }

    None
}

const BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "for", "while", "with", "try", "except", "finally",
];

/// Fix common syntax errors: missing block colon, unbalanced parentheses.
pub fn fix_syntax(failure: &TestFailure, file_content: &str) -> Option<String> {
    let mut lines = split_keep_newlines(file_content);
    let target = (failure.line_number as usize).checked_sub(1)?;
    if target >= lines.len() {
        return None;
    }

    if failure.error_message.to_lowercase().contains("expected ':'") {
        let line = lines[target].clone();
        let stripped = line.trim_end();
        let first_word = stripped.trim_start().split_whitespace().next().unwrap_or("");
        let keyword = first_word.trim_end_matches(':');
        if !stripped.ends_with(':') && BLOCK_KEYWORDS.contains(&keyword) {
            lines[target] = format!("{stripped}:\n");
            return Some(lines.concat());
        }
    }

    let message = &failure.error_message;
    if message.contains("unexpected EOF") || message.contains("SyntaxError") {
        let open = file_content.matches('(').count();
        let close = file_content.matches(')').count();
        if open > close {
            lines.push(format!("{}\n", ")".repeat(open - close)));
            return Some(lines.concat());
        }
    }

    None
}

/// Fix lint findings that are safe to auto-correct.
pub fn fix_linting(failure: &TestFailure, file_content: &str) -> Option<String> {
    let mut lines = split_keep_newlines(file_content);
    let target = (failure.line_number as usize).checked_sub(1)?;
    if target >= lines.len() {
        return None;
    }

    if failure
        .error_message
        .to_lowercase()
        .contains("trailing whitespace")
    {
        lines[target] = format!("{}\n", lines[target].trim_end());
        return Some(lines.concat());
    }

    // Line-too-long and friends are not safely auto-fixable.
    None
}

/// The manifest to target for dependency-level import fixes.
pub fn guess_import_manifest(repo_dir: &Path) -> Option<PathBuf> {
    for name in ["requirements.txt", "package.json"] {
        let path = repo_dir.join(name);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

fn rule_fix(
    failure: &TestFailure,
    file_content: &str,
    file_path: &Path,
    repo_dir: &Path,
) -> Option<String> {
    match failure.bug_type {
        BugType::Import => fix_import(failure, file_content, file_path, repo_dir),
        BugType::Indentation => fix_indentation(failure, file_content),
        BugType::Syntax => fix_syntax(failure, file_content),
        BugType::Linting => fix_linting(failure, file_content),
        BugType::Logic | BugType::TypeError => None,
    }
}

// ---------------------------------------------------------------------------
// Completion path
// ---------------------------------------------------------------------------

/// Context window around the failing line, with the offender marked.
fn completion_context(failure: &TestFailure, file_content: &str) -> String {
    let lines: Vec<&str> = file_content.lines().collect();
    let line = failure.line_number as usize;
    let start = line.saturating_sub(10).max(1);
    let end = (line + 10).min(lines.len());
    (start..=end)
        .filter_map(|n| {
            lines.get(n - 1).map(|text| {
                let marker = if n == line { ">>>" } else { "   " };
                format!("{marker} {n}: {text}")
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn completion_fix(
    failure: &TestFailure,
    file_content: &str,
    language: &str,
    ctx: &AgentContext,
) -> Option<String> {
    let completion = ctx.completion.as_ref()?;

    let prompt = format!(
        "Fix the following {language} code error.\n\n\
         **Error**: {}\n\
         **Bug type**: {}\n\
         **File**: {}\n\
         **Line**: {}\n\n\
         **Code context** (>>> marks the failing line):\n```\n{}\n```\n\n\
         **Full file** (first 3000 chars):\n```{language}\n{}\n```\n\n\
         Return ONLY the complete fixed file content. No markdown fences, no explanation.",
        failure.error_message,
        failure.bug_type,
        failure.file_path,
        failure.line_number,
        completion_context(failure, file_content),
        truncate(file_content.to_string(), 3000),
    );

    let response = completion
        .complete(
            "You are an expert code fixer. Return ONLY the corrected full file content. \
             Make minimal changes. Preserve formatting and style.",
            &prompt,
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "completion fix request failed");
            e
        })
        .ok()?;

    let fixed = strip_code_fences(&response);
    if !fixed.is_empty() && fixed != file_content {
        Some(fixed)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Generate a fix for each failure; write patches to disk.
pub async fn synthesize(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Synthesizer);
    let repo_root = state.repo_dir.clone();

    if state.failures.is_empty() {
        events.thought("synthesizer", "No failures to fix ✓", step);
        return Ok(StateUpdate {
            current_node: Some(NodeName::Synthesizer),
            ..StateUpdate::default()
        });
    }

    events.thought(
        "synthesizer",
        format!("Generating fixes for {} failure(s)…", state.failures.len()),
        step,
    );

    let mut fixes = state.fixes.clone();
    let mut applied_count = 0u32;
    let mut failed_count = 0u32;
    let mut skipped_count = 0u32;

    for (i, failure) in state.failures.iter().enumerate() {
        let fix_step = step + i as u32 + 1;

        // Unknown-path guard: IMPORT failures can retarget a manifest,
        // everything else is recorded as skipped.
        let mut rel_path = failure.file_path.trim().to_string();
        if rel_path.is_empty() || rel_path == "unknown" {
            let manifest = if failure.bug_type == BugType::Import {
                guess_import_manifest(&repo_root)
            } else {
                None
            };
            match manifest {
                Some(manifest) => {
                    rel_path = manifest
                        .strip_prefix(&repo_root)
                        .unwrap_or(&manifest)
                        .to_string_lossy()
                        .replace('\\', "/");
                    events.thought(
                        "synthesizer",
                        format!(
                            "Failure had unknown file path; targeting {rel_path} for dependency fix"
                        ),
                        fix_step,
                    );
                }
                None => {
                    warn!(
                        error = %truncate(failure.error_message.clone(), 100),
                        "skipping failure with unknown file path"
                    );
                    skipped_count += 1;
                    fixes.push(FixRecord::unpatched(
                        failure.file_path.clone(),
                        failure.bug_type,
                        failure.line_number,
                        failure.error_message.clone(),
                        "Unknown file path — skipped",
                        FixStatus::Skipped,
                    ));
                    continue;
                }
            }
        }

        let mut file_path = repo_root.join(&rel_path);
        if !file_path.exists() {
            warn!(file = %file_path.display(), "file not found");
            skipped_count += 1;
            fixes.push(FixRecord::unpatched(
                rel_path,
                failure.bug_type,
                failure.line_number,
                failure.error_message.clone(),
                "File not found — skipped",
                FixStatus::Skipped,
            ));
            continue;
        }

        let mut original_code = std::fs::read_to_string(&file_path)
            .unwrap_or_else(|_| String::new());

        // 1. Rule path.
        let mut model_used = "rule-based".to_string();
        let mut fixed_code = rule_fix(failure, &original_code, &file_path, &repo_root);

        // 2. Completion path.
        if fixed_code.is_none() {
            if let Some(fixed) =
                completion_fix(failure, &original_code, &state.language, ctx).await
            {
                model_used = ctx
                    .completion
                    .as_ref()
                    .map(|c| c.model_tag())
                    .unwrap_or_else(|| "completion".to_string());
                fixed_code = Some(fixed);
            }
        }

        // 3. Manifest fallback for IMPORT failures.
        if fixed_code.is_none() && failure.bug_type == BugType::Import {
            if let Some(manifest) = guess_import_manifest(&repo_root) {
                if manifest != file_path {
                    if let Ok(manifest_original) = std::fs::read_to_string(&manifest) {
                        if let Some(manifest_fixed) =
                            fix_import(failure, &manifest_original, &manifest, &repo_root)
                        {
                            rel_path = manifest
                                .strip_prefix(&repo_root)
                                .unwrap_or(&manifest)
                                .to_string_lossy()
                                .replace('\\', "/");
                            file_path = manifest;
                            original_code = manifest_original;
                            model_used = "rule-based".to_string();
                            fixed_code = Some(manifest_fixed);
                        }
                    }
                }
            }
        }

        let Some(fixed_code) = fixed_code else {
            events.thought(
                "synthesizer",
                format!(
                    "No patch generated for {rel_path}:{} ({})",
                    failure.line_number, failure.bug_type
                ),
                fix_step,
            );
            failed_count += 1;
            let mut record = FixRecord::unpatched(
                rel_path.clone(),
                failure.bug_type,
                failure.line_number,
                failure.error_message.clone(),
                "Could not generate fix",
                FixStatus::Failed,
            );
            record.original_code = truncate(original_code, 500);
            record.model_used = model_used;
            fixes.push(record);
            events.fix_applied(
                rel_path,
                failure.bug_type,
                failure.line_number,
                FixStatus::Failed,
                0.0,
                None,
                fix_step,
            );
            continue;
        };

        // Apply the patch.
        std::fs::write(&file_path, &fixed_code)?;
        let confidence = if model_used == "rule-based" {
            RULE_CONFIDENCE
        } else {
            COMPLETION_CONFIDENCE
        };

        let record = FixRecord {
            file_path: rel_path.clone(),
            bug_type: failure.bug_type,
            line_number: failure.line_number,
            description: failure.error_message.clone(),
            fix_description: format!("{model_used} fix for {}", failure.bug_type),
            original_code: truncate(original_code.clone(), 500),
            fixed_code: truncate(fixed_code.clone(), 500),
            status: FixStatus::Applied,
            commit_sha: None,
            commit_message: String::new(),
            confidence,
            model_used: model_used.clone(),
        };
        fixes.push(record.clone());
        applied_count += 1;

        ctx.journal
            .record_fix(mend_state::FixRow {
                fix_id: Uuid::new_v4().to_string(),
                run_id: state.run_id.clone(),
                file_path: rel_path.clone(),
                bug_type: failure.bug_type.as_str().to_string(),
                line_number: failure.line_number,
                description: failure.error_message.clone(),
                fix_description: record.fix_description.clone(),
                original_code: truncate(original_code, 2000),
                fixed_code: truncate(fixed_code, 2000),
                status: FixStatus::Applied.as_str().to_string(),
                commit_sha: None,
                commit_message: None,
                confidence_score: confidence,
                model_used: model_used.clone(),
                applied_at: Utc::now(),
            })
            .await?;

        events.fix_applied(
            rel_path.clone(),
            failure.bug_type,
            failure.line_number,
            FixStatus::Applied,
            confidence,
            None,
            fix_step,
        );
        events.thought(
            "synthesizer",
            format!(
                "Fixed {rel_path}:{} ({}) via {model_used}",
                failure.line_number, failure.bug_type
            ),
            fix_step,
        );
    }

    ctx.trace(
        state,
        NodeName::Synthesizer,
        "fix_generation",
        format!(
            "Generated {} fix(es) for iteration {}",
            fixes.len() - state.fixes.len(),
            state.iteration
        ),
        Some(json!({
            "fixes_applied": applied_count,
            "fixes_failed": failed_count,
            "fixes_skipped": skipped_count,
        })),
        None,
    )
    .await?;

    Ok(StateUpdate {
        fixes: Some(fixes),
        current_node: Some(NodeName::Synthesizer),
        ..StateUpdate::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_failure(error: &str, line: u32) -> TestFailure {
        TestFailure::new("sample.py", "sample_test", line, error, BugType::Import, "")
    }

    #[test]
    fn extracts_missing_module_names() {
        assert_eq!(
            extract_missing_module("ModuleNotFoundError: No module named 'requests'"),
            Some("requests".to_string())
        );
        assert_eq!(
            extract_missing_module("Error: Cannot find module 'lodash'"),
            Some("lodash".to_string())
        );
        assert_eq!(
            extract_missing_module("No module named 'pkg.sub.mod'"),
            Some("pkg".to_string())
        );
        assert_eq!(extract_missing_module("AssertionError: boom"), None);
    }

    #[test]
    fn requirements_append_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let req = dir.path().join("requirements.txt");
        let original = "pytest==8.3.4\n";

        let failure = import_failure("No module named 'requests'", 1);
        let fixed = fix_import(&failure, original, &req, dir.path()).unwrap();
        assert_eq!(fixed, "pytest==8.3.4\nrequests\n");

        // Second application is a no-op.
        assert!(fix_import(&failure, &fixed, &req, dir.path()).is_none());
    }

    #[test]
    fn requirements_append_handles_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let req = dir.path().join("requirements.txt");
        let failure = import_failure("No module named 'requests'", 1);
        let fixed = fix_import(&failure, "pytest==8.3.4", &req, dir.path()).unwrap();
        assert_eq!(fixed, "pytest==8.3.4\nrequests\n");
    }

    #[test]
    fn package_json_gains_dev_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("package.json");
        let original = r#"{"name":"demo","devDependencies":{"vitest":"^1.6.0"}}"#;

        let failure = import_failure("Cannot find module 'lodash'", 1);
        let fixed = fix_import(&failure, original, &pkg, dir.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed["devDependencies"]["lodash"], "latest");
        assert!(fixed.ends_with('\n'));

        // Already present → no patch.
        assert!(fix_import(&failure, &fixed, &pkg, dir.path()).is_none());
    }

    #[test]
    fn rewrites_local_absolute_import_to_relative() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("pkg");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("utils.py"), "def helper():\n    return 1\n").unwrap();

        let source = "from utils import helper\n\nprint(helper())\n";
        let source_path = pkg_dir.join("app.py");
        std::fs::write(&source_path, source).unwrap();

        let failure = import_failure("ModuleNotFoundError: No module named 'utils'", 1);
        let fixed = fix_import(&failure, source, &source_path, dir.path()).unwrap();
        assert!(fixed.contains("from .utils import helper"));
    }

    #[test]
    fn rewrites_plain_import_to_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("utils.py"), "x = 1\n").unwrap();
        let source_path = dir.path().join("app.py");
        let source = "import utils\n\nprint(utils.x)\n";
        std::fs::write(&source_path, source).unwrap();

        let failure = import_failure("No module named 'utils'", 1);
        let fixed = fix_import(&failure, source, &source_path, dir.path()).unwrap();
        assert!(fixed.starts_with("from . import utils\n"));
    }

    #[test]
    fn import_rewrite_requires_local_module() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("app.py");
        let source = "import requests\n";
        std::fs::write(&source_path, source).unwrap();

        let failure = import_failure("No module named 'requests'", 1);
        assert!(fix_import(&failure, source, &source_path, dir.path()).is_none());
    }

    #[test]
    fn indentation_expands_mixed_tabs() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            2,
            "TabError: inconsistent use of tabs and spaces in indentation",
            BugType::Indentation,
            "",
        );
        let content = "def f():\n\t  return 1\n";
        let fixed = fix_indentation(&failure, content).unwrap();
        assert!(!fixed.contains('\t'));
    }

    #[test]
    fn indentation_removes_one_level_on_unexpected_indent() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            3,
            "IndentationError: unexpected indent",
            BugType::Indentation,
            "",
        );
        let content = "def f():\n    return 1\n        return 2\n";
        let fixed = fix_indentation(&failure, content).unwrap();
        assert_eq!(fixed, "def f():\n    return 1\n    return 2\n");
    }

    #[test]
    fn indentation_adds_level_on_expected_block() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            2,
            "IndentationError: expected an indented block",
            BugType::Indentation,
            "",
        );
        let content = "def f():\nreturn 1\n";
        let fixed = fix_indentation(&failure, content).unwrap();
        assert_eq!(fixed, "def f():\n    return 1\n");
    }

    #[test]
    fn syntax_appends_missing_colon() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            1,
            "SyntaxError: expected ':'",
            BugType::Syntax,
            "",
        );
        let content = "def f()\n    return 1\n";
        let fixed = fix_syntax(&failure, content).unwrap();
        assert!(fixed.starts_with("def f():\n"));
    }

    #[test]
    fn syntax_balances_parentheses() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            1,
            "SyntaxError: unexpected EOF while parsing",
            BugType::Syntax,
            "",
        );
        let content = "x = (1 + (2\n";
        let fixed = fix_syntax(&failure, content).unwrap();
        assert!(fixed.ends_with("))\n"));
    }

    #[test]
    fn linting_trims_trailing_whitespace() {
        let failure = TestFailure::new(
            "a.py",
            "t",
            1,
            "W291 trailing whitespace",
            BugType::Linting,
            "",
        );
        let content = "x = 1   \ny = 2\n";
        let fixed = fix_linting(&failure, content).unwrap();
        assert_eq!(fixed, "x = 1\ny = 2\n");
    }

    #[test]
    fn manifest_preference_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(guess_import_manifest(dir.path()).is_none());

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert!(guess_import_manifest(dir.path())
            .unwrap()
            .ends_with("package.json"));

        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        assert!(guess_import_manifest(dir.path())
            .unwrap()
            .ends_with("requirements.txt"));
    }

    #[test]
    fn expand_tabs_aligns_to_tabstop() {
        assert_eq!(expand_tabs("\tx", 4), "    x");
        assert_eq!(expand_tabs("ab\tx", 4), "ab  x");
        assert_eq!(expand_tabs("abcd\tx", 4), "abcd    x");
    }

    #[test]
    fn completion_context_marks_failing_line() {
        let failure = TestFailure::new("a.py", "t", 2, "boom", BugType::Logic, "");
        let content = "line one\nline two\nline three\n";
        let context = completion_context(&failure, content);
        assert!(context.contains(">>> 2: line two"));
        assert!(context.contains("    1: line one") || context.contains("   1: line one"));
    }
}
