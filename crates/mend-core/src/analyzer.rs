//! Analyzer node: parse runner output into structured failures and
//! classify each into one of the six canonical bug classes.
//!
//! Rule-based parsing comes first, dispatched by framework; the completion
//! service is a fallback for output no parser understands. Parsers are pure
//! over the captured text.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::completion::strip_code_fences;
use crate::context::AgentContext;
use crate::domain::failure::{truncate, ERROR_MESSAGE_MAX, RAW_OUTPUT_MAX};
use crate::domain::{BugType, NodeName, Result, RunState, StateUpdate, TestFailure};

// ---------------------------------------------------------------------------
// Classification cascade
// ---------------------------------------------------------------------------

/// Prioritized (pattern, class) rules; first match wins, LOGIC is the
/// default. Patterns are language-agnostic.
fn bug_patterns() -> &'static [(Regex, BugType)] {
    const SYNTAX: &str = concat!(
        r"(?i)SyntaxError|error CS\d+|error TS\d+|ParseError|parse error",
        r"|expected.*\btoken\b|unexpected token|syntax error|SyntaxException",
        r"|error\[E\d+\].*expected|\.go:\d+:\d+:.*expected",
        r"|error:.*expected.*;|missing semicolon",
    );
    const INDENTATION: &str = concat!(
        r"(?i)IndentationError|TabError|unexpected indent",
        r"|expected an indented block|inconsistent use of tabs and spaces",
    );
    const IMPORT: &str = concat!(
        r"(?i)ImportError|ModuleNotFoundError|No module named",
        r"|cannot find module|unresolved import|cannot find type",
        r"|missing.*reference|CS0246|package .* is not in GOROOT",
        r"|error\[E0432\]|error\[E0433\]|no required module provides",
        r"|LoadError|cannot load such file|Class .* not found",
        r"|Fatal error.*not found|UndefinedFunctionError",
        r"|module .* is not available|Could not resolve",
        r"|error: package .* does not exist|import .* could not be resolved",
    );
    const TYPE_ERROR: &str = concat!(
        r"(?i)TypeError|type.?error|expected.*got|incompatible type",
        r"|CS0029|CS1503|cannot.?convert|Type .* is not assignable",
        r"|type mismatch|expected type|error\[E0308\]",
        r"|cannot use .* as type|incompatible types|found.*required",
        r"|Argument .* must be of type",
    );
    const LINTING: &str = concat!(
        r"(?i)flake8|pylint|eslint|\bE\d{3}\b|\bW\d{3}\b",
        r"|trailing whitespace|line too long|CS8600|nullable",
        r"|clippy|warning\[.*\]|golint|staticcheck|go vet",
        r"|rubocop|standardrb|phpcs|psalm|phpstan|credo|dialyzer",
        r"|hlint|dart analyze|checkstyle|spotbugs|PMD|ktlint|detekt",
    );
    const LOGIC: &str = concat!(
        r"(?i)AssertionError|assert\s|Expected.*received|to equal|toBe",
        r"|not equal|Assert\.Equal|Assert\.True|Xunit|NUnit|MSTest",
        r"|FAIL.*Test|test.*failed|panicked at|assertion failed",
        r"|FAIL:.*Test|--- FAIL:|Failure/Error:|expected.*to\b|RSpec",
        r"|PHPUnit.*Failed|Failed asserting|Assertion.*failed|ExUnit",
        r"|assertEqual|assertRaises",
    );

    static PATTERNS: OnceLock<Vec<(Regex, BugType)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (SYNTAX, BugType::Syntax),
            (INDENTATION, BugType::Indentation),
            (IMPORT, BugType::Import),
            (TYPE_ERROR, BugType::TypeError),
            (LINTING, BugType::Linting),
            (LOGIC, BugType::Logic),
        ]
        .into_iter()
        .map(|(pattern, bug)| (Regex::new(pattern).unwrap(), bug))
        .collect()
    })
}

/// Match an error message against the cascade; LOGIC when nothing hits.
pub fn classify_bug_type(error_message: &str) -> BugType {
    for (pattern, bug_type) in bug_patterns() {
        if pattern.is_match(error_message) {
            return *bug_type;
        }
    }
    BugType::Logic
}

// ---------------------------------------------------------------------------
// Framework parsers
// ---------------------------------------------------------------------------

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Extract failures from pytest output.
pub fn parse_pytest_output(output: &str) -> Vec<TestFailure> {
    static FAILURE_RE: OnceLock<Regex> = OnceLock::new();
    static FILE_LINE_RE: OnceLock<Regex> = OnceLock::new();
    static SECTION_RE: OnceLock<Regex> = OnceLock::new();
    let failure_re = FAILURE_RE
        .get_or_init(|| re(r"(?m)^(?:FAILED|ERROR)\s+([\w/\\.-]+)::(\w+)(?:\s*-\s*(.+))?$"));
    let file_line_re = FILE_LINE_RE.get_or_init(|| re(r#"File "([^"]+)", line (\d+)"#));
    let section_re = SECTION_RE.get_or_init(|| re(r"_{10,}\s+"));

    let mut failures = Vec::new();
    for section in section_re.split(output) {
        let Some(caps) = failure_re.captures(section) else {
            continue;
        };
        let file_path = caps[1].to_string();
        let test_name = caps[2].to_string();
        let error_message = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| truncate(section.to_string(), ERROR_MESSAGE_MAX));

        let line_number = file_line_re
            .captures(section)
            .and_then(|c| c[2].parse().ok())
            .unwrap_or(1);

        let bug_type = classify_bug_type(&error_message);
        failures.push(TestFailure::new(
            file_path,
            test_name,
            line_number,
            error_message.trim(),
            bug_type,
            truncate(section.to_string(), RAW_OUTPUT_MAX),
        ));
    }

    // Plain FAILED/ERROR lines when the sectioned format is absent.
    if failures.is_empty() {
        for line in output.lines() {
            let stripped = line.trim();
            let Some(rest) = stripped
                .strip_prefix("FAILED ")
                .or_else(|| stripped.strip_prefix("ERROR "))
            else {
                continue;
            };
            let parts: Vec<&str> = rest.split("::").collect();
            let file_path = parts.first().copied().unwrap_or("unknown");
            let test_name = parts.get(1).copied().unwrap_or("unknown");
            let error_message = if parts.len() > 2 {
                parts[2..].join(" ")
            } else {
                stripped.to_string()
            };
            failures.push(TestFailure::new(
                file_path,
                test_name,
                1,
                error_message.clone(),
                classify_bug_type(&error_message),
                stripped,
            ));
        }
    }

    failures
}

/// Extract failures from jest / vitest style output.
pub fn parse_jest_output(output: &str) -> Vec<TestFailure> {
    static FILE_RE: OnceLock<Regex> = OnceLock::new();
    let file_re = FILE_RE.get_or_init(|| re(r"at.*?[( ]([\w./\\-]+):(\d+):\d+"));

    let mut failures = Vec::new();
    for block in output.split("● ").skip(1) {
        let mut lines = block.trim().lines();
        let Some(header) = lines.next() else {
            continue;
        };
        let error_message: String = lines.collect::<Vec<_>>().join("\n");
        let error_message = truncate(error_message, ERROR_MESSAGE_MAX);

        let (file_path, line_number) = file_re
            .captures(block)
            .map(|c| (c[1].to_string(), c[2].parse().unwrap_or(1)))
            .unwrap_or_else(|| ("unknown".to_string(), 1));

        let test_name = header
            .rsplit(" › ")
            .next()
            .unwrap_or(header)
            .trim()
            .to_string();

        let bug_type = classify_bug_type(&error_message);
        failures.push(TestFailure::new(
            file_path,
            test_name,
            line_number,
            error_message.trim(),
            bug_type,
            truncate(block.to_string(), RAW_OUTPUT_MAX),
        ));
    }
    failures
}

/// Extract failures from `dotnet test` output.
pub fn parse_dotnet_output(output: &str) -> Vec<TestFailure> {
    static FAILED_RE: OnceLock<Regex> = OnceLock::new();
    static MSG_RE: OnceLock<Regex> = OnceLock::new();
    static STACK_RE: OnceLock<Regex> = OnceLock::new();
    static CS_LOC_RE: OnceLock<Regex> = OnceLock::new();
    static CS_ERROR_RE: OnceLock<Regex> = OnceLock::new();
    let failed_re = FAILED_RE.get_or_init(|| re(r"(?m)^\s*Failed\s+(\S+)\s*(?:\[.*\])?\s*$"));
    let msg_re =
        MSG_RE.get_or_init(|| re(r"(?s)Error Message:\s*\n\s*(.+?)(?:\n\s*Stack Trace:|\z)"));
    let stack_re = STACK_RE.get_or_init(|| re(r"in\s+(.+?):line\s+(\d+)"));
    let cs_loc_re = CS_LOC_RE.get_or_init(|| re(r"([\w/.\\-]+\.cs)\((\d+),\d+\)"));
    let cs_error_re =
        CS_ERROR_RE.get_or_init(|| re(r"([\w/.\\-]+\.cs)\((\d+),\d+\):\s*error\s+(CS\d+):\s*(.+)"));

    let positions: Vec<(usize, String)> = failed_re
        .captures_iter(output)
        .map(|c| (c.get(0).unwrap().start(), c[1].to_string()))
        .collect();

    let mut failures = Vec::new();
    for (i, (start, test_name)) in positions.iter().enumerate() {
        let end = positions
            .get(i + 1)
            .map(|(s, _)| *s)
            .unwrap_or(output.len());
        let block = &output[*start..end];

        let mut error_message = msg_re
            .captures(block)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();

        let (file_path, line_number) = stack_re
            .captures(block)
            .map(|c| (c[1].trim().to_string(), c[2].parse().unwrap_or(1)))
            .or_else(|| {
                cs_loc_re
                    .captures(block)
                    .map(|c| (c[1].to_string(), c[2].parse().unwrap_or(1)))
            })
            .unwrap_or_else(|| ("unknown".to_string(), 1));

        if error_message.is_empty() {
            error_message = truncate(block.trim().to_string(), ERROR_MESSAGE_MAX);
        }

        let bug_type = classify_bug_type(&error_message);
        failures.push(TestFailure::new(
            file_path,
            test_name.clone(),
            line_number,
            error_message,
            bug_type,
            truncate(block.to_string(), RAW_OUTPUT_MAX),
        ));
    }

    // Compiler errors when the suite never ran.
    if failures.is_empty() {
        for caps in cs_error_re.captures_iter(output) {
            failures.push(TestFailure::new(
                caps[1].to_string(),
                format!("Build error {}", &caps[3]),
                caps[2].parse().unwrap_or(1),
                caps[4].trim(),
                BugType::Syntax,
                caps[0].to_string(),
            ));
        }
    }

    failures
}

/// Extract failures from `go test -v` output.
pub fn parse_go_output(output: &str) -> Vec<TestFailure> {
    static FAIL_RE: OnceLock<Regex> = OnceLock::new();
    static LOC_RE: OnceLock<Regex> = OnceLock::new();
    let fail_re = FAIL_RE.get_or_init(|| re(r"---\s*FAIL:\s+(\S+)\s*\("));
    let loc_re = LOC_RE.get_or_init(|| re(r"(\S+\.go):(\d+):\s*(.+)"));

    let positions: Vec<(usize, String)> = fail_re
        .captures_iter(output)
        .map(|c| (c.get(0).unwrap().start(), c[1].to_string()))
        .collect();

    let mut failures = Vec::new();
    for (i, (start, test_name)) in positions.iter().enumerate() {
        let end = positions
            .get(i + 1)
            .map(|(s, _)| *s)
            .unwrap_or_else(|| output.len().min(start + 2000));
        let block = &output[*start..end];

        let (file_path, line_number, error_message) = loc_re
            .captures(block)
            .map(|c| {
                (
                    c[1].to_string(),
                    c[2].parse().unwrap_or(1),
                    c[3].trim().to_string(),
                )
            })
            .unwrap_or_else(|| {
                (
                    "unknown".to_string(),
                    1,
                    truncate(block.trim().to_string(), ERROR_MESSAGE_MAX),
                )
            });

        let bug_type = classify_bug_type(&error_message);
        failures.push(TestFailure::new(
            file_path,
            test_name.clone(),
            line_number,
            error_message,
            bug_type,
            truncate(block.to_string(), RAW_OUTPUT_MAX),
        ));
    }
    failures
}

/// Extract failures from `cargo test` output.
pub fn parse_cargo_output(output: &str) -> Vec<TestFailure> {
    static FAIL_RE: OnceLock<Regex> = OnceLock::new();
    static PANIC_RE: OnceLock<Regex> = OnceLock::new();
    static PANIC_NEW_RE: OnceLock<Regex> = OnceLock::new();
    let fail_re = FAIL_RE.get_or_init(|| re(r"test\s+([\w:]+)\s+\.\.\.\s+FAILED"));
    let panic_re = PANIC_RE.get_or_init(|| re(r"panicked at '([^']+)',\s*([\w/.\\-]+):(\d+):\d+"));
    // 1.73+ panic format: "panicked at src/lib.rs:42:5:\nmessage"
    let panic_new_re =
        PANIC_NEW_RE.get_or_init(|| re(r"panicked at ([\w/.\\-]+):(\d+):\d+:\n(.+)"));

    let mut failures = Vec::new();
    for caps in fail_re.captures_iter(output) {
        let test_name = caps[1].to_string();
        let match_end = caps.get(0).unwrap().end();
        let block_start = match_end.saturating_sub(2000);
        let block = &output[block_start..match_end];

        let (error_message, file_path, line_number) = panic_re
            .captures(block)
            .map(|c| (c[1].to_string(), c[2].to_string(), c[3].parse().unwrap_or(1)))
            .or_else(|| {
                panic_new_re.captures(block).map(|c| {
                    (
                        c[3].trim().to_string(),
                        c[1].to_string(),
                        c[2].parse().unwrap_or(1),
                    )
                })
            })
            .unwrap_or_else(|| (format!("Test {test_name} failed"), "unknown".to_string(), 1));

        let bug_type = classify_bug_type(&error_message);
        failures.push(TestFailure::new(
            file_path,
            test_name,
            line_number,
            error_message,
            bug_type,
            truncate(block.to_string(), RAW_OUTPUT_MAX),
        ));
    }
    failures
}

/// Best-effort parser for everything else: scans FAIL/Error markers and any
/// recognized source-file pattern across 20+ extensions.
pub fn parse_generic_output(output: &str) -> Vec<TestFailure> {
    static FAIL_LINE_RE: OnceLock<Regex> = OnceLock::new();
    static LOC_RE: OnceLock<Regex> = OnceLock::new();
    let fail_line_re =
        FAIL_LINE_RE.get_or_init(|| re(r"(?m)(?:FAIL(?:ED)?|Error|Failure|FAILURE)[:\s]+(.+)"));
    let loc_re = LOC_RE.get_or_init(|| {
        re(r"([\w/.\\-]+\.(?:java|kt|scala|rb|php|ex|exs|hs|lua|R|pl|jl|groovy|swift|dart|c|cpp|cc|rs|go|py|js|ts|cs|sol|zig|nim|clj))[:\(](\d+)")
    });

    let mut failures = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for caps in fail_line_re.captures_iter(output) {
        let message = truncate(caps[1].trim().to_string(), ERROR_MESSAGE_MAX);
        let key: String = message.chars().take(80).collect();
        if !seen.insert(key.clone()) {
            continue;
        }

        let whole = caps.get(0).unwrap();
        let context_start = whole.start().saturating_sub(500);
        let context_end = (whole.end() + 500).min(output.len());
        let context = slice_on_char_boundaries(output, context_start, context_end);

        let (file_path, line_number) = loc_re
            .captures(context)
            .map(|c| (c[1].to_string(), c[2].parse().unwrap_or(1)))
            .unwrap_or_else(|| ("unknown".to_string(), 1));

        let bug_type = classify_bug_type(&message);
        failures.push(TestFailure::new(
            file_path,
            key,
            line_number,
            message,
            bug_type,
            truncate(context.to_string(), RAW_OUTPUT_MAX),
        ));
    }
    failures
}

fn slice_on_char_boundaries(s: &str, mut start: usize, mut end: usize) -> &str {
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    while end < s.len() && !s.is_char_boundary(end) {
        end += 1;
    }
    &s[start..end.min(s.len())]
}

// ---------------------------------------------------------------------------
// Completion fallback
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompletionFailure {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    test_name: Option<String>,
    #[serde(default)]
    line_number: Option<u32>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    bug_type: Option<String>,
}

/// Parse the completion service's JSON array (fences tolerated) into
/// failures. Malformed payloads are discarded.
pub fn parse_completion_failures(raw: &str) -> Vec<TestFailure> {
    let cleaned = strip_code_fences(raw);
    let items: Vec<CompletionFailure> = match serde_json::from_str(&cleaned) {
        Ok(items) => items,
        Err(_) => match serde_json::from_str::<CompletionFailure>(&cleaned) {
            Ok(single) => vec![single],
            Err(_) => return Vec::new(),
        },
    };

    items
        .into_iter()
        .map(|item| {
            let bug_type = item
                .bug_type
                .as_deref()
                .and_then(|b| serde_json::from_value(serde_json::Value::String(b.to_string())).ok())
                .unwrap_or(BugType::Logic);
            TestFailure::new(
                item.file_path.unwrap_or_else(|| "unknown".to_string()),
                item.test_name.unwrap_or_else(|| "unknown".to_string()),
                item.line_number.unwrap_or(1),
                item.error_message
                    .unwrap_or_else(|| "unknown error".to_string()),
                bug_type,
                "",
            )
        })
        .collect()
}

async fn completion_fallback(state: &RunState, ctx: &AgentContext) -> Vec<TestFailure> {
    let Some(completion) = &ctx.completion else {
        warn!(run_id = %state.run_id, "no completion provider — skipping fallback parse");
        return Vec::new();
    };

    let prompt = format!(
        "Analyze this test output and extract each failure as JSON.\n\
         For each failure return:\n\
         - file_path: string\n\
         - test_name: string\n\
         - line_number: int\n\
         - error_message: string (brief)\n\
         - bug_type: one of LINTING, SYNTAX, LOGIC, TYPE_ERROR, IMPORT, INDENTATION\n\n\
         Return ONLY a JSON array. No markdown, no explanation.\n\n\
         Test output:\n```\n{}\n```",
        truncate(state.test_output.clone(), 4000)
    );

    match completion
        .complete(
            "You are a test output parser. Return valid JSON only.",
            &prompt,
        )
        .await
    {
        Ok(text) => parse_completion_failures(&text),
        Err(e) => {
            warn!(run_id = %state.run_id, error = %e, "completion fallback failed");
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

const JEST_LIKE: &[&str] = &["jest", "vitest", "ava", "jasmine", "hardhat", "truffle"];

/// Parse test output and classify each failure.
pub async fn analyze(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Analyzer);
    events.thought("analyzer", "Analyzing test failures…", step);

    if state.test_exit_code == 0 {
        events.thought("analyzer", "All tests passed ✓", step + 1);
        return Ok(StateUpdate {
            failures: Some(Vec::new()),
            current_node: Some(NodeName::Analyzer),
            ..StateUpdate::default()
        });
    }

    let framework = state.framework.as_str();
    let output = state.test_output.as_str();
    let mut failures = if JEST_LIKE.contains(&framework) {
        parse_jest_output(output)
    } else if framework == "dotnet-test" {
        parse_dotnet_output(output)
    } else if framework == "go-test" {
        parse_go_output(output)
    } else if framework == "cargo-test" {
        parse_cargo_output(output)
    } else if framework == "pytest" {
        parse_pytest_output(output)
    } else {
        parse_generic_output(output)
    };

    if failures.is_empty() {
        events.thought(
            "analyzer",
            "Rule-based parsing found no structured failures — trying completion fallback…",
            step + 1,
        );
        failures = completion_fallback(state, ctx).await;
    }

    let seen_types: std::collections::BTreeSet<&str> =
        failures.iter().map(|f| f.bug_type.as_str()).collect();
    info!(
        run_id = %state.run_id,
        count = failures.len(),
        types = ?seen_types,
        "classified failures"
    );

    events.thought(
        "analyzer",
        format!(
            "Found {} failure(s): {}",
            failures.len(),
            if seen_types.is_empty() {
                "none".to_string()
            } else {
                seen_types.iter().copied().collect::<Vec<_>>().join(", ")
            }
        ),
        step + 2,
    );

    ctx.trace(
        state,
        NodeName::Analyzer,
        "analysis",
        format!("Classified {} failures", failures.len()),
        Some(json!({
            "failure_count": failures.len(),
            "bug_types": seen_types.iter().copied().collect::<Vec<_>>(),
        })),
        None,
    )
    .await?;

    Ok(StateUpdate {
        failures: Some(failures),
        current_node: Some(NodeName::Analyzer),
        ..StateUpdate::default()
    })
}
