//! Runner node: resolve toolchain dependencies, execute the test command
//! under a hard wall clock, capture combined output and exit code.
//!
//! Exit codes are data, not errors: a failing suite routes to the analyzer
//! normally. 127 is reserved for "test command not found"; a timeout
//! reports 1 with an explanatory line.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::domain::{NodeName, Result, RunState, StateUpdate};

/// Exit code reported when the framework binary is absent.
pub const EXIT_COMMAND_NOT_FOUND: i32 = 127;

// ---------------------------------------------------------------------------
// Framework command table
// ---------------------------------------------------------------------------

/// Framework → test command.
const COMMANDS: &[(&str, &[&str])] = &[
    // Python
    ("pytest", &["python", "-m", "pytest", "--tb=short", "-q", "--no-header"]),
    // JavaScript / TypeScript
    ("jest", &["npx", "jest", "--no-coverage", "--verbose"]),
    ("vitest", &["npx", "vitest", "run", "--reporter=verbose"]),
    ("mocha", &["npx", "mocha", "--recursive"]),
    ("ava", &["npx", "ava", "--verbose"]),
    ("tap", &["npx", "tap"]),
    ("jasmine", &["npx", "jasmine"]),
    ("cypress", &["npx", "cypress", "run"]),
    ("playwright", &["npx", "playwright", "test"]),
    ("npm-test", &["npm", "test", "--", "--no-coverage"]),
    // Solidity
    ("hardhat", &["npx", "hardhat", "test"]),
    ("truffle", &["npx", "truffle", "test"]),
    ("forge-test", &["forge", "test", "-vv"]),
    // .NET
    ("dotnet-test", &["dotnet", "test", "--verbosity", "normal"]),
    // Java / Kotlin / Groovy
    ("maven", &["mvn", "test", "-B"]),
    ("gradle", &["./gradlew", "test"]),
    // Scala
    ("sbt-test", &["sbt", "test"]),
    // Go
    ("go-test", &["go", "test", "-v", "./..."]),
    // Rust
    ("cargo-test", &["cargo", "test"]),
    // Ruby
    ("rspec", &["bundle", "exec", "rspec"]),
    ("minitest", &["bundle", "exec", "rake", "test"]),
    ("bundler", &["bundle", "exec", "rake", "test"]),
    // PHP
    ("phpunit", &["./vendor/bin/phpunit"]),
    // Swift
    ("swift-test", &["swift", "test"]),
    // Dart / Flutter
    ("dart-test", &["dart", "test"]),
    ("flutter-test", &["flutter", "test"]),
    // Elixir
    ("mix-test", &["mix", "test"]),
    // Haskell
    ("cabal-test", &["cabal", "test"]),
    ("stack-test", &["stack", "test"]),
    // Clojure
    ("lein-test", &["lein", "test"]),
    ("clj-test", &["clojure", "-M:test"]),
    // Lua
    ("busted", &["busted", "--verbose"]),
    // R
    ("testthat", &["Rscript", "-e", "testthat::test_dir('tests')"]),
    // Perl
    ("prove", &["prove", "-v", "-r", "t"]),
    // Julia
    ("julia-test", &["julia", "--project=.", "-e", "using Pkg; Pkg.test()"]),
    // Zig
    ("zig-test", &["zig", "build", "test"]),
    // Nim
    ("nim-test", &["nimble", "test"]),
    // C / C++
    ("ctest", &["ctest", "--test-dir", "build", "--output-on-failure"]),
    ("make-test", &["make", "test"]),
];

const NODE_FRAMEWORKS: &[&str] = &[
    "jest", "vitest", "mocha", "ava", "tap", "jasmine", "cypress", "playwright", "npm-test",
    "hardhat", "truffle",
];
const RUBY_FRAMEWORKS: &[&str] = &["rspec", "minitest", "bundler"];

/// Command for a framework; unknown frameworks fall back to pytest.
pub fn command_for(framework: &str) -> Vec<String> {
    COMMANDS
        .iter()
        .find(|(f, _)| *f == framework)
        .or_else(|| COMMANDS.iter().find(|(f, _)| *f == "pytest"))
        .map(|(_, cmd)| cmd.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Subprocess execution
// ---------------------------------------------------------------------------

/// Run a command and return (combined output, exit code).
pub async fn run_command(
    cmd: &[String],
    cwd: &Path,
    extra_env: &[(&str, String)],
    timeout_secs: u64,
) -> (String, i32) {
    let Some((exe, args)) = cmd.split_first() else {
        return ("ERROR: empty command".to_string(), 1);
    };

    let mut command = Command::new(exe);
    command
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .env("PYTHONPATH", cwd)
        .env("CI", "true")
        .kill_on_drop(true);
    for (key, value) in extra_env {
        command.env(key, value);
    }

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (
                format!("ERROR: Test command not found — {exe}"),
                EXIT_COMMAND_NOT_FOUND,
            );
        }
        Err(e) => return (format!("ERROR: failed to spawn {exe}: {e}"), 1),
    };

    match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            (combined, output.status.code().unwrap_or(1))
        }
        Ok(Err(e)) => (format!("ERROR: failed to wait for {exe}: {e}"), 1),
        Err(_) => (
            format!("ERROR: Test execution timed out after {timeout_secs}s"),
            1,
        ),
    }
}

// ---------------------------------------------------------------------------
// One-time dependency installs
// ---------------------------------------------------------------------------

async fn install_step(
    label: &str,
    cmd: &[&str],
    cwd: &Path,
    extra_env: &[(&str, String)],
    timeout_secs: u64,
) -> bool {
    let cmd: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
    let (output, code) = run_command(&cmd, cwd, extra_env, timeout_secs).await;
    if code != 0 {
        warn!(step = label, exit = code, output = %crate::domain::failure::truncate(output, 500), "install step failed");
        return false;
    }
    true
}

async fn ensure_dependencies(state: &RunState, ctx: &AgentContext, framework: &str, step: u32) {
    let repo = state.repo_dir.as_path();
    let events = ctx.events(&state.run_id);
    let timeout = ctx.config.install_timeout_secs;

    if NODE_FRAMEWORKS.contains(&framework) {
        if repo.join("package.json").exists() && !repo.join("node_modules").exists() {
            events.thought("runner", "Installing Node.js dependencies…", step);
            install_step(
                "npm install",
                &["npm", "install", "--no-audit", "--no-fund", "--prefer-offline"],
                repo,
                &[("NODE_ENV", "development".to_string())],
                timeout.min(120),
            )
            .await;
        }
        return;
    }

    if framework == "dotnet-test" {
        events.thought("runner", "Restoring .NET dependencies…", step);
        let env = [("DOTNET_CLI_TELEMETRY_OPTOUT", "1".to_string())];
        if install_step("dotnet restore", &["dotnet", "restore"], repo, &env, timeout).await {
            install_step(
                "dotnet build",
                &["dotnet", "build", "--no-restore"],
                repo,
                &env,
                timeout,
            )
            .await;
        }
        return;
    }

    if RUBY_FRAMEWORKS.contains(&framework) && repo.join("Gemfile").exists() {
        events.thought("runner", "Installing Ruby dependencies…", step);
        install_step(
            "bundle install",
            &["bundle", "install", "--quiet"],
            repo,
            &[],
            timeout,
        )
        .await;
        return;
    }

    if framework == "phpunit" && repo.join("composer.json").exists() {
        events.thought("runner", "Installing PHP dependencies…", step);
        install_step(
            "composer install",
            &["composer", "install", "--no-interaction", "--quiet"],
            repo,
            &[],
            timeout,
        )
        .await;
        return;
    }

    if framework == "mix-test" && repo.join("mix.exs").exists() {
        events.thought("runner", "Installing Elixir dependencies…", step);
        install_step(
            "mix deps.get",
            &["mix", "deps.get"],
            repo,
            &[("MIX_ENV", "test".to_string())],
            timeout.min(120),
        )
        .await;
        return;
    }

    if matches!(framework, "dart-test" | "flutter-test") && repo.join("pubspec.yaml").exists() {
        events.thought("runner", "Installing Dart/Flutter dependencies…", step);
        let cmd: &[&str] = if repo.join(".flutter-plugins").exists() {
            &["flutter", "pub", "get"]
        } else {
            &["dart", "pub", "get"]
        };
        install_step("pub get", cmd, repo, &[], timeout.min(120)).await;
        return;
    }

    if framework == "ctest" && repo.join("CMakeLists.txt").exists() {
        let build_dir = repo.join("build");
        if std::fs::create_dir_all(&build_dir).is_err() {
            return;
        }
        events.thought("runner", "Building C/C++ project with CMake…", step);
        if install_step("cmake configure", &["cmake", ".."], &build_dir, &[], timeout).await {
            install_step("cmake build", &["cmake", "--build", "."], &build_dir, &[], timeout)
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// JS framework resolution
// ---------------------------------------------------------------------------

/// Resolve an unknown JS/TS framework from package.json.
fn resolve_js_framework(repo: &Path) -> String {
    let Ok(text) = std::fs::read_to_string(repo.join("package.json")) else {
        return "npm-test".to_string();
    };
    let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&text) else {
        return "npm-test".to_string();
    };

    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"].iter().any(|key| {
            pkg.get(key)
                .and_then(|d| d.as_object())
                .map(|d| d.contains_key(name))
                .unwrap_or(false)
        })
    };

    if has_dep("vitest") || has_dep("@vitest/runner") {
        return "vitest".to_string();
    }
    if has_dep("jest") || has_dep("@jest/core") || has_dep("react-scripts") {
        return "jest".to_string();
    }
    if has_dep("mocha") {
        return "mocha".to_string();
    }

    let test_script = pkg
        .get("scripts")
        .and_then(|s| s.get("test"))
        .and_then(|t| t.as_str())
        .unwrap_or("");
    for hint in ["vitest", "jest", "mocha"] {
        if test_script.contains(hint) {
            return hint.to_string();
        }
    }
    "npm-test".to_string()
}

fn has_python_test_files(repo: &Path) -> bool {
    let mut stack = vec![repo.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if name != "node_modules" && name != ".git" {
                    stack.push(path);
                }
            } else if (name.starts_with("test_") || name.ends_with("_test.py"))
                && name.ends_with(".py")
            {
                return true;
            }
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Run the test suite in the working copy and capture output.
pub async fn run_tests(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Runner);
    events.thought(
        "runner",
        format!("Running tests (iteration {})…", state.iteration),
        step,
    );

    let repo = state.repo_dir.clone();
    let is_js = matches!(state.language.as_str(), "javascript" | "typescript");
    let mut framework = state.framework.clone();
    if framework == "unknown" && is_js {
        framework = resolve_js_framework(&repo);
        info!(run_id = %state.run_id, framework = %framework, "resolved JS framework from package.json");
    }

    let override_cmd = ctx.config.runner.command_override.clone();
    if override_cmd.is_none() {
        ensure_dependencies(state, ctx, &framework, step).await;
    }

    let cmd = override_cmd.unwrap_or_else(|| command_for(&framework));
    let test_env = framework_env(&framework);
    let timeout = ctx.config.test_timeout_secs;

    let (mut output, mut exit_code) = run_command(&cmd, &repo, &test_env, timeout).await;

    // Escalation 1: "no tests" (5) or missing binary (127) on a JS repo →
    // retry via npm test, adopt whichever invocation did better.
    if matches!(exit_code, 5 | EXIT_COMMAND_NOT_FOUND) && is_js && framework != "npm-test" {
        events.thought(
            "runner",
            format!("{framework} returned exit={exit_code}, trying npm test fallback…"),
            step,
        );
        let npm_cmd: Vec<String> = vec!["npm".to_string(), "test".to_string()];
        let (fb_output, fb_code) = run_command(&npm_cmd, &repo, &[], timeout).await;
        if fb_output.len() > output.len() || fb_code == 0 {
            output = fb_output;
            exit_code = fb_code;
            framework = "npm-test".to_string();
        }
    }

    // Escalation 2: output still thin and Python test files exist → pytest.
    if matches!(exit_code, 5 | EXIT_COMMAND_NOT_FOUND)
        && output.len() < 100
        && is_js
        && has_python_test_files(&repo)
    {
        events.thought(
            "runner",
            "No JS tests found — Python test files detected, running pytest…",
            step,
        );
        let py_cmd = command_for("pytest");
        let (py_output, py_code) = run_command(&py_cmd, &repo, &[], timeout).await;
        if py_output.len() > output.len() {
            output = py_output;
            exit_code = py_code;
            framework = "pytest".to_string();
        }
    }

    events.thought(
        "runner",
        format!(
            "Tests {} (exit={exit_code}, {} chars output)",
            if exit_code == 0 { "PASSED" } else { "FAILED" },
            output.len()
        ),
        step + 1,
    );

    ctx.trace(
        state,
        NodeName::Runner,
        "test_execution",
        format!("Ran {framework} — exit {exit_code}"),
        Some(json!({
            "framework": framework,
            "exit_code": exit_code,
            "output_length": output.len(),
        })),
        Some(crate::domain::failure::truncate(output.clone(), 2000)),
    )
    .await?;

    Ok(StateUpdate {
        framework: Some(framework),
        test_output: Some(output),
        test_exit_code: Some(exit_code),
        current_node: Some(NodeName::Runner),
        ..StateUpdate::default()
    })
}

fn framework_env(framework: &str) -> Vec<(&'static str, String)> {
    match framework {
        "dotnet-test" => vec![("DOTNET_CLI_TELEMETRY_OPTOUT", "1".to_string())],
        "mix-test" => vec![("MIX_ENV", "test".to_string())],
        _ => Vec::new(),
    }
}
