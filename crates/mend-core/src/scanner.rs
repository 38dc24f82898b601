//! Scanner node: acquire the working copy, detect the primary language and
//! test framework, enumerate test files.
//!
//! Language detection counts file extensions across the tree (vendor/build
//! directories skipped, TypeScript and JavaScript merged), then falls back
//! to canonical project manifests, then to python. Framework detection
//! walks four stages: test-file patterns, framework config files, manifest
//! implied framework, and package.json dependencies/scripts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::domain::{MendError, NodeName, Result, RunState, StateUpdate};
use crate::git;

// ---------------------------------------------------------------------------
// Detection tables
// ---------------------------------------------------------------------------

/// File extension → language.
const EXT_MAP: &[(&str, &str)] = &[
    ("py", "python"),
    ("pyx", "python"),
    ("pyi", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("vue", "javascript"),
    ("svelte", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("cs", "csharp"),
    ("fs", "fsharp"),
    ("fsi", "fsharp"),
    ("vb", "vbnet"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("kts", "kotlin"),
    ("scala", "scala"),
    ("go", "go"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("rake", "ruby"),
    ("php", "php"),
    ("swift", "swift"),
    ("m", "objc"),
    ("mm", "objc"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("cc", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("hh", "cpp"),
    ("dart", "dart"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("erl", "erlang"),
    ("hs", "haskell"),
    ("lhs", "haskell"),
    ("lua", "lua"),
    ("r", "r"),
    ("R", "r"),
    ("pl", "perl"),
    ("pm", "perl"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("zsh", "shell"),
    ("clj", "clojure"),
    ("cljs", "clojure"),
    ("cljc", "clojure"),
    ("groovy", "groovy"),
    ("zig", "zig"),
    ("nim", "nim"),
    ("jl", "julia"),
    ("sol", "solidity"),
];

/// Directories excluded from every walk.
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    ".tox",
    ".venv",
    "venv",
    "vendor",
    "dist",
    "build",
    "_build",
    ".build",
    ".dart_tool",
    "Pods",
    ".gradle",
    ".idea",
    ".vs",
    "bin",
    "obj",
    "target",
    "_deps",
    "deps",
    "zig-cache",
    "zig-out",
];

/// How a test-file name matches.
enum NamePattern {
    /// File name is exactly this.
    Exact(&'static str),
    /// File name starts and ends with the given fragments.
    PrefixSuffix(&'static str, &'static str),
    /// File name ends with the fragment.
    Suffix(&'static str),
    /// Some path component equals the directory and the name has the suffix.
    DirAndSuffix(&'static str, &'static str),
}

/// Language → ordered (pattern, framework) detection rules. First rule
/// with matches wins and supplies both the framework and the file list.
fn detection_rules(language: &str) -> &'static [(NamePattern, &'static str)] {
    use NamePattern::*;
    match language {
        "python" => &[
            (PrefixSuffix("test_", ".py"), "pytest"),
            (Exact("tests.py"), "pytest"),
            (Suffix("_test.py"), "pytest"),
            (DirAndSuffix("tests", ".py"), "pytest"),
        ],
        "javascript" => &[
            (Suffix(".test.js"), "jest"),
            (Suffix(".spec.js"), "jest"),
            (Suffix(".test.mjs"), "jest"),
            (Suffix(".test.jsx"), "jest"),
            (DirAndSuffix("test", ".js"), "mocha"),
            (DirAndSuffix("__tests__", ".js"), "jest"),
        ],
        "typescript" => &[
            (Suffix(".test.ts"), "jest"),
            (Suffix(".spec.ts"), "jest"),
            (Suffix(".test.tsx"), "jest"),
            (Suffix(".spec.tsx"), "jest"),
            (DirAndSuffix("test", ".ts"), "vitest"),
            (DirAndSuffix("__tests__", ".ts"), "jest"),
        ],
        "csharp" => &[
            (Suffix("Tests.cs"), "dotnet-test"),
            (Suffix("Test.cs"), "dotnet-test"),
            (Suffix("Spec.cs"), "dotnet-test"),
            (DirAndSuffix("Tests", ".cs"), "dotnet-test"),
        ],
        "fsharp" => &[
            (Suffix("Tests.fs"), "dotnet-test"),
            (Suffix("Test.fs"), "dotnet-test"),
        ],
        "vbnet" => &[
            (Suffix("Tests.vb"), "dotnet-test"),
            (Suffix("Test.vb"), "dotnet-test"),
        ],
        "java" => &[
            (DirAndSuffix("test", ".java"), "maven"),
            (Suffix("Test.java"), "maven"),
            (Suffix("Tests.java"), "maven"),
            (Suffix("Spec.java"), "maven"),
        ],
        "kotlin" => &[
            (DirAndSuffix("test", ".kt"), "gradle"),
            (Suffix("Test.kt"), "gradle"),
            (Suffix("Tests.kt"), "gradle"),
        ],
        "scala" => &[
            (DirAndSuffix("test", ".scala"), "sbt-test"),
            (Suffix("Spec.scala"), "sbt-test"),
            (Suffix("Test.scala"), "sbt-test"),
        ],
        "go" => &[(Suffix("_test.go"), "go-test")],
        "rust" => &[
            (DirAndSuffix("tests", ".rs"), "cargo-test"),
            (DirAndSuffix("src", ".rs"), "cargo-test"),
        ],
        "ruby" => &[
            (Suffix("_spec.rb"), "rspec"),
            (DirAndSuffix("test", "_test.rb"), "minitest"),
            (DirAndSuffix("test", ".rb"), "minitest"),
        ],
        "php" => &[
            (DirAndSuffix("tests", "Test.php"), "phpunit"),
            (DirAndSuffix("tests", ".php"), "phpunit"),
            (Suffix("Test.php"), "phpunit"),
        ],
        "swift" => &[
            (DirAndSuffix("Tests", ".swift"), "swift-test"),
            (Suffix("Tests.swift"), "swift-test"),
        ],
        "dart" => &[
            (DirAndSuffix("test", "_test.dart"), "dart-test"),
            (Suffix("_test.dart"), "dart-test"),
        ],
        "elixir" => &[
            (DirAndSuffix("test", "_test.exs"), "mix-test"),
            (Suffix("_test.exs"), "mix-test"),
        ],
        "haskell" => &[
            (DirAndSuffix("test", ".hs"), "cabal-test"),
            (DirAndSuffix("Test", ".hs"), "cabal-test"),
        ],
        "c" => &[(Suffix("_test.c"), "ctest"), (DirAndSuffix("test", ".c"), "ctest")],
        "cpp" => &[
            (Suffix("_test.cpp"), "ctest"),
            (Suffix("_test.cc"), "ctest"),
            (DirAndSuffix("test", ".cpp"), "ctest"),
        ],
        "clojure" => &[
            (DirAndSuffix("test", ".clj"), "lein-test"),
            (Suffix("_test.clj"), "lein-test"),
        ],
        "lua" => &[
            (Suffix("_spec.lua"), "busted"),
            (DirAndSuffix("test", ".lua"), "busted"),
        ],
        "r" => &[(DirAndSuffix("tests", ".R"), "testthat")],
        "perl" => &[(DirAndSuffix("t", ".t"), "prove"), (Suffix(".t"), "prove")],
        "groovy" => &[
            (DirAndSuffix("test", ".groovy"), "gradle"),
            (Suffix("Test.groovy"), "gradle"),
        ],
        "julia" => &[(DirAndSuffix("test", ".jl"), "julia-test")],
        "zig" => &[(PrefixSuffix("test", ".zig"), "zig-test")],
        "nim" => &[
            (DirAndSuffix("tests", ".nim"), "nim-test"),
            (Suffix("_test.nim"), "nim-test"),
        ],
        "solidity" => &[
            (DirAndSuffix("test", ".sol"), "hardhat"),
            (DirAndSuffix("test", ".js"), "hardhat"),
            (DirAndSuffix("test", ".ts"), "hardhat"),
        ],
        _ => &[],
    }
}

/// Project manifest → (language, framework). Ordered: package.json and the
/// python manifests come last because many ecosystems carry them too.
const PROJECT_FILE_MAP: &[(&str, &str, &str)] = &[
    ("pom.xml", "java", "maven"),
    ("build.gradle", "java", "gradle"),
    ("build.gradle.kts", "kotlin", "gradle"),
    ("build.sbt", "scala", "sbt-test"),
    ("go.mod", "go", "go-test"),
    ("Cargo.toml", "rust", "cargo-test"),
    ("Gemfile", "ruby", "bundler"),
    ("composer.json", "php", "phpunit"),
    ("Package.swift", "swift", "swift-test"),
    ("pubspec.yaml", "dart", "dart-test"),
    ("mix.exs", "elixir", "mix-test"),
    ("stack.yaml", "haskell", "stack-test"),
    ("project.clj", "clojure", "lein-test"),
    ("deps.edn", "clojure", "clj-test"),
    ("Project.toml", "julia", "julia-test"),
    ("build.zig", "zig", "zig-test"),
    ("CMakeLists.txt", "cpp", "ctest"),
    ("package.json", "javascript", "npm-test"),
    ("pyproject.toml", "python", "pytest"),
    ("setup.py", "python", "pytest"),
    ("setup.cfg", "python", "pytest"),
    ("requirements.txt", "python", "pytest"),
];

/// Manifest extensions that may live below the root (.NET solutions, etc.).
const PROJECT_EXT_MAP: &[(&str, &str, &str)] = &[
    ("sln", "csharp", "dotnet-test"),
    ("csproj", "csharp", "dotnet-test"),
    ("fsproj", "fsharp", "dotnet-test"),
    ("vbproj", "vbnet", "dotnet-test"),
    ("cabal", "haskell", "cabal-test"),
    ("nimble", "nim", "nim-test"),
];

/// Root-level framework config files, with an optional language guard.
const CONFIG_CHECKS: &[(&str, &str, Option<&str>)] = &[
    ("pytest.ini", "pytest", None),
    ("setup.cfg", "pytest", Some("python")),
    ("tox.ini", "pytest", None),
    ("jest.config.js", "jest", None),
    ("jest.config.ts", "jest", None),
    ("jest.config.mjs", "jest", None),
    ("jest.config.cjs", "jest", None),
    ("vitest.config.ts", "vitest", None),
    ("vitest.config.js", "vitest", None),
    ("vitest.config.mts", "vitest", None),
    (".mocharc.yml", "mocha", None),
    (".mocharc.json", "mocha", None),
    (".mocharc.js", "mocha", None),
    (".rspec", "rspec", None),
    ("Rakefile", "minitest", Some("ruby")),
    ("phpunit.xml", "phpunit", None),
    ("phpunit.xml.dist", "phpunit", None),
    ("mix.exs", "mix-test", Some("elixir")),
    ("stack.yaml", "stack-test", Some("haskell")),
    ("hardhat.config.js", "hardhat", None),
    ("hardhat.config.ts", "hardhat", None),
    ("truffle-config.js", "truffle", None),
    ("foundry.toml", "forge-test", None),
];

/// Known npm test packages → framework.
const NPM_FRAMEWORK_MAP: &[(&str, &str)] = &[
    ("jest", "jest"),
    ("@jest/core", "jest"),
    ("react-scripts", "jest"),
    ("vitest", "vitest"),
    ("mocha", "mocha"),
    ("ava", "ava"),
    ("tap", "tap"),
    ("jasmine", "jasmine"),
    ("cypress", "cypress"),
    ("playwright", "playwright"),
    ("@playwright/test", "playwright"),
    ("@vue/test-utils", "vitest"),
    ("@testing-library/jest-dom", "jest"),
    ("@testing-library/react", "jest"),
    ("@testing-library/vue", "vitest"),
    ("hardhat", "hardhat"),
];

// ---------------------------------------------------------------------------
// Tree walk
// ---------------------------------------------------------------------------

fn is_skipped(component: &str) -> bool {
    SKIP_DIRS.contains(&component)
}

/// Collect relative file paths, skipping vendor/build directories.
fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if path.is_dir() {
                if !is_skipped(&name) {
                    stack.push(path);
                }
            } else if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Detect the dominant language by extension counting; TS absorbs JS.
pub fn detect_language(root: &Path) -> String {
    let files = walk_files(root);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for file in &files {
        let Some(ext) = file.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if let Some((_, lang)) = EXT_MAP.iter().find(|(e, _)| *e == ext) {
            *counts.entry(lang).or_insert(0) += 1;
        }
    }

    // Merge related ecosystems: TS absorbs JS counts.
    if counts.contains_key("typescript") {
        if let Some(js) = counts.remove("javascript") {
            *counts.entry("typescript").or_insert(0) += js;
        }
    }

    if let Some((lang, _)) = counts
        .into_iter()
        .max_by_key(|&(lang, count)| (count, std::cmp::Reverse(lang)))
    {
        return lang.to_string();
    }

    // Fallback: canonical project manifests.
    for (manifest, lang, _) in PROJECT_FILE_MAP {
        if root.join(manifest).exists() {
            return lang.to_string();
        }
    }
    for file in &files {
        if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
            if let Some((_, lang, _)) = PROJECT_EXT_MAP.iter().find(|(e, _, _)| *e == ext) {
                return lang.to_string();
            }
        }
    }

    "python".to_string()
}

fn matches_pattern(rel: &Path, pattern: &NamePattern) -> bool {
    let name = rel
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match pattern {
        NamePattern::Exact(exact) => name == *exact,
        NamePattern::PrefixSuffix(prefix, suffix) => {
            name.starts_with(prefix) && name.ends_with(suffix)
        }
        NamePattern::Suffix(suffix) => name.ends_with(suffix),
        NamePattern::DirAndSuffix(dir, suffix) => {
            name.ends_with(suffix)
                && rel
                    .parent()
                    .map(|p| p.components().any(|c| c.as_os_str().to_string_lossy() == *dir))
                    .unwrap_or(false)
        }
    }
}

fn read_package_json(root: &Path) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(root.join("package.json")).ok()?;
    serde_json::from_str(&text).ok()
}

fn framework_from_package_json(pkg: &serde_json::Value) -> Option<String> {
    let mut all_deps: HashMap<String, String> = HashMap::new();
    for key in ["dependencies", "devDependencies", "peerDependencies"] {
        if let Some(deps) = pkg.get(key).and_then(|d| d.as_object()) {
            for (name, version) in deps {
                all_deps.insert(name.clone(), version.as_str().unwrap_or("").to_string());
            }
        }
    }
    for (dep, framework) in NPM_FRAMEWORK_MAP {
        if all_deps.contains_key(*dep) {
            return Some(framework.to_string());
        }
    }

    let test_script = pkg
        .get("scripts")
        .and_then(|s| s.get("test"))
        .and_then(|t| t.as_str())
        .unwrap_or("");
    for hint in ["vitest", "jest", "mocha", "pytest"] {
        if test_script.contains(hint) {
            return Some(hint.to_string());
        }
    }
    None
}

/// Detect the framework and enumerate test files for a language.
pub fn detect_framework(root: &Path, language: &str) -> (String, Vec<String>) {
    let files = walk_files(root);

    // 1. Test-file patterns for the detected language.
    for (pattern, framework) in detection_rules(language) {
        let matches: Vec<String> = files
            .iter()
            .filter(|f| matches_pattern(f, pattern))
            .map(|f| f.to_string_lossy().replace('\\', "/"))
            .collect();
        if !matches.is_empty() {
            return (framework.to_string(), matches);
        }
    }

    // 2. Framework config files.
    for (config, framework, lang_guard) in CONFIG_CHECKS {
        if root.join(config).exists() && lang_guard.map(|g| g == language).unwrap_or(true) {
            return (framework.to_string(), Vec::new());
        }
    }

    // 3. Project-manifest implied framework.
    for (manifest, lang, framework) in PROJECT_FILE_MAP {
        if *lang == language && root.join(manifest).exists() {
            return (framework.to_string(), Vec::new());
        }
    }
    for file in &files {
        if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
            if let Some((_, _, framework)) =
                PROJECT_EXT_MAP.iter().find(|(e, l, _)| *e == ext && *l == language)
            {
                return (framework.to_string(), Vec::new());
            }
        }
    }

    // 4. package.json dependencies and scripts.
    if let Some(pkg) = read_package_json(root) {
        if let Some(framework) = framework_from_package_json(&pkg) {
            return (framework, Vec::new());
        }
        let has_test_script = pkg
            .get("scripts")
            .and_then(|s| s.get("test"))
            .and_then(|t| t.as_str())
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        if has_test_script {
            return ("npm-test".to_string(), Vec::new());
        }
    }

    ("unknown".to_string(), Vec::new())
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Clone the repository, detect language/framework, list test files.
pub async fn scan(state: &RunState, ctx: &AgentContext) -> Result<StateUpdate> {
    let events = ctx.events(&state.run_id);
    let step = state.step_index(NodeName::Scanner);
    events.thought("scanner", format!("Cloning {}…", state.repo_url), step);

    let repo_dir = ctx.config.repos_dir.join(&state.run_id);
    if repo_dir.exists() {
        std::fs::remove_dir_all(&repo_dir)?;
    }
    if let Some(parent) = repo_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let repo_url = state.repo_url.clone();
    let branch_name = state.branch_name.clone();
    let clone_dir = repo_dir.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        git::clone_shallow(&repo_url, &clone_dir)?;
        git::checkout_branch(&clone_dir, &branch_name)?;
        Ok(())
    })
    .await
    .map_err(|e| MendError::Git(format!("clone task panicked: {e}")))??;

    let language = detect_language(&repo_dir);
    let (framework, test_files) = detect_framework(&repo_dir, &language);

    info!(
        run_id = %state.run_id,
        language = %language,
        framework = %framework,
        test_files = test_files.len(),
        "scanned repository"
    );
    if framework == "unknown" {
        warn!(run_id = %state.run_id, "no test framework detected");
    }

    events.thought(
        "scanner",
        format!(
            "Detected {language}/{framework} — {} test file(s)",
            test_files.len()
        ),
        step + 1,
    );

    ctx.trace(
        state,
        NodeName::Scanner,
        "clone",
        format!("Cloned {}, detected {language}/{framework}", state.repo_url),
        Some(json!({
            "language": language,
            "framework": framework,
            "test_file_count": test_files.len(),
        })),
        None,
    )
    .await?;

    Ok(StateUpdate {
        repo_dir: Some(repo_dir),
        language: Some(language),
        framework: Some(framework),
        test_files: Some(test_files),
        current_node: Some(NodeName::Scanner),
        ..StateUpdate::default()
    })
}
