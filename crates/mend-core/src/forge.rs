//! Forge (remote CI) client trait and the GitHub implementation.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CiStatus, MendError, Result};

const API_ROOT: &str = "https://api.github.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("mend-agent/", env!("CARGO_PKG_VERSION"));

/// A workflow run as reported by the forge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeRun {
    pub id: u64,
    pub status: ForgeRunStatus,
    /// Terminal verdict; `Some("success")` means passed.
    pub conclusion: Option<String>,
}

/// Forge-side run phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeRunStatus {
    Queued,
    InProgress,
    Completed,
}

impl ForgeRun {
    /// Project the forge run onto the internal CI status.
    pub fn ci_status(&self) -> CiStatus {
        match self.status {
            ForgeRunStatus::Queued => CiStatus::Pending,
            ForgeRunStatus::InProgress => CiStatus::Running,
            ForgeRunStatus::Completed => {
                if self.conclusion.as_deref() == Some("success") {
                    CiStatus::Passed
                } else {
                    CiStatus::Failed
                }
            }
        }
    }
}

/// Remote-CI interface consumed by the watcher.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Most recent workflow run on the branch, if any.
    async fn latest_run(&self, branch: &str) -> Result<Option<ForgeRun>>;

    /// Whether the repository has any workflow configured.
    async fn workflow_exists(&self) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// GitHub implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<ApiWorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct ApiWorkflowRun {
    id: u64,
    status: String,
    conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowsResponse {
    #[serde(default)]
    total_count: u64,
}

/// GitHub Actions client for one repository.
pub struct GitHubForge {
    http: reqwest::Client,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GitHubForge {
    /// Build from an HTTPS repository URL (`https://github.com/<owner>/<repo>[.git]`).
    pub fn from_repo_url(repo_url: &str, token: Option<String>) -> Result<Self> {
        let (owner, repo) = parse_owner_repo(repo_url)
            .ok_or_else(|| MendError::Forge(format!("cannot parse owner/repo from {repo_url}")))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MendError::Forge(format!("http client: {e}")))?;
        Ok(Self {
            http,
            owner,
            repo,
            token,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.http.get(url).header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MendError::Forge(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MendError::Forge(format!("forge returned {status} for {url}")));
        }
        response
            .json()
            .await
            .map_err(|e| MendError::Forge(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl Forge for GitHubForge {
    async fn latest_run(&self, branch: &str) -> Result<Option<ForgeRun>> {
        let url = format!(
            "{API_ROOT}/repos/{}/{}/actions/runs?branch={branch}&per_page=1",
            self.owner, self.repo
        );
        let parsed: WorkflowRunsResponse = self.get_json(&url).await?;
        Ok(parsed.workflow_runs.into_iter().next().map(|r| ForgeRun {
            id: r.id,
            status: match r.status.as_str() {
                "queued" | "waiting" | "requested" | "pending" => ForgeRunStatus::Queued,
                "in_progress" => ForgeRunStatus::InProgress,
                _ => ForgeRunStatus::Completed,
            },
            conclusion: r.conclusion,
        }))
    }

    async fn workflow_exists(&self) -> Result<bool> {
        let url = format!(
            "{API_ROOT}/repos/{}/{}/actions/workflows",
            self.owner, self.repo
        );
        let parsed: WorkflowsResponse = self.get_json(&url).await?;
        Ok(parsed.total_count > 0)
    }
}

fn parse_owner_repo(repo_url: &str) -> Option<(String, String)> {
    let rest = repo_url
        .strip_prefix("https://github.com/")
        .or_else(|| repo_url.strip_prefix("http://github.com/"))?;
    let rest = rest.trim_end_matches('/').trim_end_matches(".git");
    let mut parts = rest.splitn(2, '/');
    let owner = parts.next()?.to_string();
    let repo = parts.next()?.to_string();
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

// ---------------------------------------------------------------------------
// Scripted fake (testing only)
// ---------------------------------------------------------------------------

/// Forge fake returning a scripted sequence of poll answers.
#[derive(Debug, Default)]
pub struct ScriptedForge {
    runs: Mutex<VecDeque<Option<ForgeRun>>>,
    workflow_exists: bool,
}

impl ScriptedForge {
    /// A forge whose polls pop `runs` front-to-back; the last answer
    /// repeats once the script is exhausted.
    pub fn new(workflow_exists: bool, runs: Vec<Option<ForgeRun>>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            workflow_exists,
        }
    }

    /// A forge with no workflow configured.
    pub fn without_workflow() -> Self {
        Self::new(false, Vec::new())
    }

    /// A forge that immediately reports one terminal run.
    pub fn with_terminal(conclusion: &str) -> Self {
        Self::new(
            true,
            vec![Some(ForgeRun {
                id: 1,
                status: ForgeRunStatus::Completed,
                conclusion: Some(conclusion.to_string()),
            })],
        )
    }
}

#[async_trait]
impl Forge for ScriptedForge {
    async fn latest_run(&self, _branch: &str) -> Result<Option<ForgeRun>> {
        let mut runs = self.runs.lock().unwrap();
        if runs.len() > 1 {
            Ok(runs.pop_front().unwrap())
        } else {
            Ok(runs.front().cloned().flatten())
        }
    }

    async fn workflow_exists(&self) -> Result<bool> {
        Ok(self.workflow_exists)
    }
}
