//! Git 工具：git_status / git_diff / git_commit / git_push
//!
//! 每个调用都带 repo 参数（工作区下的仓库目录），路径经沙箱校验；提交与推送持有仓库锁，
//! 推送不允许 force。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::sandbox::SecurityPolicy;
use crate::tools::shell::truncate_output;
use crate::tools::{Tool, WorkspaceLocks};

const MAX_DIFF_CHARS: usize = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOp {
    Status,
    Diff,
    Commit,
    Push,
}

/// 一个 Git 操作对应一个工具实例
pub struct GitTool {
    op: GitOp,
    policy: Arc<SecurityPolicy>,
    locks: Arc<WorkspaceLocks>,
    timeout_secs: u64,
}

impl GitTool {
    pub fn new(
        op: GitOp,
        policy: Arc<SecurityPolicy>,
        locks: Arc<WorkspaceLocks>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            op,
            policy,
            locks,
            timeout_secs: timeout_secs.max(1),
        }
    }

    /// 全部四个 Git 工具
    pub fn all(
        policy: Arc<SecurityPolicy>,
        locks: Arc<WorkspaceLocks>,
        timeout_secs: u64,
    ) -> Vec<GitTool> {
        [GitOp::Status, GitOp::Diff, GitOp::Commit, GitOp::Push]
            .into_iter()
            .map(|op| GitTool::new(op, policy.clone(), locks.clone(), timeout_secs))
            .collect()
    }

    fn repo_dir(&self, args: &Value) -> Result<PathBuf, String> {
        let repo = args
            .get("repo")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or("Missing required parameter: repo")?;
        let dir = self.policy.validate_path(repo).map_err(|e| e.to_string())?;
        if !dir.is_dir() {
            return Err(format!("Repository not found: {}", repo));
        }
        Ok(dir)
    }

    /// 仓库内相对路径：先按 `repo/file` 校验，再转为相对仓库根
    fn repo_relative(&self, repo_dir: &Path, repo: &str, file: &str) -> Result<String, String> {
        let file = file.trim();
        let joined = format!("{}/{}", repo.trim().trim_end_matches('/'), file);
        let resolved = self.policy.validate_path(&joined).map_err(|e| e.to_string())?;
        resolved
            .strip_prefix(repo_dir)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .map_err(|_| format!("'{}' is not inside repository '{}'", file, repo))
    }

    async fn git(&self, dir: &Path, args: &[String]) -> Result<String, String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(dir).kill_on_drop(true);
        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("git {} timed out after {}s", args[0], self.timeout_secs))?
            .map_err(|e| format!("Failed to run git {}: {}", args[0], e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            Ok(if stdout.is_empty() { stderr } else { stdout })
        } else {
            Err(format!("git {} failed: {}", args[0], if stderr.is_empty() { stdout } else { stderr }))
        }
    }

    async fn status(&self, args: &Value) -> Result<String, String> {
        let dir = self.repo_dir(args)?;
        let out = self
            .git(&dir, &["status".into(), "--short".into(), "--branch".into()])
            .await?;
        Ok(if out.is_empty() { "Working tree clean".to_string() } else { out })
    }

    async fn diff(&self, args: &Value) -> Result<String, String> {
        let dir = self.repo_dir(args)?;
        let repo = args.get("repo").and_then(|v| v.as_str()).unwrap_or_default();
        let mut git_args = vec!["diff".to_string()];
        if args.get("staged").and_then(|v| v.as_bool()).unwrap_or(false) {
            git_args.push("--cached".into());
        }
        if let Some(file) = args.get("file").and_then(|v| v.as_str()) {
            git_args.push("--".into());
            git_args.push(self.repo_relative(&dir, repo, file)?);
        }
        let out = self.git(&dir, &git_args).await?;
        Ok(if out.is_empty() {
            "No changes".to_string()
        } else {
            truncate_output(&out, MAX_DIFF_CHARS)
        })
    }

    async fn commit(&self, args: &Value) -> Result<String, String> {
        let dir = self.repo_dir(args)?;
        let repo = args.get("repo").and_then(|v| v.as_str()).unwrap_or_default();
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or("Missing required parameter: message")?;

        let mut add_args = vec!["add".to_string(), "--".to_string()];
        match args.get("files").and_then(|v| v.as_array()) {
            Some(files) if !files.is_empty() => {
                for f in files.iter().filter_map(|f| f.as_str()) {
                    add_args.push(self.repo_relative(&dir, repo, f)?);
                }
            }
            _ => add_args.push(".".into()),
        }

        let lock = self.locks.lock_for(&dir);
        let _guard = lock.lock().await;
        self.git(&dir, &add_args).await?;
        let out = self
            .git(&dir, &["commit".into(), "-m".into(), message.to_string()])
            .await?;
        tracing::info!(repo = %repo, "git_commit");
        Ok(format!("Committed: {}\n{}", message, out))
    }

    async fn push(&self, args: &Value) -> Result<String, String> {
        let dir = self.repo_dir(args)?;
        let remote = args.get("remote").and_then(|v| v.as_str()).unwrap_or("origin");
        let branch = args.get("branch").and_then(|v| v.as_str());
        for value in std::iter::once(remote).chain(branch) {
            if value.starts_with('-') || value.contains(char::is_whitespace) {
                return Err(format!("Security: invalid push argument '{}'", value));
            }
        }
        let mut push_args = vec!["push".to_string(), remote.to_string()];
        if let Some(b) = branch {
            push_args.push(b.to_string());
        }

        let lock = self.locks.lock_for(&dir);
        let _guard = lock.lock().await;
        let out = self.git(&dir, &push_args).await?;
        tracing::info!(remote = %remote, "git_push");
        Ok(format!("Pushed to {}\n{}", remote, out))
    }
}

#[async_trait]
impl Tool for GitTool {
    fn name(&self) -> &str {
        match self.op {
            GitOp::Status => "git_status",
            GitOp::Diff => "git_diff",
            GitOp::Commit => "git_commit",
            GitOp::Push => "git_push",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            GitOp::Status => "Show git status of a repository. Args: {\"repo\": \"api\"}",
            GitOp::Diff => {
                "Show git diff of a repository. Args: {\"repo\": \"api\", \"staged\": false, \"file\": \"src/a.cs (optional)\"}"
            }
            GitOp::Commit => {
                "Stage and commit changes. Args: {\"repo\": \"api\", \"message\": \"...\", \"files\": [\"src/a.cs\"] (optional, default all)}"
            }
            GitOp::Push => {
                "Push commits (never forced). Args: {\"repo\": \"api\", \"remote\": \"origin\", \"branch\": \"main (optional)\"}"
            }
        }
    }

    fn parameters_schema(&self) -> Value {
        let repo = serde_json::json!({ "type": "string", "description": "Repository directory under the workspace root" });
        match self.op {
            GitOp::Status => serde_json::json!({
                "type": "object",
                "properties": { "repo": repo },
                "required": ["repo"]
            }),
            GitOp::Diff => serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": repo,
                    "staged": { "type": "boolean" },
                    "file": { "type": "string", "description": "Path relative to the repository" }
                },
                "required": ["repo"]
            }),
            GitOp::Commit => serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": repo,
                    "message": { "type": "string" },
                    "files": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["repo", "message"]
            }),
            GitOp::Push => serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": repo,
                    "remote": { "type": "string" },
                    "branch": { "type": "string" }
                },
                "required": ["repo"]
            }),
        }
    }

    fn read_only(&self) -> bool {
        matches!(self.op, GitOp::Status | GitOp::Diff)
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        match self.op {
            GitOp::Status => self.status(&args).await,
            GitOp::Diff => self.diff(&args).await,
            GitOp::Commit => self.commit(&args).await,
            GitOp::Push => self.push(&args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(op: GitOp) -> (TempDir, GitTool) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        let policy = Arc::new(SecurityPolicy::with_defaults(dir.path(), vec![]));
        let locks = Arc::new(WorkspaceLocks::new(dir.path()));
        (dir, GitTool::new(op, policy, locks, 10))
    }

    #[test]
    fn test_names_and_read_only() {
        let (dir, _) = setup(GitOp::Status);
        let policy = Arc::new(SecurityPolicy::with_defaults(dir.path(), vec![]));
        let locks = Arc::new(WorkspaceLocks::new(dir.path()));
        let tools = GitTool::all(policy, locks, 10);
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["git_status", "git_diff", "git_commit", "git_push"]);
        let read_only: Vec<bool> = tools.iter().map(|t| t.read_only()).collect();
        assert_eq!(read_only, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn test_repo_is_required_and_sandboxed() {
        let (_dir, tool) = setup(GitOp::Status);
        let err = tool.execute(json!({})).await.unwrap_err();
        assert_eq!(err, "Missing required parameter: repo");
        let err = tool.execute(json!({"repo": "../other"})).await.unwrap_err();
        assert!(err.starts_with("Security:"));
        let err = tool.execute(json!({"repo": "missing"})).await.unwrap_err();
        assert!(err.starts_with("Repository not found"));
    }

    #[tokio::test]
    async fn test_commit_requires_message() {
        let (_dir, tool) = setup(GitOp::Commit);
        let err = tool.execute(json!({"repo": "api"})).await.unwrap_err();
        assert_eq!(err, "Missing required parameter: message");
    }

    #[tokio::test]
    async fn test_commit_rejects_file_outside_repo() {
        let (_dir, tool) = setup(GitOp::Commit);
        let err = tool
            .execute(json!({"repo": "api", "message": "m", "files": ["../web/a.cs"]}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Security:"));
    }

    #[tokio::test]
    async fn test_push_rejects_force_flags() {
        let (_dir, tool) = setup(GitOp::Push);
        let err = tool
            .execute(json!({"repo": "api", "remote": "--force"}))
            .await
            .unwrap_err();
        assert!(err.contains("invalid push argument"));
        let err = tool
            .execute(json!({"repo": "api", "branch": "main --force"}))
            .await
            .unwrap_err();
        assert!(err.contains("invalid push argument"));
    }
}
